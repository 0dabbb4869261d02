//! Key index
//!
//! The in-memory map from key to [`RecordLocation`], rebuilt from the WAL at open
//! time. The index is the sole source of truth for `has_key`/`count`/`keys` — the
//! data file is only consulted to recover keys during [`build_from_wal`], since the
//! WAL itself carries only a hash of the key, not the key bytes.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::RwLock;

use thiserror::Error;
use tracing::trace;

use crate::codec::{self, OpType, WalEntry};

/// Errors returned while rebuilding the index from the WAL and data file.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Internal invariant violation (poisoned lock).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Where a record lives in the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    /// Byte offset of the record in the data file.
    pub offset: u64,
    /// Length in bytes of the record.
    pub length: u32,
    /// Sequence number assigned to the write that produced this location.
    pub sequence: i64,
}

/// In-memory mapping from key to [`RecordLocation`].
#[derive(Debug, Default)]
pub struct KeyIndex {
    map: RwLock<HashMap<String, RecordLocation>>,
}

impl KeyIndex {
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the current location of `key`, if present.
    pub fn get(&self, key: &str) -> Option<RecordLocation> {
        self.map.read().expect("index lock poisoned").get(key).copied()
    }

    /// Whether `key` currently has a live (non-deleted) location.
    pub fn has(&self, key: &str) -> bool {
        self.map.read().expect("index lock poisoned").contains_key(key)
    }

    /// Applies a committed operation to the index: a delete removes `key`;
    /// insert/update installs `loc` as the key's current location.
    pub fn apply(&self, key: &str, loc: RecordLocation, op: OpType) {
        let mut map = self.map.write().expect("index lock poisoned");
        match op {
            OpType::Delete => {
                map.remove(key);
            }
            OpType::Insert | OpType::Update => {
                map.insert(key.to_string(), loc);
            }
        }
    }

    /// Unconditionally removes `key` from the index.
    pub fn delete(&self, key: &str) {
        self.map.write().expect("index lock poisoned").remove(key);
    }

    /// All keys currently present, in unspecified order.
    pub fn keys(&self) -> Vec<String> {
        self.map.read().expect("index lock poisoned").keys().cloned().collect()
    }

    /// All `(key, location)` pairs currently present, in unspecified order.
    pub fn locations(&self) -> Vec<(String, RecordLocation)> {
        self.map
            .read()
            .expect("index lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Number of live keys.
    pub fn count(&self) -> usize {
        self.map.read().expect("index lock poisoned").len()
    }
}

/// Rebuilds a [`KeyIndex`] by replaying `entries` against the data file at
/// `data_path`, returning the rebuilt index and the maximum sequence number
/// observed.
///
/// For each WAL entry, up to 1024 bytes are read at `entry.offset` to recover the
/// key (the WAL only stores a key hash, not the key itself). Entries whose key
/// cannot be read — a short read, or bytes that fail magic validation — are
/// skipped: the data file is the source of truth for keys, and a WAL entry that
/// points past a truncated or corrupted data file cannot be trusted either.
///
/// If `data_path` does not exist, returns an empty index and sequence `0`.
pub fn build_from_wal(
    entries: &[WalEntry],
    data_path: &Path,
) -> Result<(KeyIndex, i64), IndexError> {
    const KEY_READ_WINDOW: usize = 1024;

    let index = KeyIndex::new();
    let mut max_sequence = 0i64;

    let data_file = match File::open(data_path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((index, 0)),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        if entry.sequence > max_sequence {
            max_sequence = entry.sequence;
        }

        let mut buf = vec![0u8; KEY_READ_WINDOW];
        let read = match data_file.read_at(&mut buf, entry.offset) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => continue,
            Err(_) => continue,
        };
        buf.truncate(read);

        let Some(key) = codec::read_key_from_buffer(&buf, 0) else {
            trace!(offset = entry.offset, "skipping WAL entry with unreadable key");
            continue;
        };

        index.apply(
            &key,
            RecordLocation {
                offset: entry.offset,
                length: entry.length,
                sequence: entry.sequence,
            },
            entry.op,
        );
    }

    Ok((index, max_sequence))
}
