//! Write-ahead log
//!
//! Durably appends fixed 48-byte [`WalEntry`] records and streams them back at
//! recovery time. The WAL owns no logical state of its own — the key index
//! ([`crate::index`]) is derived entirely from a recovery scan.
//!
//! Every [`Wal::append`] and [`Wal::append_batch`] call returns only after the
//! underlying `fsync` completes; that fsync is the commit point described in the
//! top-level crate documentation.

#[cfg(test)]
mod tests;

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, trace};

use crate::codec::{self, CodecError, WalEntry, WAL_ENTRY_SIZE};

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A WAL entry failed codec validation.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Internal invariant violation (poisoned lock).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A durable, append-only log of fixed-size [`WalEntry`] records.
///
/// Shared between the engine and the write batcher via `Arc<Wal>`; interior
/// mutability comes from a `Mutex<File>` so both can append without the caller
/// needing `&mut`.
#[derive(Debug)]
pub struct Wal {
    file: Mutex<File>,
    path: PathBuf,
}

impl Wal {
    /// Opens (creating if necessary) the WAL file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        debug!(path = %path.display(), "WAL opened");
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Path to the underlying WAL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a single entry and fsyncs. This is the commit point for the write
    /// that produced `entry`.
    pub fn append(&self, entry: &WalEntry) -> Result<(), WalError> {
        let bytes = codec::serialize_wal_entry(entry);
        let mut file = self
            .file
            .lock()
            .map_err(|_| WalError::Internal("WAL mutex poisoned".into()))?;
        use std::io::Write;
        file.write_all(&bytes)?;
        file.sync_all()?;
        trace!(sequence = entry.sequence, "WAL entry appended");
        Ok(())
    }

    /// Serializes `entries` into one buffer, issues one write call, and fsyncs
    /// once. This is the commit point for an entire batch of writes.
    pub fn append_batch(&self, entries: &[WalEntry]) -> Result<(), WalError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(entries.len() * WAL_ENTRY_SIZE);
        for entry in entries {
            buf.extend_from_slice(&codec::serialize_wal_entry(entry));
        }
        let mut file = self
            .file
            .lock()
            .map_err(|_| WalError::Internal("WAL mutex poisoned".into()))?;
        use std::io::Write;
        file.write_all(&buf)?;
        file.sync_all()?;
        trace!(count = entries.len(), "WAL batch appended");
        Ok(())
    }

    /// Current on-disk length of the WAL file in bytes.
    pub fn len(&self) -> Result<u64, WalError> {
        let file = self
            .file
            .lock()
            .map_err(|_| WalError::Internal("WAL mutex poisoned".into()))?;
        Ok(file.metadata()?.len())
    }

    /// Whether the WAL file is currently empty.
    pub fn is_empty(&self) -> Result<bool, WalError> {
        Ok(self.len()? == 0)
    }

    /// Reads every valid entry from the WAL at `path`, in file order.
    ///
    /// The whole file is read into memory, then each 48-byte slot from offset 0
    /// is decoded in turn. The scan stops at the first slot that is short,
    /// malformed, or fails checksum/trailer validation — entries past that point
    /// are never skipped or resumed past, since corruption at position *k* makes
    /// everything after it untrustworthy. If `path` does not exist, returns an
    /// empty vector.
    pub fn recover<P: AsRef<Path>>(path: P) -> Result<Vec<WalEntry>, WalError> {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        let mut offset = 0usize;
        while offset + WAL_ENTRY_SIZE <= bytes.len() {
            match codec::deserialize_wal_entry(&bytes[offset..offset + WAL_ENTRY_SIZE]) {
                Ok(entry) => {
                    entries.push(entry);
                    offset += WAL_ENTRY_SIZE;
                }
                Err(_) => break,
            }
        }
        debug!(path = %path.display(), recovered = entries.len(), "WAL recovery complete");
        Ok(entries)
    }

    /// Reads exactly `len` bytes at `offset` from the underlying file, for callers
    /// that need positional access (e.g. re-reading a just-appended slice).
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, WalError> {
        let file = self
            .file
            .lock()
            .map_err(|_| WalError::Internal("WAL mutex poisoned".into()))?;
        let mut buf = vec![0u8; len];
        file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }
}
