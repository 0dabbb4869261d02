//! Forward migration, v1 → v2
//!
//! The v1 on-disk layout shares the v2 [`crate::codec::DataFileHeader`] (16
//! bytes, `version` = 1) but encodes records without checksums, sequence
//! numbers, or timestamps: `keyLen(2) ∥ key ∥ embedding(D×4) ∥
//! recordLen(4)`, last-write-wins on duplicate keys. [`migrate_v1_to_v2`]
//! backs up the v1 file, dedups its records keeping first-occurrence order,
//! and replays the survivors through a fresh v2 [`crate::engine::Engine`] so
//! each one gains a checksum, sequence number, and WAL commit.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::codec::{self, CodecError, DATA_RECORD_VERSION, HEADER_SIZE, LEGACY_VERSION};
use crate::engine::{Engine, EngineOptions};
use crate::error::EngineError;

/// Errors returned while detecting or running a v1 → v2 migration.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A header or record failed codec validation.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// The file's header reports a version neither 1 nor 2.
    #[error("unsupported data file version {0}")]
    VersionUnsupported(u16),
    /// A v1 record's framing was inconsistent (truncated or corrupt).
    #[error("invalid v1 record at offset {offset}: {reason}")]
    InvalidV1Record {
        /// Byte offset within the v1 file where parsing failed.
        offset: usize,
        /// Human-readable description of what was wrong.
        reason: String,
    },
    /// The engine opened to replay migrated records returned an error.
    #[error("engine error during migration: {0}")]
    Engine(#[from] Box<EngineError>),
}

/// Reads the 16-byte header at `path` and returns its version, or `None` if the
/// file does not exist or does not start with a valid header.
pub fn detect_version(path: &Path) -> Result<Option<u16>, MigrationError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if bytes.len() < HEADER_SIZE {
        return Ok(None);
    }
    match codec::deserialize_header(&bytes[..HEADER_SIZE]) {
        Ok(header) => Ok(Some(header.version)),
        Err(_) => Ok(None),
    }
}

/// Ensures the database at `path` (a `.raptor` data file path) is v2, migrating
/// it in place if it is v1. A no-op if the file does not exist or is already
/// v2. Fails [`MigrationError::VersionUnsupported`] for any other version.
pub fn ensure_v2(path: &Path, dimension: u32) -> Result<(), MigrationError> {
    match detect_version(path)? {
        None => Ok(()),
        Some(v) if v == DATA_RECORD_VERSION => Ok(()),
        Some(v) if v == LEGACY_VERSION => migrate_v1_to_v2(path, None, dimension),
        Some(v) => Err(MigrationError::VersionUnsupported(v)),
    }
}

/// Derives the `(wal_path, lock_path)` siblings of a `.raptor` data file path,
/// the same convention [`crate::engine`] resolves paths with.
fn sibling_paths(data_path: &Path) -> (PathBuf, PathBuf) {
    let base = data_path.with_extension("");
    let base_str = base.to_string_lossy();
    (
        PathBuf::from(format!("{base_str}.raptor-wal")),
        PathBuf::from(format!("{base_str}.raptor.lock")),
    )
}

/// Parses every v1 record in `bytes` (after the 16-byte header), forward from
/// offset 16, returning `(key, embedding)` pairs in file order.
///
/// Per-record framing: `keyLen(2) ∥ key ∥ embedding(dimension × 4) ∥
/// recordLen(4)`, all little-endian; `recordLen` is the total byte length of
/// the record (including itself) and is cross-checked against the bytes
/// actually consumed as a corruption guard.
fn parse_v1_records(bytes: &[u8], dimension: u32) -> Result<Vec<(String, Vec<f32>)>, MigrationError> {
    let mut out = Vec::new();
    let mut offset = HEADER_SIZE;
    let dim = dimension as usize;

    while offset < bytes.len() {
        let remaining = bytes.len() - offset;
        if remaining < 2 {
            return Err(MigrationError::InvalidV1Record {
                offset,
                reason: format!("{remaining} trailing bytes, expected at least 2 for keyLen"),
            });
        }
        let key_len = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as usize;
        let key_start = offset + 2;
        let key_end = key_start + key_len;
        let embed_end = key_end + dim * 4;
        let record_end = embed_end + 4;
        if record_end > bytes.len() {
            return Err(MigrationError::InvalidV1Record {
                offset,
                reason: "record extends past end of file".into(),
            });
        }

        let key = std::str::from_utf8(&bytes[key_start..key_end])
            .map_err(|_| MigrationError::InvalidV1Record {
                offset,
                reason: "key is not valid UTF-8".into(),
            })?
            .to_string();

        let mut embedding = Vec::with_capacity(dim);
        for i in 0..dim {
            let start = key_end + i * 4;
            embedding.push(f32::from_le_bytes(bytes[start..start + 4].try_into().expect("bounds checked above")));
        }

        let record_len = u32::from_le_bytes(bytes[embed_end..embed_end + 4].try_into().expect("bounds checked above"));
        let actual_len = record_end - offset;
        if record_len as usize != actual_len {
            return Err(MigrationError::InvalidV1Record {
                offset,
                reason: format!("recordLen {record_len} does not match framed length {actual_len}"),
            });
        }

        out.push((key, embedding));
        offset = record_end;
    }

    Ok(out)
}

/// Migrates the v1 data file at `data_path` to v2 in place.
///
/// 1. Copies `data_path` to `backup_path` (default: `<data_path>.v1.backup`).
/// 2. Parses every v1 record forward, keeping only the last write per key but
///    preserving each key's *first* insertion position (insertion-ordered
///    dedup) — e.g. keys written in order `a, b, a` survive as `[a, b]`, with
///    `a` holding its second write's embedding.
/// 3. Removes the old data file and any stale WAL/lock siblings.
/// 4. Opens a fresh v2 engine at the same base path and replays the survivors
///    through the normal write path, so each gains a checksum, sequence
///    number, and WAL commit.
pub fn migrate_v1_to_v2(
    data_path: &Path,
    backup_path: Option<&Path>,
    dimension: u32,
) -> Result<(), MigrationError> {
    let backup_path: PathBuf = backup_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("{}.v1.backup", data_path.display())));
    fs::copy(data_path, &backup_path)?;

    let bytes = fs::read(data_path)?;
    let records = parse_v1_records(&bytes, dimension)?;

    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, Vec<f32>> = HashMap::new();
    for (key, embedding) in records {
        if !latest.contains_key(&key) {
            order.push(key.clone());
        }
        latest.insert(key, embedding);
    }

    let (wal_path, lock_path) = sibling_paths(data_path);
    let base = data_path.with_extension("");
    remove_if_exists(data_path)?;
    remove_if_exists(&wal_path)?;
    remove_if_exists(&lock_path)?;

    let mut options = EngineOptions::new(&base);
    options.dimension = dimension;
    let engine = Engine::open(options).map_err(Box::new)?;

    let migrated = order.len();
    for key in &order {
        let embedding = latest.remove(key).expect("key present from dedup pass above");
        engine.write_record(key, &embedding).map_err(Box::new)?;
    }
    engine.close().map_err(Box::new)?;

    info!(migrated, backup = %backup_path.display(), "v1 to v2 migration complete");
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), io::Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
