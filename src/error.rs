//! Top-level error type.
//!
//! Every component defines its own typed error (`CodecError`, `WalError`,
//! `IndexError`, `LockError`, `BatchError`, `MigrationError`); this module layers
//! them into a single [`EngineError`] that every public [`crate::engine::Engine`]
//! method returns, following the same `#[from]`-layered convention the rest of
//! this codebase's error types use.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::batch::BatchError;
use crate::codec::CodecError;
use crate::index::IndexError;
use crate::lock::LockError;
use crate::migration::MigrationError;
use crate::wal::WalError;

/// The error type returned by every fallible [`crate::engine::Engine`] operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A write supplied an embedding whose length did not match the database's
    /// configured dimension.
    #[error("dimension mismatch: database expects {expected}, got {actual}")]
    DimensionMismatch {
        /// The database's configured dimension.
        expected: u32,
        /// The length of the embedding the caller supplied.
        actual: usize,
    },
    /// A mutation was attempted on an engine opened with `read_only: true`.
    #[error("engine is read-only")]
    ReadOnly,
    /// The data file's header reports version 1 and `read_only` was not set;
    /// the caller must run [`crate::migration::ensure_v2`] first.
    #[error("data file at {0} is v1; run migration before opening for writes")]
    MigrationRequired(PathBuf),
    /// The data file's header reports a version this crate does not understand.
    #[error("unsupported data file version {0}")]
    VersionUnsupported(u16),
    /// Error from the file lock subsystem.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    /// Error from the write-ahead log.
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    /// Error from the key index.
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    /// Error from the binary codec.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Error from the write batcher.
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),
    /// Error from the v1-to-v2 migrator.
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Internal invariant violation (poisoned lock, unreachable state).
    #[error("internal error: {0}")]
    Internal(String),
}
