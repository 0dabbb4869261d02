//! # raptordb
//!
//! An embedded, single-process, crash-consistent key-value store for
//! fixed-dimension float32 embeddings.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                            Engine                             │
//! │  ┌───────────┐   ┌──────────────┐   ┌────────────┐            │
//! │  │ Write      │   │ Write        │   │ Key index   │          │
//! │  │ mutex      │──▶│ batcher /    │──▶│ (rebuilt    │          │
//! │  │ (FIFO)     │   │ direct write │   │ from WAL)   │          │
//! │  └───────────┘   └──────┬───────┘   └─────┬───────┘          │
//! │                         │                  │                  │
//! │                   ┌─────▼─────┐      ┌─────▼─────┐            │
//! │                   │ Data file  │      │    WAL     │           │
//! │                   │ (.raptor)  │      │(.raptor-wal)│          │
//! │                   └───────────┘      └────────────┘           │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐   │
//! │  │  File lock (.raptor.lock) — cross-process mutual excl.  │  │
//! │  └────────────────────────────────────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | The storage engine — open, write, read, delete, flush, close, recovery |
//! | [`codec`] | Binary encode/decode for the data file header, data records, and WAL entries |
//! | [`wal`] | Fixed-size, CRC-protected write-ahead log with crash-safe recovery |
//! | [`index`] | In-memory key → location map, rebuilt from the WAL at open |
//! | [`lock`] | Cross-process exclusive write lock via atomic file creation |
//! | [`sync_primitives`] | A FIFO write mutex serializing in-process writers |
//! | [`batch`] | The write batcher: coalesces concurrent writes into one fsync pair |
//! | [`migration`] | Forward migration from the legacy v1 on-disk format |
//! | [`topn`] | Fixed-capacity min-heap for the brute-force search driver's top-N results |
//! | [`error`] | The top-level [`error::EngineError`] every public operation returns |
//!
//! ## Key properties
//!
//! - **Write-ahead logging** — every mutation is durable only once its WAL
//!   entry has been fsynced; that fsync is the commit point.
//! - **Crash recovery** — the key index is rebuilt by replaying the WAL
//!   against the data file at every open; WAL corruption past a crash point
//!   stops recovery at the first bad entry rather than skipping it.
//! - **Single-writer guarantee** — a FIFO in-process mutex plus a
//!   cross-process file lock ensure writes commit in the order they were
//!   issued.
//! - **Lazy write-lock acquisition** — read-only openers never touch the
//!   lock file; a writer acquires it once, on its first mutation.
//! - **Write batching** — optional coalescing of concurrent writes into one
//!   data-file append, one WAL append, and two fsyncs per flush.
//! - **Forward migration** — a one-shot v1 → v2 rewrite with an automatic
//!   `.v1.backup` safety copy.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use raptordb::engine::{Engine, EngineOptions};
//!
//! let mut options = EngineOptions::new("/tmp/my_vectors");
//! options.dimension = 4;
//! let engine = Engine::open(options).unwrap();
//!
//! engine.write_record("a", &[0.25, -0.5, 1.0, 0.0]).unwrap();
//! assert_eq!(
//!     engine.read_record("a").unwrap().embedding,
//!     vec![0.25, -0.5, 1.0, 0.0]
//! );
//!
//! engine.delete_record("a").unwrap();
//! assert!(!engine.has_key("a"));
//!
//! engine.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod batch;
pub mod codec;
pub mod engine;
pub mod error;
pub mod index;
pub mod lock;
pub mod migration;
pub mod sync_primitives;
pub mod topn;
pub mod wal;

pub use engine::{Engine, EngineOptions};
pub use error::EngineError;
