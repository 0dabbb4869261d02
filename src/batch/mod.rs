//! Write batcher
//!
//! Amortizes fsync overhead by coalescing concurrent writes into one data-file
//! append and one WAL append per flush. When disabled, the engine writes
//! directly (see [`crate::engine::Writer::Direct`]); when enabled, every write
//! is queued here instead.
//!
//! A single background thread owns flushing. Callers ([`WriteBatcher::enqueue`])
//! only ever push a [`PendingWrite`] and block on its [`Completion`] — this
//! keeps flush decisions (threshold vs. delay) in one place and avoids two
//! threads racing to flush the same queue.


use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::codec::{self, WalEntry, HEADER_SIZE};
use crate::index::{KeyIndex, RecordLocation};
use crate::wal::{Wal, WalError};

/// Errors returned by the write batcher.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Underlying filesystem I/O error encountered during a flush.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Error appending the batch's WAL entries.
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    /// A write was enqueued after [`WriteBatcher::close`] was called.
    #[error("write batcher is closed")]
    Closed,
    /// A prior flush in this batch failed; this write shares that failure.
    #[error("batched write failed: {0}")]
    Propagated(String),
    /// Internal invariant violation (poisoned lock).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Thresholds controlling when a pending batch is flushed.
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Flush once this many writes are queued.
    pub max_batch_size: usize,
    /// Flush once this many bytes of serialized data records are queued.
    pub max_batch_bytes: usize,
    /// Flush this long after the first write lands in an empty queue, even if
    /// no threshold has been met.
    pub max_batch_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_batch_bytes: 1024 * 1024,
            max_batch_delay: Duration::from_millis(10),
        }
    }
}

/// Shared completion handle a caller blocks on after [`WriteBatcher::enqueue`].
pub struct Completion {
    state: Mutex<Option<Result<(), String>>>,
    cv: Condvar,
}

impl Completion {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(None),
            cv: Condvar::new(),
        })
    }

    fn complete(&self, result: Result<(), String>) {
        let mut state = self.state.lock().expect("completion mutex poisoned");
        *state = Some(result);
        self.cv.notify_all();
    }

    /// Blocks until this write's batch has been flushed (or failed).
    pub fn wait(&self) -> Result<(), BatchError> {
        let mut state = self.state.lock().expect("completion mutex poisoned");
        while state.is_none() {
            state = self.cv.wait(state).expect("completion mutex poisoned");
        }
        match state.take().expect("checked above") {
            Ok(()) => Ok(()),
            Err(msg) => Err(BatchError::Propagated(msg)),
        }
    }
}

/// A single queued write awaiting the next flush.
struct PendingWrite {
    record_bytes: Vec<u8>,
    offset: u64,
    wal_entry: WalEntry,
    key: String,
    op: crate::codec::OpType,
    completion: Arc<Completion>,
}

struct BatcherState {
    queue: Vec<PendingWrite>,
    queued_bytes: usize,
    /// Monotonic projection of the data file's size, advanced as offsets are
    /// reserved. Drives [`WriteBatcher::reserve_offset`] independent of when
    /// those bytes are actually flushed to disk.
    projected_file_size: u64,
    /// Set when the first write lands in an empty queue; cleared on flush.
    deadline: Option<Instant>,
}

/// Coalesces queued writes into batched data-file and WAL appends.
pub struct WriteBatcher {
    config: BatchConfig,
    wal: Arc<Wal>,
    index: Arc<KeyIndex>,
    data_file: Arc<File>,
    state: Mutex<BatcherState>,
    cv: Condvar,
    flush_mutex: Mutex<()>,
    header_written: AtomicBool,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

fn should_flush_now(state: &BatcherState, config: &BatchConfig) -> bool {
    state.queue.len() >= config.max_batch_size || state.queued_bytes >= config.max_batch_bytes
}

impl WriteBatcher {
    /// Creates a batcher over `data_file`/`wal`/`index`, starting a background
    /// flush thread. `initial_file_size` is the data file's current on-disk
    /// length (0 for a brand-new file, whose header has not been written yet).
    pub fn new(
        config: BatchConfig,
        data_file: Arc<File>,
        wal: Arc<Wal>,
        index: Arc<KeyIndex>,
        initial_file_size: u64,
    ) -> Arc<Self> {
        let batcher = Arc::new(Self {
            config,
            wal,
            index,
            data_file,
            state: Mutex::new(BatcherState {
                queue: Vec::new(),
                queued_bytes: 0,
                projected_file_size: initial_file_size,
                deadline: None,
            }),
            cv: Condvar::new(),
            flush_mutex: Mutex::new(()),
            header_written: AtomicBool::new(initial_file_size > 0),
            closed: AtomicBool::new(false),
            worker: Mutex::new(None),
        });

        let worker_handle = {
            let batcher = Arc::clone(&batcher);
            thread::Builder::new()
                .name("raptordb-batch-flush".into())
                .spawn(move || batcher.run_worker())
                .expect("failed to spawn batch flush thread")
        };
        *batcher.worker.lock().expect("worker mutex poisoned") = Some(worker_handle);
        batcher
    }

    /// Reserves `len` bytes at the next available data-file offset, advancing
    /// the projected file size. If nothing has been queued or flushed yet, the
    /// first reservation starts at [`HEADER_SIZE`] to leave room for the header.
    ///
    /// Must be called while holding the engine's write mutex so reservations
    /// and WAL ordering agree.
    pub fn reserve_offset(&self, len: usize) -> u64 {
        let mut state = self.state.lock().expect("batcher state poisoned");
        if state.projected_file_size == 0 {
            state.projected_file_size = HEADER_SIZE as u64;
        }
        let offset = state.projected_file_size;
        state.projected_file_size += len as u64;
        offset
    }

    /// Queues `record_bytes` (already serialized at `wal_entry.offset`) for the
    /// next flush. Returns a [`Completion`] the caller should block on to learn
    /// whether the write was committed.
    pub fn enqueue(
        &self,
        record_bytes: Vec<u8>,
        wal_entry: WalEntry,
        key: String,
        op: crate::codec::OpType,
    ) -> Result<Arc<Completion>, BatchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BatchError::Closed);
        }
        let completion = Completion::new();
        let mut state = self.state.lock().expect("batcher state poisoned");
        state.queued_bytes += record_bytes.len();
        let offset = wal_entry.offset;
        state.queue.push(PendingWrite {
            record_bytes,
            offset,
            wal_entry,
            key,
            op,
            completion: Arc::clone(&completion),
        });
        if state.deadline.is_none() {
            state.deadline = Some(Instant::now() + self.config.max_batch_delay);
        }
        drop(state);
        self.cv.notify_all();
        Ok(completion)
    }

    fn run_worker(self: Arc<Self>) {
        loop {
            let mut state = self.state.lock().expect("batcher state poisoned");
            loop {
                if self.closed.load(Ordering::SeqCst) && state.queue.is_empty() {
                    return;
                }
                if state.queue.is_empty() {
                    state = self.cv.wait(state).expect("batcher state poisoned");
                    continue;
                }
                if should_flush_now(&state, &self.config) {
                    break;
                }
                let deadline = state.deadline.expect("non-empty queue always has a deadline");
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (next_state, _timeout) = self
                    .cv
                    .wait_timeout(state, deadline - now)
                    .expect("batcher state poisoned");
                state = next_state;
            }
            drop(state);
            let _ = self.drain_and_flush();
        }
    }

    /// Drains whatever is currently queued and performs one flush. A no-op
    /// (returns `Ok(())` immediately) if nothing is queued.
    fn drain_and_flush(&self) -> Result<(), BatchError> {
        let _flush_guard = self.flush_mutex.lock().expect("flush mutex poisoned");
        let pending = {
            let mut state = self.state.lock().expect("batcher state poisoned");
            state.deadline = None;
            state.queued_bytes = 0;
            std::mem::take(&mut state.queue)
        };
        if pending.is_empty() {
            return Ok(());
        }
        let count = pending.len();
        let result = self.flush_pending(&pending);
        match &result {
            Ok(()) => {
                for p in &pending {
                    p.completion.complete(Ok(()));
                }
                trace!(count, "batch flushed");
            }
            Err(e) => {
                let msg = e.to_string();
                warn!(count, error = %msg, "batch flush failed; failing all pending writes");
                for p in &pending {
                    p.completion.complete(Err(msg.clone()));
                }
            }
        }
        result
    }

    fn flush_pending(&self, pending: &[PendingWrite]) -> Result<(), BatchError> {
        let first_offset = pending[0].offset;

        let mut buf = Vec::new();
        if !self.header_written.load(Ordering::SeqCst) {
            let dimension = Self::dimension_of(&pending[0].record_bytes);
            buf.extend_from_slice(&codec::serialize_header(dimension));
        }
        for p in pending {
            buf.extend_from_slice(&p.record_bytes);
        }

        let write_at = if self.header_written.load(Ordering::SeqCst) {
            first_offset
        } else {
            0
        };
        self.data_file.write_all_at(&buf, write_at)?;
        self.data_file.sync_all()?;
        self.header_written.store(true, Ordering::SeqCst);

        let entries: Vec<WalEntry> = pending.iter().map(|p| p.wal_entry).collect();
        self.wal.append_batch(&entries)?;

        for p in pending {
            self.index.apply(
                &p.key,
                RecordLocation {
                    offset: p.offset,
                    length: p.record_bytes.len() as u32,
                    sequence: p.wal_entry.sequence,
                },
                p.op,
            );
        }
        Ok(())
    }

    /// Extracts the `dimension` field from an already-serialized data record,
    /// so the very first flush of a fresh database can emit a matching header
    /// without re-threading the dimension through every call site.
    fn dimension_of(record_bytes: &[u8]) -> u32 {
        // keyLen lives at byte 24 (see crate::codec); dimension follows the key.
        let key_len = u16::from_le_bytes([record_bytes[24], record_bytes[25]]) as usize;
        let dim_offset = 26 + key_len;
        u32::from_le_bytes(
            record_bytes[dim_offset..dim_offset + 4]
                .try_into()
                .expect("record_bytes already validated by the codec at serialize time"),
        )
    }

    /// Forces an immediate flush of whatever is currently queued, blocking
    /// until it completes. A no-op if nothing is queued.
    pub fn flush(&self) -> Result<(), BatchError> {
        self.drain_and_flush()
    }

    /// Flushes any remaining queue once, then marks the batcher closed so
    /// subsequent `enqueue` calls fail. Idempotent.
    pub fn close(&self) -> Result<(), BatchError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cv.notify_all();
        let result = self.drain_and_flush();
        if let Some(handle) = self.worker.lock().expect("worker mutex poisoned").take() {
            self.cv.notify_all();
            let _ = handle.join();
        }
        debug!("write batcher closed");
        result
    }
}
