//! Storage engine
//!
//! Orchestrates every other component into the public contract described in
//! the top-level crate documentation: open, write, read, delete, close,
//! crash recovery, and lazy write-lock acquisition.
//!
//! The engine holds either a direct writer or a [`WriteBatcher`] as a tagged
//! [`Writer`] variant — no per-write branch on a runtime flag, and no trait
//! object. Batching is a configuration choice fixed for the engine's lifetime.


use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::batch::{BatchConfig, WriteBatcher};
use crate::codec::{self, DataRecord, OpType, WalEntry, DATA_RECORD_VERSION, HEADER_SIZE, LEGACY_VERSION};
use crate::error::EngineError;
use crate::index::{self, KeyIndex, RecordLocation};
use crate::lock::FileLock;
use crate::sync_primitives::TicketMutex;
use crate::wal::Wal;

/// Default embedding dimension when [`EngineOptions`] does not override it.
pub const DEFAULT_DIMENSION: u32 = 384;
/// Default write-lock acquisition timeout.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Configuration accepted by [`Engine::open`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Logical base path; the `.raptor`/`.raptor-wal`/`.raptor.lock` suffixes
    /// are resolved from it. A path already ending in `.raptor` has that
    /// suffix stripped before resolution.
    pub data_path: PathBuf,
    /// Fixed embedding dimension for every record in this database.
    pub dimension: u32,
    /// How long [`Engine::write_record`]'s first call waits to acquire the
    /// cross-process write lock before failing.
    pub lock_timeout: Duration,
    /// Whether writes route through a [`WriteBatcher`] instead of fsyncing
    /// individually.
    pub batching_enabled: bool,
    /// Batcher thresholds, used only when `batching_enabled` is set.
    pub batch_config: BatchConfig,
    /// Opens the database without ever acquiring the write lock; mutating
    /// calls fail with [`EngineError::ReadOnly`].
    pub read_only: bool,
}

impl EngineOptions {
    /// Options with the documented defaults for everything but `data_path`.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            dimension: DEFAULT_DIMENSION,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            batching_enabled: true,
            batch_config: BatchConfig::default(),
            read_only: false,
        }
    }
}

/// Strips a trailing `.raptor` extension from `data_path`, if present.
fn resolve_base(data_path: &Path) -> PathBuf {
    if data_path.extension().is_some_and(|ext| ext == "raptor") {
        data_path.with_extension("")
    } else {
        data_path.to_path_buf()
    }
}

/// Derives the three sibling file paths for a logical base path.
fn resolve_paths(base: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let base_str = base.to_string_lossy();
    (
        PathBuf::from(format!("{base_str}.raptor")),
        PathBuf::from(format!("{base_str}.raptor-wal")),
        PathBuf::from(format!("{base_str}.raptor.lock")),
    )
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as i64
}

/// Either writer shape an open engine holds, selected once at
/// [`Engine::open`] and fixed for the engine's lifetime.
enum Writer {
    /// Every write fsyncs the data file and the WAL individually.
    Direct {
        header_written: AtomicBool,
        next_offset: AtomicU64,
    },
    /// Writes are queued and flushed in batches by a background thread.
    Batched(Arc<WriteBatcher>),
}

struct EngineInner {
    data_path: PathBuf,
    dimension: u32,
    read_only: bool,
    lock_timeout: Duration,
    data_file: Arc<File>,
    wal: Arc<Wal>,
    index: Arc<KeyIndex>,
    sequence_counter: AtomicI64,
    lock: Mutex<FileLock>,
    lock_acquired: AtomicBool,
    write_mutex: TicketMutex,
    writer: Option<Writer>,
    closed: AtomicBool,
}

/// A single open handle onto a v2 embedding database.
///
/// Cheaply `Clone`-able (an `Arc` around the shared state); every clone refers
/// to the same underlying files, lock, and index.
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Engine {
    /// Opens (creating if necessary, unless `read_only`) the database described
    /// by `options`.
    ///
    /// Builds the in-memory key index by replaying the WAL; does **not**
    /// acquire the cross-process write lock (see [`Engine::write_record`]).
    pub fn open(options: EngineOptions) -> Result<Self, EngineError> {
        let base = resolve_base(&options.data_path);
        let (data_path, wal_path, lock_path) = resolve_paths(&base);

        if options.read_only {
            if !data_path.exists() && !wal_path.exists() {
                return Err(EngineError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no database found at {}", base.display()),
                )));
            }
        } else if let Some(parent) = base.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let header_exists = fs::metadata(&data_path).map(|m| m.len() >= HEADER_SIZE as u64).unwrap_or(false);
        if header_exists {
            let header_bytes = fs::read(&data_path)?;
            let header = codec::deserialize_header(&header_bytes[..HEADER_SIZE])?;
            if header.version == LEGACY_VERSION {
                return Err(EngineError::MigrationRequired(data_path));
            }
            if header.version != DATA_RECORD_VERSION {
                return Err(EngineError::VersionUnsupported(header.version));
            }
        }

        let wal_entries = Wal::recover(&wal_path)?;
        let committed_size = wal_entries
            .iter()
            .map(|e| e.offset + u64::from(e.length))
            .max()
            .unwrap_or(0);
        let (index, max_sequence) = index::build_from_wal(&wal_entries, &data_path)?;
        info!(
            path = %data_path.display(),
            recovered_keys = index.count(),
            max_sequence,
            "engine opened"
        );

        let data_file = Arc::new(
            OpenOptions::new()
                .create(!options.read_only)
                .read(true)
                .write(!options.read_only)
                .open(&data_path)?,
        );

        // Deliberately not `data_file.metadata()?.len()`: a prior crash may
        // have left orphaned tail bytes past the last committed WAL entry,
        // and anchoring the next offset on the raw file length would skip
        // past — and permanently waste — that space only by accident.
        // Anchoring on the WAL-committed size means the next write lands
        // exactly where the orphan begins.
        let initial_file_size = if header_exists {
            committed_size.max(HEADER_SIZE as u64)
        } else {
            0
        };

        let wal = Arc::new(Wal::open(&wal_path)?);
        let index = Arc::new(index);

        let writer = if options.read_only {
            None
        } else if options.batching_enabled {
            Some(Writer::Batched(WriteBatcher::new(
                options.batch_config,
                Arc::clone(&data_file),
                Arc::clone(&wal),
                Arc::clone(&index),
                initial_file_size,
            )))
        } else {
            Some(Writer::Direct {
                header_written: AtomicBool::new(initial_file_size > 0),
                next_offset: AtomicU64::new(initial_file_size.max(HEADER_SIZE as u64)),
            })
        };

        Ok(Self {
            inner: Arc::new(EngineInner {
                data_path,
                dimension: options.dimension,
                read_only: options.read_only,
                lock_timeout: options.lock_timeout,
                data_file,
                wal,
                index,
                sequence_counter: AtomicI64::new(max_sequence + 1),
                lock: Mutex::new(FileLock::new(&lock_path)),
                lock_acquired: AtomicBool::new(false),
                write_mutex: TicketMutex::new(),
                writer,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Acquires the cross-process write lock on the first mutating call.
    /// Concurrent first writers share this attempt: whichever thread gets the
    /// internal lock mutex first performs the (possibly slow) acquisition,
    /// and every other thread observes `lock_acquired` already set once it is
    /// their turn.
    fn ensure_lock_acquired(&self) -> Result<(), EngineError> {
        if self.inner.lock_acquired.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut lock = self.inner.lock.lock().expect("lock mutex poisoned");
        if self.inner.lock_acquired.load(Ordering::SeqCst) {
            return Ok(());
        }
        lock.acquire(self.inner.lock_timeout)?;
        self.inner.lock_acquired.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn direct_offset(header_written: &AtomicBool, next_offset: &AtomicU64, data_file: &File, dimension: u32, len: usize) -> Result<u64, EngineError> {
        if !header_written.load(Ordering::SeqCst) {
            let header = codec::serialize_header(dimension);
            data_file.write_all_at(&header, 0)?;
            header_written.store(true, Ordering::SeqCst);
        }
        Ok(next_offset.fetch_add(len as u64, Ordering::SeqCst))
    }

    /// Shared write path for inserts, updates, and deletes: assigns a
    /// sequence number and timestamp, serializes the record, and commits it
    /// through whichever writer this engine was opened with. Returns only
    /// after the WAL fsync that makes the write durable.
    fn write_internal(&self, key: &str, embedding: &[f32], op: OpType) -> Result<(), EngineError> {
        if self.inner.read_only {
            return Err(EngineError::ReadOnly);
        }
        if embedding.len() as u32 != self.inner.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.inner.dimension,
                actual: embedding.len(),
            });
        }
        self.ensure_lock_acquired()?;

        let guard = self.inner.write_mutex.lock();
        let sequence = self.inner.sequence_counter.fetch_add(1, Ordering::SeqCst);
        let timestamp = now_millis();
        let record = DataRecord {
            op,
            sequence,
            timestamp,
            key: key.to_string(),
            dimension: self.inner.dimension,
            embedding: embedding.to_vec(),
        };
        let bytes = codec::serialize_data_record(&record);
        let key_hash = codec::hash_key(key);

        match self
            .inner
            .writer
            .as_ref()
            .expect("writer is Some for a non-read-only engine")
        {
            Writer::Batched(batcher) => {
                let offset = batcher.reserve_offset(bytes.len());
                let entry = WalEntry {
                    op,
                    sequence,
                    offset,
                    length: bytes.len() as u32,
                    key_hash,
                };
                let completion = batcher.enqueue(bytes, entry, key.to_string(), op)?;
                // Ordering between writers only depends on the reservation and
                // enqueue above having happened under the write mutex; waiting
                // for the flush can safely happen after releasing it so other
                // queued writers aren't blocked behind this one's fsync.
                drop(guard);
                completion.wait()?;
            }
            Writer::Direct {
                header_written,
                next_offset,
            } => {
                let offset = Self::direct_offset(header_written, next_offset, &self.inner.data_file, self.inner.dimension, bytes.len())?;
                self.inner.data_file.write_all_at(&bytes, offset)?;
                self.inner.data_file.sync_all()?;
                let entry = WalEntry {
                    op,
                    sequence,
                    offset,
                    length: bytes.len() as u32,
                    key_hash,
                };
                self.inner.wal.append(&entry)?;
                self.inner.index.apply(
                    key,
                    RecordLocation {
                        offset,
                        length: bytes.len() as u32,
                        sequence,
                    },
                    op,
                );
                drop(guard);
            }
        }
        Ok(())
    }

    /// Writes `key` → `embedding`. The op type (insert vs. update) is derived
    /// from whether `key` is currently present in the index.
    pub fn write_record(&self, key: &str, embedding: &[f32]) -> Result<(), EngineError> {
        let op = if self.inner.index.has(key) { OpType::Update } else { OpType::Insert };
        self.write_internal(key, embedding, op)
    }

    /// Looks up `key` and returns its currently committed record, or `None`
    /// if absent or if the stored bytes fail codec validation — a read never
    /// surfaces a record it cannot verify as intact.
    pub fn read_record(&self, key: &str) -> Option<DataRecord> {
        let loc = self.inner.index.get(key)?;
        let mut buf = vec![0u8; loc.length as usize];
        if self.inner.data_file.read_exact_at(&mut buf, loc.offset).is_err() {
            return None;
        }
        match codec::deserialize_data_record(&buf, 0) {
            Ok((record, _)) => Some(record),
            Err(e) => {
                warn!(key = %key, error = %e, "read_record: stored bytes failed validation");
                None
            }
        }
    }

    /// Deletes `key` by writing a tombstone record (a zero vector of the
    /// database's dimension) through the normal write path. Returns `false`
    /// without writing anything if `key` was already absent.
    pub fn delete_record(&self, key: &str) -> Result<bool, EngineError> {
        if !self.inner.index.has(key) {
            return Ok(false);
        }
        let zero = vec![0.0f32; self.inner.dimension as usize];
        self.write_internal(key, &zero, OpType::Delete)?;
        Ok(true)
    }

    /// Whether `key` currently has a live (non-deleted) entry.
    pub fn has_key(&self, key: &str) -> bool {
        self.inner.index.has(key)
    }

    /// All live keys, in unspecified order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.index.keys()
    }

    /// All `(key, location)` pairs currently live, in unspecified order —
    /// the interface the brute-force search driver (an external
    /// collaborator) iterates to score every stored embedding.
    pub fn locations(&self) -> Vec<(String, RecordLocation)> {
        self.inner.index.locations()
    }

    /// Number of live keys.
    pub fn count(&self) -> usize {
        self.inner.index.count()
    }

    /// Reads just the embedding at `offset`, skipping the record's key and
    /// per-record dimension field, for callers that already have a
    /// [`RecordLocation`] from [`Engine::locations`] and don't need the full
    /// decoded [`DataRecord`].
    pub fn read_embedding_at(&self, offset: u64) -> Option<Vec<f32>> {
        let mut prefix = [0u8; 28];
        self.inner.data_file.read_exact_at(&mut prefix, offset).ok()?;
        let key_len = u16::from_le_bytes([prefix[24], prefix[25]]) as u64;
        let embedding_offset = offset + 26 + key_len + 4;

        let dim = self.inner.dimension as usize;
        let mut embedding_bytes = vec![0u8; dim * 4];
        self.inner.data_file.read_exact_at(&mut embedding_bytes, embedding_offset).ok()?;

        let mut embedding = Vec::with_capacity(dim);
        for i in 0..dim {
            embedding.push(f32::from_le_bytes(embedding_bytes[i * 4..i * 4 + 4].try_into().ok()?));
        }
        Some(embedding)
    }

    /// Blocks until any pending batched writes are flushed. A no-op when
    /// batching is disabled or the engine is read-only.
    pub fn flush(&self) -> Result<(), EngineError> {
        if let Some(Writer::Batched(batcher)) = &self.inner.writer {
            batcher.flush()?;
        }
        Ok(())
    }

    /// Flushes any pending writes, closes the data file, and releases the
    /// write lock if this engine ever acquired it. Idempotent.
    pub fn close(&self) -> Result<(), EngineError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(Writer::Batched(batcher)) = &self.inner.writer {
            batcher.close()?;
        }
        if self.inner.lock_acquired.load(Ordering::SeqCst) {
            self.inner.lock.lock().expect("lock mutex poisoned").release()?;
        }
        debug!(path = %self.inner.data_path.display(), "engine closed");
        Ok(())
    }

    /// Whether this engine instance currently holds the cross-process write lock.
    pub fn has_write_lock(&self) -> bool {
        self.inner.lock_acquired.load(Ordering::SeqCst)
    }

    /// Whether this engine was opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// The database's fixed embedding dimension.
    pub fn get_dimension(&self) -> u32 {
        self.inner.dimension
    }
}
