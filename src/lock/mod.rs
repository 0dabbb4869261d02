//! File lock
//!
//! Cross-process mutual exclusion via atomic create-or-fail of a lock file. Only
//! one process may hold the write lock on a given database at a time; read-only
//! openers never acquire it.


use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

/// Interval between retries while the lock file is held by another process.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Errors returned while acquiring or releasing the write lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds the lock past the configured timeout.
    #[error("database locked: another process holds the write lock at {0}")]
    DatabaseLocked(PathBuf),
    /// The lock file could not be created due to filesystem permissions.
    #[error("cannot create lock file {path}: {source} — open in read-only mode or fix permissions")]
    LockPermission {
        /// The lock file path that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Underlying filesystem I/O error unrelated to permissions or contention.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A cross-process exclusive lock backed by atomic file creation.
///
/// `acquire` retries on `AlreadyExists` until `timeout` elapses; `release` removes
/// the lock file and is idempotent when the lock was never held.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    held: bool,
}

impl FileLock {
    /// Creates a lock handle for `path`. Does not touch the filesystem.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            held: false,
        }
    }

    /// Whether this handle currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Attempts to acquire the lock, retrying every 100ms until `timeout` elapses.
    ///
    /// On success, writes the current process id (ASCII, newline-terminated) into
    /// the lock file for diagnostics, then closes the descriptor. Permission or
    /// read-only-filesystem errors fail immediately rather than retrying, since no
    /// amount of waiting will resolve them.
    pub fn acquire(&mut self, timeout: Duration) -> Result<(), LockError> {
        if self.held {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    let pid = std::process::id();
                    write!(file, "{pid}\n")?;
                    file.sync_all()?;
                    self.held = true;
                    debug!(path = %self.path.display(), pid, "write lock acquired");
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        warn!(path = %self.path.display(), "write lock acquisition timed out");
                        return Err(LockError::DatabaseLocked(self.path.clone()));
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem
                    ) =>
                {
                    return Err(LockError::LockPermission {
                        path: self.path.clone(),
                        source: e,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Releases the lock by removing the lock file. A no-op if the lock was never
    /// acquired by this handle, or if the file is already gone.
    pub fn release(&mut self) -> Result<(), LockError> {
        if !self.held {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.held = false;
        debug!(path = %self.path.display(), "write lock released");
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if self.held {
            let _ = self.release();
        }
    }
}
