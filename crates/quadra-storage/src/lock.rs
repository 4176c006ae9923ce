//! Process-level advisory locking of storage directories.
//!
//! A storage directory is owned by exactly one process. The owner holds an
//! exclusive advisory lock on the directory's lock file and writes its PID
//! into it for diagnostics. Inside the owning process a second attempt on the
//! same file also fails: the OS lock alone would be silently reentrant on
//! some platforms.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::OnceLock;

use fs2::FileExt;
use parking_lot::Mutex;
use quadra_common::error::{QuadraError, QuadraResult};
use tracing::{debug, warn};

/// Lock files held by this process.
fn held_locks() -> &'static Mutex<HashSet<PathBuf>> {
    static HELD: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    HELD.get_or_init(|| Mutex::new(HashSet::new()))
}

/// An exclusive, non-reentrant lock on one file.
///
/// Dropping a held lock releases it.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl ProcessLock {
    /// Creates an unheld lock handle for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    /// Creates a handle and takes the lock.
    pub fn acquire(path: impl Into<PathBuf>) -> QuadraResult<Self> {
        let lock = Self::new(path);
        lock.lock()?;
        Ok(lock)
    }

    /// Takes the lock, creating the lock file if absent.
    ///
    /// Fails with `LockHeld` if this handle, another handle in this process,
    /// or another process already holds it.
    pub fn lock(&self) -> QuadraResult<()> {
        let mut slot = self.file.lock();
        if slot.is_some() || !held_locks().lock().insert(self.path.clone()) {
            return Err(self.held_error());
        }

        match self.lock_file() {
            Ok(file) => {
                *slot = Some(file);
                debug!(path = %self.path.display(), "process lock acquired");
                Ok(())
            }
            Err(e) => {
                held_locks().lock().remove(&self.path);
                Err(e)
            }
        }
    }

    fn lock_file(&self) -> QuadraResult<File> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| QuadraError::io_path(&self.path, e))?;

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(self.held_error());
            }
            return Err(QuadraError::io_path(&self.path, e));
        }

        file.set_len(0)
            .and_then(|_| writeln!(file, "{}", process::id()))
            .and_then(|_| file.sync_data())
            .map_err(|e| QuadraError::io_path(&self.path, e))?;
        Ok(file)
    }

    /// Releases the lock. Releasing an unheld lock only logs a warning.
    pub fn release(&self) {
        let Some(file) = self.file.lock().take() else {
            warn!(path = %self.path.display(), "release of a process lock that is not held");
            return;
        };
        if let Err(e) = FileExt::unlock(&file) {
            warn!(path = %self.path.display(), error = %e, "failed to unlock lock file");
        }
        held_locks().lock().remove(&self.path);
        debug!(path = %self.path.display(), "process lock released");
    }

    /// Returns true while this handle holds the lock.
    pub fn is_locked(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Returns the lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the PID recorded in a lock file, if any.
    pub fn owner(path: &Path) -> Option<u32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    fn held_error(&self) -> QuadraError {
        QuadraError::LockHeld {
            path: self.path.clone(),
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if self.is_locked() {
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_writes_pid() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tdb.lock");

        let lock = ProcessLock::acquire(&path).unwrap();
        assert!(lock.is_locked());
        assert_eq!(ProcessLock::owner(&path), Some(process::id()));
    }

    #[test]
    fn test_not_reentrant() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tdb.lock");

        let lock = ProcessLock::acquire(&path).unwrap();
        let err = lock.lock().unwrap_err();
        assert!(matches!(err, QuadraError::LockHeld { .. }));

        let err = ProcessLock::acquire(&path).unwrap_err();
        assert!(matches!(err, QuadraError::LockHeld { .. }));
    }

    #[test]
    fn test_release_and_reacquire() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tdb.lock");

        let lock = ProcessLock::acquire(&path).unwrap();
        lock.release();
        assert!(!lock.is_locked());

        // Releasing again is harmless.
        lock.release();

        lock.lock().unwrap();
        assert!(lock.is_locked());
    }

    #[test]
    fn test_drop_releases() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tdb.lock");

        {
            let _lock = ProcessLock::acquire(&path).unwrap();
        }
        let again = ProcessLock::acquire(&path).unwrap();
        assert!(again.is_locked());
    }

    #[test]
    fn test_stale_lock_file_is_reused() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tdb.lock");
        fs::write(&path, "99999999\nleftover").unwrap();

        let _lock = ProcessLock::acquire(&path).unwrap();
        assert_eq!(ProcessLock::owner(&path), Some(process::id()));
    }
}
