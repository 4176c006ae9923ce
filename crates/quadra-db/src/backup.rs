//! Point-in-time backups of a container.
//!
//! A backup is the active dataset serialized as N-Quads and gzip-compressed
//! into `<container>/Backups/backup_<timestamp>.nq.gz`. The snapshot is
//! taken inside one read transaction, so writers keep running.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use flate2::write::GzEncoder;
use flate2::Compression;
use quadra_common::config::BackupConfig;
use quadra_common::constants::{
    BACKUPS_DIR, BACKUP_BASENAME, BACKUP_EXT, BACKUP_TIMESTAMP_FORMAT,
};
use quadra_common::error::{QuadraError, QuadraResult};
use tracing::{debug, info, warn};

use crate::switchable::DatasetSwitchable;

// =============================================================================
// Clock
// =============================================================================

/// Source of backup timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current local time.
    fn now(&self) -> NaiveDateTime;
}

/// The system clock, in local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

// =============================================================================
// Unique files
// =============================================================================

/// Creates a new file `<basename>.<ext>` in `dir`.
///
/// If the name is taken, `<basename>_1.<ext>`, `<basename>_2.<ext>`, ... are
/// tried, up to `max_attempts` names in total. Any error other than an
/// existing file is returned at once.
pub fn open_unique_file(
    dir: &Path,
    basename: &str,
    ext: &str,
    max_attempts: u32,
) -> QuadraResult<(File, PathBuf)> {
    let mut attempt = 0u32;
    let mut path = dir.join(format!("{basename}.{ext}"));
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(QuadraError::TooManyAttempts {
                        base: dir.join(basename).display().to_string(),
                        attempts: attempt,
                    });
                }
                debug!(path = %path.display(), "file exists, trying next name");
                path = dir.join(format!("{basename}_{attempt}.{ext}"));
            }
            Err(e) => return Err(QuadraError::io_path(&path, e)),
        }
    }
}

// =============================================================================
// BackupWriter
// =============================================================================

/// Writes compressed N-Quads snapshots of containers.
#[derive(Debug, Clone)]
pub struct BackupWriter {
    clock: Arc<dyn Clock>,
    config: BackupConfig,
}

impl BackupWriter {
    /// Creates a writer using the system clock.
    pub fn new(config: BackupConfig) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Backs up the active dataset of `container` and returns the file path.
    ///
    /// Fails with `UnsupportedOperation` for in-memory containers.
    pub fn backup(&self, container: &DatasetSwitchable) -> QuadraResult<PathBuf> {
        let Some(container_path) = container.container_path() else {
            return Err(QuadraError::unsupported(format!(
                "backup of in-memory dataset {}",
                container.location()
            )));
        };

        let dir = container_path.join(BACKUPS_DIR);
        fs::create_dir_all(&dir).map_err(|e| QuadraError::io_path(&dir, e))?;

        let stamp = self.clock.now().format(BACKUP_TIMESTAMP_FORMAT);
        let basename = format!("{BACKUP_BASENAME}_{stamp}");
        let (file, path) =
            open_unique_file(&dir, &basename, BACKUP_EXT, self.config.max_attempts)?;

        match self.write_snapshot(container, file) {
            Ok(quads) => {
                info!(path = %path.display(), quads, "backup written");
                Ok(path)
            }
            Err(e) => {
                if let Err(remove) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %remove, "failed to remove partial backup");
                }
                Err(e)
            }
        }
    }

    fn write_snapshot(&self, container: &DatasetSwitchable, file: File) -> QuadraResult<u64> {
        let level = Compression::new(self.config.compression_level);
        let mut out = GzEncoder::new(BufWriter::new(file), level);

        let quads = container.execute_read(|txn| {
            let mut n = 0u64;
            for quad in txn.iter() {
                writeln!(out, "{quad}")?;
                n += 1;
            }
            Ok(n)
        })?;

        let file = out
            .finish()?
            .into_inner()
            .map_err(|e| QuadraError::from(e.into_error()))?;
        file.sync_all()?;
        Ok(quads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn instant() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap()
    }

    #[test]
    fn test_fixed_clock_format() {
        let clock = FixedClock(instant());
        let stamp = clock.now().format(BACKUP_TIMESTAMP_FORMAT).to_string();
        assert_eq!(stamp, "2024-03-09_140507");
    }

    #[test]
    fn test_open_unique_file_suffixes() {
        let tmp = TempDir::new().unwrap();
        let (_, first) = open_unique_file(tmp.path(), "backup", "nq.gz", 5).unwrap();
        let (_, second) = open_unique_file(tmp.path(), "backup", "nq.gz", 5).unwrap();
        let (_, third) = open_unique_file(tmp.path(), "backup", "nq.gz", 5).unwrap();

        assert_eq!(first.file_name().unwrap(), "backup.nq.gz");
        assert_eq!(second.file_name().unwrap(), "backup_1.nq.gz");
        assert_eq!(third.file_name().unwrap(), "backup_2.nq.gz");
    }

    #[test]
    fn test_open_unique_file_gives_up() {
        let tmp = TempDir::new().unwrap();
        for _ in 0..3 {
            open_unique_file(tmp.path(), "b", "x", 3).unwrap();
        }
        let err = open_unique_file(tmp.path(), "b", "x", 3).unwrap_err();
        assert!(matches!(err, QuadraError::TooManyAttempts { attempts: 3, .. }));
    }

    #[test]
    fn test_open_unique_file_missing_dir() {
        let tmp = TempDir::new().unwrap();
        let err = open_unique_file(&tmp.path().join("nope"), "b", "x", 5).unwrap_err();
        assert_eq!(err.io_kind(), Some(ErrorKind::NotFound));
    }
}
