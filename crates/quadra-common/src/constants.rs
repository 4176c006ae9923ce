//! On-disk names shared by every Quadra layer.
//!
//! The directory layout is a compatibility surface with existing databases:
//! changing any of these values makes older data directories unreadable.

// =============================================================================
// Container Layout
// =============================================================================

/// Base name of a generation directory (`Data-0001`, `Data-0002`, ...).
pub const GENERATION_BASE: &str = "Data";

/// Separator between the base name and the generation index.
pub const GENERATION_SEP: &str = "-";

/// Index of the first generation of a new container.
pub const FIRST_GENERATION: u64 = 1;

/// Minimum number of digits in a generation index.
pub const GENERATION_INDEX_WIDTH: usize = 4;

/// Suffix of a staging directory used by rename-based compaction.
pub const STAGING_SUFFIX: &str = "-tmp";

/// Directory, under the container, that holds backups.
pub const BACKUPS_DIR: &str = "Backups";

/// Basename of backup files: `backup_<timestamp>.nq.gz`.
pub const BACKUP_BASENAME: &str = "backup";

/// Extension of backup files.
pub const BACKUP_EXT: &str = "nq.gz";

/// Timestamp format used in backup file names.
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// Work-in-progress marker: paths to delete on the next startup, one per line.
pub const INCOMPLETE_WIP: &str = "jena-tdb-temp-files";

// =============================================================================
// Generation Contents
// =============================================================================

/// Advisory process lock file.
pub const LOCK_FILE: &str = "tdb.lock";

/// Persisted `StoreParams`.
pub const CONFIG_FILE: &str = "tdb.cfg";

/// Extension of optimizer settings files carried across compactions.
pub const OPTIMIZER_EXT: &str = "opt";

/// Engine data file.
pub const DATA_FILE: &str = "quads.json";

/// Temporary name used while the data file is rewritten.
pub const DATA_FILE_TMP: &str = "quads.json.tmp";

// =============================================================================
// Limits
// =============================================================================

/// Attempts made to allocate a unique backup file name.
pub const DEFAULT_UNIQUE_NAME_ATTEMPTS: u32 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_names() {
        assert_eq!(format!("{GENERATION_BASE}{GENERATION_SEP}0001"), "Data-0001");
        assert!(STAGING_SUFFIX.starts_with(GENERATION_SEP));
        assert_ne!(DATA_FILE, DATA_FILE_TMP);
        assert!(DEFAULT_UNIQUE_NAME_ATTEMPTS > 0);
    }
}
