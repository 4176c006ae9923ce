//! Database configuration structures.
//!
//! These structures define the container-level behaviour of a Quadra
//! database: how compaction swaps generations and how backups are written.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_UNIQUE_NAME_ATTEMPTS;
use crate::error::{QuadraError, QuadraResult};

/// Main database configuration.
///
/// # Example
///
/// ```rust
/// use quadra_common::config::{CompactionStrategyKind, DatabaseConfig};
///
/// let config = DatabaseConfig::default();
/// assert_eq!(config.compaction.strategy, CompactionStrategyKind::Auto);
/// assert_eq!(config.backup.max_attempts, 5);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Compaction configuration.
    pub compaction: CompactionConfig,

    /// Backup configuration.
    pub backup: BackupConfig,
}

impl DatabaseConfig {
    /// Sets the compaction strategy.
    #[must_use]
    pub fn with_compaction_strategy(mut self, strategy: CompactionStrategyKind) -> Self {
        self.compaction.strategy = strategy;
        self
    }

    /// Sets the number of names tried when allocating a backup file.
    #[must_use]
    pub fn with_backup_attempts(mut self, max_attempts: u32) -> Self {
        self.backup.max_attempts = max_attempts;
        self
    }

    /// Sets the gzip compression level of backups.
    #[must_use]
    pub fn with_backup_compression(mut self, level: u32) -> Self {
        self.backup.compression_level = level;
        self
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> QuadraResult<()> {
        self.backup.validate()
    }
}

/// How the generation swap is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStrategyKind {
    /// Pick by host platform.
    #[default]
    Auto,
    /// Copy into a staging directory, then rename it into place.
    Rename,
    /// Copy straight into the final directory and defer deletions.
    InPlace,
}

impl CompactionStrategyKind {
    /// Resolves `Auto` against the host platform.
    #[must_use]
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto if cfg!(windows) => Self::InPlace,
            Self::Auto => Self::Rename,
            other => other,
        }
    }
}

/// Compaction configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Swap strategy.
    /// Default: `Auto`
    pub strategy: CompactionStrategyKind,
}

/// Backup configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Names tried before giving up on a unique backup file.
    /// Default: 5
    pub max_attempts: u32,

    /// Gzip compression level (0-9).
    /// Default: 6
    pub compression_level: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_UNIQUE_NAME_ATTEMPTS,
            compression_level: 6,
        }
    }
}

impl BackupConfig {
    /// Validates the backup settings.
    pub fn validate(&self) -> QuadraResult<()> {
        if self.max_attempts == 0 {
            return Err(QuadraError::invalid_config(
                "backup.max_attempts must be at least 1",
            ));
        }
        if self.compression_level > 9 {
            return Err(QuadraError::invalid_config(
                "backup.compression_level must be between 0 and 9",
            ));
        }
        Ok(())
    }
}
