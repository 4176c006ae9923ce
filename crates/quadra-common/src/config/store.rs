//! Storage engine parameters.
//!
//! Parameters are fixed when a store is created. A `tdb.cfg` file in a
//! generation directory (or in the container directory) records them as JSON
//! and wins over anything a caller passes later.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::CONFIG_FILE;
use crate::error::{QuadraError, QuadraResult};

/// How the engine accesses its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    /// Memory-mapped files. Open maps keep the directory busy on Windows.
    Mapped,
    /// Plain buffered reads and writes.
    Direct,
}

/// Engine settings for one store.
///
/// # Example
///
/// ```rust
/// use quadra_common::config::{FileMode, StoreParams};
///
/// let params = StoreParams::default()
///     .with_file_mode(FileMode::Direct)
///     .with_sync_on_commit(false);
/// assert!(params.validate().is_ok());
/// assert!(!params.is_default());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreParams {
    /// File access mode.
    /// Default: `Mapped`
    pub file_mode: FileMode,

    /// Block size in bytes. Must be a power of 2.
    /// Default: 8192 (8 KB)
    pub block_size: u32,

    /// Number of nodes held in the node cache.
    /// Default: 100000
    pub node_cache_size: usize,

    /// Flush the data file to disk on every write commit.
    /// Default: true
    pub sync_on_commit: bool,
}

impl Default for StoreParams {
    fn default() -> Self {
        Self {
            file_mode: FileMode::Mapped,
            block_size: 8192,
            node_cache_size: 100_000,
            sync_on_commit: true,
        }
    }
}

impl StoreParams {
    /// Parameters used for in-memory stores.
    #[must_use]
    pub fn memory_default() -> Self {
        Self {
            file_mode: FileMode::Direct,
            sync_on_commit: false,
            ..Default::default()
        }
    }

    /// Sets the file mode.
    #[must_use]
    pub fn with_file_mode(mut self, file_mode: FileMode) -> Self {
        self.file_mode = file_mode;
        self
    }

    /// Sets the block size.
    #[must_use]
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the node cache size.
    #[must_use]
    pub fn with_node_cache_size(mut self, node_cache_size: usize) -> Self {
        self.node_cache_size = node_cache_size;
        self
    }

    /// Sets commit durability.
    #[must_use]
    pub fn with_sync_on_commit(mut self, sync_on_commit: bool) -> Self {
        self.sync_on_commit = sync_on_commit;
        self
    }

    /// Returns true if these are the default parameters.
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Validates the parameters.
    pub fn validate(&self) -> QuadraResult<()> {
        if self.block_size < 512 || !self.block_size.is_power_of_two() {
            return Err(QuadraError::invalid_config(format!(
                "block_size must be a power of 2 and at least 512, got {}",
                self.block_size
            )));
        }
        if self.node_cache_size == 0 {
            return Err(QuadraError::invalid_config(
                "node_cache_size must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Reads the parameters persisted in `dir`, if any.
    pub fn read(dir: &Path) -> QuadraResult<Option<Self>> {
        let path = dir.join(CONFIG_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(QuadraError::io_path(&path, e)),
        };
        let params: Self = serde_json::from_str(&text).map_err(|e| {
            QuadraError::corruption(format!("{}: {e}", path.display()))
        })?;
        params.validate()?;
        Ok(Some(params))
    }

    /// Persists the parameters into `dir`.
    pub fn write(&self, dir: &Path) -> QuadraResult<()> {
        let path = dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| QuadraError::io_path(&path, e))
    }
}

/// Chooses the parameters for a store.
///
/// Precedence: parameters persisted with the storage, then parameters
/// persisted in the container, then the caller's, then the defaults.
#[must_use]
pub fn decide_store_params(
    app: Option<&StoreParams>,
    container: Option<StoreParams>,
    storage: Option<StoreParams>,
) -> StoreParams {
    storage
        .or(container)
        .or_else(|| app.cloned())
        .unwrap_or_default()
}
