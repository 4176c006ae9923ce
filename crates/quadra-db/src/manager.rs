//! Entry point for opening containers and running administrative operations.
//!
//! [`DatabaseMgr`] caches one [`DatasetSwitchable`] per location on top of a
//! [`ConnectionRegistry`]. Opening an on-disk container recovers from any
//! interrupted compaction, picks the highest generation (creating
//! `Data-0001` for a new container) and decides the store parameters.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use quadra_common::config::{decide_store_params, DatabaseConfig, StoreParams};
use quadra_common::error::{QuadraError, QuadraResult};
use quadra_common::types::Location;
use quadra_storage::{ConnectionRegistry, DatasetCopier};
use tracing::{debug, info};

use crate::backup::{BackupWriter, Clock};
use crate::compact::{CompactionOutcome, CompactionStrategy, Compactor};
use crate::naming;
use crate::switchable::DatasetSwitchable;

/// Opens containers and runs compaction and backup on them.
pub struct DatabaseMgr {
    registry: Arc<ConnectionRegistry>,
    containers: Mutex<HashMap<Location, Arc<DatasetSwitchable>>>,
    compactor: Compactor,
    backup: BackupWriter,
    config: DatabaseConfig,
}

impl DatabaseMgr {
    /// Creates a manager over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>, config: DatabaseConfig) -> QuadraResult<Self> {
        config.validate()?;
        Ok(Self {
            compactor: Compactor::new(Arc::clone(&registry), &config.compaction),
            backup: BackupWriter::new(config.backup.clone()),
            registry,
            containers: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// Replaces the compaction strategy.
    pub fn with_strategy(mut self, strategy: Box<dyn CompactionStrategy>) -> Self {
        self.compactor = self.compactor.with_strategy(strategy);
        self
    }

    /// Replaces the compaction copier.
    pub fn with_copier(mut self, copier: Arc<dyn DatasetCopier>) -> Self {
        self.compactor = self.compactor.with_copier(copier);
        self
    }

    /// Replaces the backup clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.backup = self.backup.with_clock(clock);
        self
    }

    /// Returns the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Returns the compactor.
    pub fn compactor(&self) -> &Compactor {
        &self.compactor
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Connects to the container at `location`, creating it if needed.
    pub fn connect(&self, location: &Location) -> QuadraResult<Arc<DatasetSwitchable>> {
        self.connect_inner(location, None)
    }

    /// Like [`connect`](Self::connect), with caller store parameters.
    ///
    /// Parameters persisted in the container or its active generation take
    /// precedence over `params`.
    pub fn connect_with_params(
        &self,
        location: &Location,
        params: &StoreParams,
    ) -> QuadraResult<Arc<DatasetSwitchable>> {
        params.validate()?;
        self.connect_inner(location, Some(params))
    }

    /// Connects to an existing container.
    ///
    /// Fails with `NoSuchLocation` if the directory does not exist.
    pub fn connect_existing(&self, location: &Location) -> QuadraResult<Arc<DatasetSwitchable>> {
        if let Some(dir) = location.path() {
            if !dir.is_dir() {
                return Err(QuadraError::no_such_location(dir.display()));
            }
        }
        self.connect_inner(location, None)
    }

    /// Returns true if a container is cached for `location`.
    pub fn is_connected(&self, location: &Location) -> bool {
        self.containers.lock().contains_key(location)
    }

    fn connect_inner(
        &self,
        location: &Location,
        params: Option<&StoreParams>,
    ) -> QuadraResult<Arc<DatasetSwitchable>> {
        let mut containers = self.containers.lock();
        if let Some(container) = containers.get(location) {
            return Ok(Arc::clone(container));
        }

        let container = match location.path() {
            Some(dir) => self.open_container(location, dir, params)?,
            None => {
                let conn = self.registry.connect_create(location, params)?;
                DatasetSwitchable::new(location.clone(), None, Arc::clone(conn.store()))
            }
        };
        if !location.is_mem_unique() {
            containers.insert(location.clone(), Arc::clone(&container));
        }
        Ok(container)
    }

    fn open_container(
        &self,
        location: &Location,
        dir: &Path,
        params: Option<&StoreParams>,
    ) -> QuadraResult<Arc<DatasetSwitchable>> {
        let container_path = Location::create(dir)?
            .path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dir.to_path_buf());

        let report = naming::clean_incomplete_state(&container_path)?;
        if !report.is_clean() {
            info!(
                container = %container_path.display(),
                staging = report.staging_removed.len(),
                pending = report.pending_removed.len(),
                failed = report.failed.len(),
                "recovered from interrupted compaction"
            );
        }

        let (storage_dir, is_new) = match naming::find_storage_location(&container_path)? {
            Some(found) => (found, false),
            None => (create_initial_generation(&container_path)?, true),
        };

        let container_params = StoreParams::read(&container_path)?;
        let storage_params = StoreParams::read(&storage_dir)?;
        let persisted = container_params.is_some() || storage_params.is_some();
        let decided = decide_store_params(params, container_params, storage_params);
        if is_new && !persisted && !decided.is_default() {
            debug!(container = %container_path.display(), "persisting store params");
            decided.write(&container_path)?;
        }

        let storage = Location::existing(&storage_dir)?;
        let conn = self.registry.connect_create(&storage, Some(&decided))?;
        info!(
            container = %container_path.display(),
            storage = %storage,
            new = is_new,
            "container opened"
        );
        Ok(DatasetSwitchable::new(
            location.clone(),
            Some(container_path),
            Arc::clone(conn.store()),
        ))
    }

    /// Drops the cached container at `location` and releases its store.
    ///
    /// Fails with `ActiveTransactions`, keeping the container cached, while
    /// its store has open transactions.
    pub fn release(&self, location: &Location) -> QuadraResult<()> {
        let mut containers = self.containers.lock();
        let Some(container) = containers.get(location) else {
            return Ok(());
        };
        let store = container.get();
        self.registry.release(store.location())?;
        containers.remove(location);
        debug!(container = %location, "container released");
        Ok(())
    }

    /// Drops every container and expels every store.
    pub fn reset(&self) {
        self.containers.lock().clear();
        self.registry.reset();
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Compacts `container` into a new generation.
    pub fn compact(
        &self,
        container: &DatasetSwitchable,
        delete_old: bool,
    ) -> QuadraResult<CompactionOutcome> {
        self.compactor.compact(container, delete_old)
    }

    /// Writes a backup of `container` and returns its path.
    pub fn backup(&self, container: &DatasetSwitchable) -> QuadraResult<PathBuf> {
        self.backup.backup(container)
    }
}

impl fmt::Debug for DatabaseMgr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseMgr")
            .field("containers", &self.containers.lock().len())
            .field("compactor", &self.compactor)
            .finish()
    }
}

fn create_initial_generation(container: &Path) -> QuadraResult<PathBuf> {
    let path = container.join(naming::initial_generation_name());
    fs::create_dir_all(&path).map_err(|e| QuadraError::io_path(&path, e))?;
    Ok(path)
}
