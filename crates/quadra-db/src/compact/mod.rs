//! Online compaction of a container.
//!
//! Compaction copies the live contents of the active generation `Data-N`
//! into a fresh generation `Data-(N+1)` and switches the container over,
//! while readers keep working. Only one compaction runs at a time in the
//! process.
//!
//! The sequence is:
//!
//! 1. Validate: the container's active store is the highest generation on
//!    disk and the next generation does not exist.
//! 2. Inside the container's read-only window: copy config files, copy the
//!    quads into the staging directory, install it as the new generation,
//!    then, exclusively on the new store, carry over the transaction state
//!    and external components and swap the container.
//! 3. After the window: retire and release the old store, then keep or
//!    delete the old generation.
//!
//! A failure before the swap leaves the container and the old generation
//! untouched and removes everything the compaction created.

mod strategy;

pub use strategy::{
    strategy_for, CompactionPlan, CompactionStrategy, InPlaceStrategy, OldGeneration,
    RenameStrategy,
};

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{const_mutex, Mutex};
use quadra_common::config::CompactionConfig;
use quadra_common::constants::{CONFIG_FILE, OPTIMIZER_EXT};
use quadra_common::error::{QuadraError, QuadraResult};
use quadra_common::types::Location;
use quadra_storage::{ConnectionRegistry, DatasetCopier, QuadCopier, QuadStore};
use tracing::{debug, error, info, warn};

use crate::naming;
use crate::switchable::DatasetSwitchable;

/// Serializes compactions across the process.
static COMPACTION_LOCK: Mutex<()> = const_mutex(());

/// Phase of a [`Compactor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionState {
    /// No compaction running.
    Idle,
    /// Checking the container and choosing the next generation.
    Validating,
    /// Copying into the staging directory.
    Copying,
    /// Swapping the container to the new store.
    SwitchingOver,
    /// Retiring the old store and handling the old generation.
    Finalizing,
    /// Undoing a failed compaction.
    Aborting,
}

impl fmt::Display for CompactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Copying => "copying",
            Self::SwitchingOver => "switching-over",
            Self::Finalizing => "finalizing",
            Self::Aborting => "aborting",
        };
        f.write_str(name)
    }
}

/// Result of a successful compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionOutcome {
    /// Generation that was compacted.
    pub previous: PathBuf,
    /// Generation now active.
    pub current: PathBuf,
    /// Number of quads copied.
    pub quads_copied: u64,
    /// What happened to `previous`.
    pub old_generation: OldGeneration,
}

/// Runs compactions against a connection registry.
pub struct Compactor {
    registry: Arc<ConnectionRegistry>,
    strategy: Box<dyn CompactionStrategy>,
    copier: Arc<dyn DatasetCopier>,
    state: Mutex<CompactionState>,
}

impl Compactor {
    /// Creates a compactor using the configured strategy and a full copy.
    pub fn new(registry: Arc<ConnectionRegistry>, config: &CompactionConfig) -> Self {
        Self {
            registry,
            strategy: strategy_for(config.strategy),
            copier: Arc::new(QuadCopier),
            state: Mutex::new(CompactionState::Idle),
        }
    }

    /// Replaces the strategy.
    pub fn with_strategy(mut self, strategy: Box<dyn CompactionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replaces the copier.
    pub fn with_copier(mut self, copier: Arc<dyn DatasetCopier>) -> Self {
        self.copier = copier;
        self
    }

    /// Returns the strategy name.
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Returns the current phase.
    pub fn state(&self) -> CompactionState {
        *self.state.lock()
    }

    fn enter(&self, state: CompactionState) {
        debug!(state = %state, "compaction state");
        *self.state.lock() = state;
    }

    /// Compacts `container` into its next generation.
    ///
    /// With `delete_old`, the previous generation is removed afterwards (or
    /// scheduled for removal, depending on the strategy). In-memory
    /// containers are not supported.
    pub fn compact(
        &self,
        container: &DatasetSwitchable,
        delete_old: bool,
    ) -> QuadraResult<CompactionOutcome> {
        let Some(container_path) = container.container_path() else {
            return Err(QuadraError::unsupported(format!(
                "compact of in-memory dataset {}",
                container.location()
            )));
        };

        let _serial = COMPACTION_LOCK.lock();
        self.enter(CompactionState::Validating);
        let (plan, source) = match self.validate(container, container_path) {
            Ok(validated) => validated,
            Err(e) => {
                self.enter(CompactionState::Aborting);
                warn!(container = %container_path.display(), error = %e, "compaction rejected");
                self.enter(CompactionState::Idle);
                return Err(e);
            }
        };
        info!(
            container = %container_path.display(),
            from = %plan.source,
            to = %plan.target.display(),
            strategy = self.strategy.name(),
            "compaction starting"
        );

        self.enter(CompactionState::Copying);
        if let Err(e) = self.strategy.prepare(&plan) {
            self.enter(CompactionState::Aborting);
            error!(
                container = %container_path.display(),
                staging = %plan.staging.display(),
                error = %e,
                "compaction failed to create staging directory"
            );
            self.enter(CompactionState::Idle);
            return Err(e);
        }
        let switched = container
            .exec_read_only_database(|| self.copy_and_switch(container, &source, &plan))
            .and_then(|inner| inner);
        let quads_copied = match switched {
            Ok(copied) => copied,
            Err(e) => {
                self.enter(CompactionState::Aborting);
                error!(
                    container = %container_path.display(),
                    error = %e,
                    "compaction failed, discarding new generation"
                );
                self.strategy.discard(&self.registry, &plan);
                self.enter(CompactionState::Idle);
                return Err(e);
            }
        };

        self.enter(CompactionState::Finalizing);
        self.release_old(&source);
        let old_generation = self.strategy.finish(&plan, delete_old);
        self.enter(CompactionState::Idle);

        info!(
            container = %container_path.display(),
            current = %plan.target.display(),
            quads = quads_copied,
            old = ?old_generation,
            "compaction complete"
        );
        Ok(CompactionOutcome {
            previous: plan.source.path().map(Path::to_path_buf).unwrap_or_default(),
            current: plan.target,
            quads_copied,
            old_generation,
        })
    }

    fn validate(
        &self,
        container: &DatasetSwitchable,
        container_path: &Path,
    ) -> QuadraResult<(CompactionPlan, Arc<QuadStore>)> {
        let active_dir = naming::find_storage_location(container_path)?.ok_or_else(|| {
            QuadraError::inconsistent_state(format!(
                "no generation in {}",
                container_path.display()
            ))
        })?;
        let active = Location::existing(&active_dir)?;

        let source = container.get();
        if *source.location() != active {
            return Err(QuadraError::inconsistent_state(format!(
                "active store {} is not the latest generation {}",
                source.location(),
                active
            )));
        }
        let connection = self.registry.get(&active).ok_or_else(|| {
            QuadraError::inconsistent_state(format!("no open connection to {active}"))
        })?;
        if !Arc::ptr_eq(connection.store(), &source) {
            return Err(QuadraError::inconsistent_state(format!(
                "container and registry disagree on the store at {active}"
            )));
        }

        let current_name = active_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = container_path.join(naming::next_generation_name(&current_name)?);
        if target.exists() {
            return Err(QuadraError::inconsistent_state(format!(
                "next generation {} already exists",
                target.display()
            )));
        }
        let staging = self.strategy.staging_path(&target);
        if staging.exists() {
            return Err(QuadraError::inconsistent_state(format!(
                "staging directory {} already exists",
                staging.display()
            )));
        }

        let plan = CompactionPlan {
            container: container_path.to_path_buf(),
            source: active,
            target,
            staging,
        };
        Ok((plan, source))
    }

    /// Runs inside the read-only window of the container.
    fn copy_and_switch(
        &self,
        container: &DatasetSwitchable,
        source: &Arc<QuadStore>,
        plan: &CompactionPlan,
    ) -> QuadraResult<u64> {
        if let Some(source_dir) = plan.source.path() {
            copy_config_files(source_dir, &plan.staging)?;
        }

        let staging = Location::existing(&plan.staging)?;
        let connection = self.registry.connect_create(&staging, Some(source.params()))?;
        let copied = self.copier.copy(source, connection.store())?;
        drop(connection);

        let connection = self.strategy.install(&self.registry, plan)?;
        let target = Arc::clone(connection.store());

        self.enter(CompactionState::SwitchingOver);
        let old = source.coordinator();
        target.coordinator().exec_exclusive(|| {
            target.coordinator().take_over_from(old);
            for external in old.externals() {
                target.coordinator().add_external(external);
            }
            if !container.change(source, Arc::clone(&target)) {
                warn!(
                    container = %container.location(),
                    "active store changed during compaction, forcing switch"
                );
                container.set(Arc::clone(&target));
            }
        })?;
        Ok(copied)
    }

    /// Stops the old store. Problems are logged; the switch has happened.
    fn release_old(&self, source: &Arc<QuadStore>) {
        if let Err(e) = source.coordinator().retire() {
            warn!(store = %source.location(), error = %e, "failed to retire old store");
        }
        if let Err(e) = self.registry.release(source.location()) {
            warn!(store = %source.location(), error = %e, "forcing release of old store");
            if let Err(e) = self.registry.internal_expel(source.location(), true) {
                error!(store = %source.location(), error = %e, "failed to expel old store");
            }
        }
    }
}

impl fmt::Debug for Compactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compactor")
            .field("strategy", &self.strategy)
            .field("state", &self.state())
            .finish()
    }
}

/// Copies the store configuration and optimizer files of a generation.
fn copy_config_files(from: &Path, to: &Path) -> QuadraResult<()> {
    let entries = fs::read_dir(from).map_err(|e| QuadraError::io_path(from, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| QuadraError::io_path(from, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_config = entry.file_name() == CONFIG_FILE
            || path.extension().is_some_and(|ext| ext == OPTIMIZER_EXT);
        if is_config {
            let dest = to.join(entry.file_name());
            fs::copy(&path, &dest).map_err(|e| QuadraError::io_path(&dest, e))?;
            debug!(file = %path.display(), "copied config file");
        }
    }
    Ok(())
}
