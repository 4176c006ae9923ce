//! How a compacted generation is brought into place.
//!
//! [`RenameStrategy`] builds the new generation under a `-tmp` name and
//! renames it once complete, so a crash never leaves a half-built directory
//! under a generation name. [`InPlaceStrategy`] is for hosts that cannot
//! rename or delete directories holding memory-mapped files: it builds
//! directly under the final name and relies on the work-in-progress marker
//! for crash recovery and for deferred deletion of the old generation.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quadra_common::config::CompactionStrategyKind;
use quadra_common::error::{QuadraError, QuadraResult};
use quadra_common::types::Location;
use quadra_storage::{ConnectionRegistry, StoreConnection};
use tracing::{debug, error, info, warn};

use crate::naming::{self, remove_path};

/// What happened to the previous generation directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OldGeneration {
    /// Left on disk, as asked.
    Retained,
    /// Deleted.
    Deleted,
    /// Recorded for deletion on the next open of the container.
    DeletionDeferred,
    /// Deletion was attempted and failed; manual clean-up needed.
    DeletionFailed,
}

/// The directories involved in one compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionPlan {
    /// Container directory.
    pub container: PathBuf,
    /// Active generation being compacted.
    pub source: Location,
    /// Final directory of the new generation.
    pub target: PathBuf,
    /// Directory the copy is written into.
    pub staging: PathBuf,
}

/// The directory-level steps of a compaction.
pub trait CompactionStrategy: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Returns the directory the copy is written into for `target`.
    fn staging_path(&self, target: &Path) -> PathBuf;

    /// Creates the staging directory.
    ///
    /// On failure nothing is left behind and `discard` is not called, so a
    /// directory this compaction did not create is never removed.
    fn prepare(&self, plan: &CompactionPlan) -> QuadraResult<()>;

    /// Turns the finished copy into the new generation and connects to it.
    fn install(
        &self,
        registry: &ConnectionRegistry,
        plan: &CompactionPlan,
    ) -> QuadraResult<Arc<StoreConnection>>;

    /// Undoes `prepare` and `install` after a failure. Problems are logged.
    fn discard(&self, registry: &ConnectionRegistry, plan: &CompactionPlan);

    /// Completes the compaction once the new generation is active.
    /// Problems are logged.
    fn finish(&self, plan: &CompactionPlan, delete_old: bool) -> OldGeneration;
}

/// Returns the strategy for `kind`, resolving `Auto` against the host.
pub fn strategy_for(kind: CompactionStrategyKind) -> Box<dyn CompactionStrategy> {
    match kind.resolve() {
        CompactionStrategyKind::InPlace => Box::new(InPlaceStrategy),
        _ => Box::new(RenameStrategy),
    }
}

fn create_staging(path: &Path) -> QuadraResult<()> {
    if path.exists() {
        return Err(QuadraError::inconsistent_state(format!(
            "{} already exists",
            path.display()
        )));
    }
    fs::create_dir(path).map_err(|e| QuadraError::io_path(path, e))
}

fn expel(registry: &ConnectionRegistry, path: &Path) {
    if let Ok(location) = Location::existing(path) {
        if let Err(e) = registry.internal_expel(&location, true) {
            warn!(path = %path.display(), error = %e, "failed to expel connection");
        }
    }
}

fn delete_dir(path: &Path) -> bool {
    if !path.exists() {
        return true;
    }
    match remove_path(path) {
        Ok(()) => true,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to delete directory");
            false
        }
    }
}

fn connect(registry: &ConnectionRegistry, path: &Path) -> QuadraResult<Arc<StoreConnection>> {
    let location = Location::existing(path)?;
    registry.connect_create(&location, None)
}

// =============================================================================
// RenameStrategy
// =============================================================================

/// Builds under `Data-NNNN-tmp`, then renames to `Data-NNNN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenameStrategy;

impl CompactionStrategy for RenameStrategy {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn staging_path(&self, target: &Path) -> PathBuf {
        naming::staging_path(target)
    }

    fn prepare(&self, plan: &CompactionPlan) -> QuadraResult<()> {
        create_staging(&plan.staging)
    }

    fn install(
        &self,
        registry: &ConnectionRegistry,
        plan: &CompactionPlan,
    ) -> QuadraResult<Arc<StoreConnection>> {
        // Files must be closed before the directory moves.
        let staging = Location::existing(&plan.staging)?;
        registry.internal_expel(&staging, true)?;

        fs::rename(&plan.staging, &plan.target)
            .map_err(|e| QuadraError::io_path(&plan.target, e))?;
        debug!(
            from = %plan.staging.display(),
            to = %plan.target.display(),
            "staging directory moved into place"
        );
        connect(registry, &plan.target)
    }

    fn discard(&self, registry: &ConnectionRegistry, plan: &CompactionPlan) {
        expel(registry, &plan.staging);
        expel(registry, &plan.target);
        delete_dir(&plan.staging);
        delete_dir(&plan.target);
    }

    fn finish(&self, plan: &CompactionPlan, delete_old: bool) -> OldGeneration {
        if !delete_old {
            return OldGeneration::Retained;
        }
        let Some(old) = plan.source.path() else {
            return OldGeneration::Retained;
        };
        debug!(path = %old.display(), "deleting old generation");
        if delete_dir(old) {
            OldGeneration::Deleted
        } else {
            OldGeneration::DeletionFailed
        }
    }
}

// =============================================================================
// InPlaceStrategy
// =============================================================================

/// Builds directly under `Data-NNNN`, tracked by the work-in-progress marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct InPlaceStrategy;

impl CompactionStrategy for InPlaceStrategy {
    fn name(&self) -> &'static str {
        "in-place"
    }

    fn staging_path(&self, target: &Path) -> PathBuf {
        target.to_path_buf()
    }

    fn prepare(&self, plan: &CompactionPlan) -> QuadraResult<()> {
        // Recorded before it exists: a crash mid-copy must not leave a
        // directory that looks like the newest generation.
        naming::record_pending_deletion(&plan.container, &plan.staging)?;
        if let Err(e) = create_staging(&plan.staging) {
            if let Err(forget) = naming::forget_pending_deletion(&plan.container, &plan.staging) {
                warn!(error = %forget, "failed to update work-in-progress marker");
            }
            return Err(e);
        }
        Ok(())
    }

    fn install(
        &self,
        registry: &ConnectionRegistry,
        plan: &CompactionPlan,
    ) -> QuadraResult<Arc<StoreConnection>> {
        connect(registry, &plan.target)
    }

    fn discard(&self, registry: &ConnectionRegistry, plan: &CompactionPlan) {
        expel(registry, &plan.target);
        if delete_dir(&plan.target) {
            if let Err(e) = naming::forget_pending_deletion(&plan.container, &plan.target) {
                warn!(error = %e, "failed to update work-in-progress marker");
            }
        } else {
            info!(path = %plan.target.display(), "left for removal on next open");
        }
    }

    fn finish(&self, plan: &CompactionPlan, delete_old: bool) -> OldGeneration {
        // From here on the new generation must survive a restart.
        if let Err(e) = naming::forget_pending_deletion(&plan.container, &plan.target) {
            error!(
                path = %plan.target.display(),
                error = %e,
                "failed to clear new generation from work-in-progress marker"
            );
        }
        if !delete_old {
            return OldGeneration::Retained;
        }
        let Some(old) = plan.source.path() else {
            return OldGeneration::Retained;
        };
        match naming::record_pending_deletion(&plan.container, old) {
            Ok(()) => {
                info!(path = %old.display(), "old generation will be deleted on next open");
                OldGeneration::DeletionDeferred
            }
            Err(e) => {
                error!(path = %old.display(), error = %e, "failed to defer deletion");
                OldGeneration::DeletionFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadra_common::constants::INCOMPLETE_WIP;
    use tempfile::TempDir;

    fn plan(container: &Path, strategy: &dyn CompactionStrategy) -> CompactionPlan {
        let source = container.join("Data-0001");
        fs::create_dir_all(&source).unwrap();
        let target = container.join("Data-0002");
        CompactionPlan {
            container: container.to_path_buf(),
            source: Location::existing(&source).unwrap(),
            staging: strategy.staging_path(&target),
            target,
        }
    }

    #[test]
    fn test_strategy_for() {
        assert_eq!(strategy_for(CompactionStrategyKind::Rename).name(), "rename");
        assert_eq!(
            strategy_for(CompactionStrategyKind::InPlace).name(),
            "in-place"
        );
    }

    #[test]
    fn test_rename_install() {
        let tmp = TempDir::new().unwrap();
        let registry = ConnectionRegistry::new();
        let plan = plan(tmp.path(), &RenameStrategy);
        assert!(plan.staging.ends_with("Data-0002-tmp"));

        RenameStrategy.prepare(&plan).unwrap();
        assert!(RenameStrategy.prepare(&plan).is_err());
        connect(&registry, &plan.staging).unwrap();

        let conn = RenameStrategy.install(&registry, &plan).unwrap();
        assert!(!plan.staging.exists());
        assert!(plan.target.is_dir());
        assert_eq!(conn.location().path(), Some(plan.target.canonicalize().unwrap().as_path()));
    }

    #[test]
    fn test_rename_discard() {
        let tmp = TempDir::new().unwrap();
        let registry = ConnectionRegistry::new();
        let plan = plan(tmp.path(), &RenameStrategy);

        RenameStrategy.prepare(&plan).unwrap();
        connect(&registry, &plan.staging).unwrap();
        RenameStrategy.discard(&registry, &plan);
        assert!(!plan.staging.exists());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rename_finish() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(tmp.path(), &RenameStrategy);
        assert_eq!(RenameStrategy.finish(&plan, false), OldGeneration::Retained);
        assert!(plan.source.exists());
        assert_eq!(RenameStrategy.finish(&plan, true), OldGeneration::Deleted);
        assert!(!plan.source.exists());
    }

    #[test]
    fn test_in_place_marker_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(tmp.path(), &InPlaceStrategy);
        assert_eq!(plan.staging, plan.target);

        InPlaceStrategy.prepare(&plan).unwrap();
        assert_eq!(
            naming::pending_deletions(tmp.path()).unwrap(),
            vec![plan.target.clone()]
        );

        let old = InPlaceStrategy.finish(&plan, true);
        assert_eq!(old, OldGeneration::DeletionDeferred);
        let pending = naming::pending_deletions(tmp.path()).unwrap();
        assert_eq!(pending, vec![plan.source.path().unwrap().to_path_buf()]);
        assert!(plan.source.exists());
    }

    #[test]
    fn test_in_place_prepare_leaves_foreign_directory() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(tmp.path(), &InPlaceStrategy);
        fs::create_dir_all(&plan.target).unwrap();
        fs::write(plan.target.join("keep"), "x").unwrap();

        let err = InPlaceStrategy.prepare(&plan).unwrap_err();
        assert!(matches!(err, QuadraError::InconsistentState { .. }));
        assert!(plan.target.join("keep").exists());
        assert!(naming::pending_deletions(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_in_place_discard() {
        let tmp = TempDir::new().unwrap();
        let registry = ConnectionRegistry::new();
        let plan = plan(tmp.path(), &InPlaceStrategy);

        InPlaceStrategy.prepare(&plan).unwrap();
        connect(&registry, &plan.target).unwrap();
        InPlaceStrategy.discard(&registry, &plan);
        assert!(!plan.target.exists());
        assert!(!tmp.path().join(INCOMPLETE_WIP).exists());
    }
}
