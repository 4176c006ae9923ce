//! Components that live alongside a coordinator.
//!
//! Text indexes and similar side stores register with the coordinator of the
//! engine they shadow. When compaction replaces the engine, every registered
//! component is carried over to the new coordinator.

use std::fmt;

/// A component attached to a transaction coordinator.
pub trait ExternalComponent: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Called after a write transaction commits.
    fn on_commit(&self, _data_version: u64) {}
}

impl fmt::Debug for dyn ExternalComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExternalComponent").field(&self.name()).finish()
    }
}
