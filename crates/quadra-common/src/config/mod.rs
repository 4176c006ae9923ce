//! Configuration for Quadra.
//!
//! `StoreParams` are per-store engine settings persisted next to the data;
//! `DatabaseConfig` governs the container-level operations.

mod database;
mod store;

pub use database::{BackupConfig, CompactionConfig, CompactionStrategyKind, DatabaseConfig};
pub use store::{decide_store_params, FileMode, StoreParams};
