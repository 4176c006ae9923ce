//! # quadra-db
//!
//! Containers, online compaction and backups for Quadra.
//!
//! This crate provides:
//!
//! - **Containers**: [`DatasetSwitchable`], a long-lived handle whose active
//!   store can be replaced while clients keep using it
//! - **Generations**: on-disk `Data-NNNN` naming, discovery and recovery of
//!   interrupted compactions ([`naming`])
//! - **Compaction**: [`Compactor`], which copies the active generation into
//!   the next one and switches over online
//! - **Backups**: [`BackupWriter`], gzip-compressed N-Quads snapshots
//! - **Entry point**: [`DatabaseMgr`], which opens containers and runs the
//!   administrative operations
//!
//! # Example
//!
//! ```rust
//! use quadra_common::config::DatabaseConfig;
//! use quadra_common::types::{Location, Quad, Term};
//! use quadra_db::DatabaseMgr;
//! use quadra_storage::ConnectionRegistry;
//!
//! let dir = tempfile::TempDir::new().unwrap();
//! let mgr = DatabaseMgr::new(ConnectionRegistry::new(), DatabaseConfig::default()).unwrap();
//! let container = mgr.connect(&Location::create(dir.path()).unwrap()).unwrap();
//!
//! container
//!     .execute_write(|txn| {
//!         txn.add(Quad::triple(Term::iri("s"), Term::iri("p"), Term::literal("o")));
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let outcome = mgr.compact(&container, true).unwrap();
//! assert!(outcome.current.ends_with("Data-0002"));
//! assert_eq!(container.get().len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Backup snapshots
pub mod backup;

/// Online compaction
pub mod compact;

/// Container management
pub mod manager;

/// Generation directory naming and recovery
pub mod naming;

/// Switchable dataset container
pub mod switchable;

pub use backup::{BackupWriter, Clock, FixedClock, SystemClock};
pub use compact::{CompactionOutcome, CompactionState, Compactor, OldGeneration};
pub use manager::DatabaseMgr;
pub use switchable::{ContainerWriteTxn, DatasetSwitchable};
