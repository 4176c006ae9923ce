//! # quadra-storage
//!
//! Storage engine and storage-location management for Quadra.
//!
//! This crate provides:
//! - **Process locking**: [`ProcessLock`], one owning process per directory
//! - **Engine**: [`QuadStore`], a transactional quad store with snapshot
//!   readers and a single writer
//! - **Bulk copy**: [`DatasetCopier`], the seam compaction copies through
//! - **Connections**: [`ConnectionRegistry`], at most one open store per
//!   location
//!
//! # Example
//!
//! ```rust
//! use quadra_common::types::{Location, Quad, Term};
//! use quadra_storage::ConnectionRegistry;
//!
//! let registry = ConnectionRegistry::new();
//! let conn = registry.connect_create(&Location::mem(), None).unwrap();
//!
//! let mut txn = conn.store().begin_write().unwrap();
//! txn.add(Quad::triple(Term::iri("s"), Term::iri("p"), Term::literal("o")));
//! txn.commit().unwrap();
//!
//! assert_eq!(conn.store().len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Connection cache
pub mod connection;

/// Quad storage engine
pub mod engine;

/// Advisory process locks
pub mod lock;

pub use connection::{ConnectionRegistry, StoreConnection};
pub use engine::{DatasetCopier, QuadCopier, QuadStore, ReadTxn, WriteTxn};
pub use lock::ProcessLock;
