//! # quadra-txn
//!
//! Transaction coordination for Quadra.
//!
//! Every storage engine owns one [`TransactionCoordinator`]. It admits
//! transactions and gives the layers above the controls they need to swap
//! engines underneath running clients:
//!
//! - **Admission**: any number of readers, one writer at a time.
//!
//! - **Exclusive mode**: waits until no transaction is active and holds new
//!   ones back until finished. Retiring a coordinator enters exclusive mode
//!   and never leaves it.
//!
//! - **Writer blocking**: stops new writers while readers carry on.
//!
//! - **Take-over**: a fresh coordinator continues the data version and
//!   transaction id sequence of the one it replaces, together with its
//!   registered [`ExternalComponent`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 TransactionCoordinator                   │
//! │                                                          │
//! │   begin(Read) ──┐                    ┌── start_exclusive │
//! │   begin(Write) ─┼──▶ Mutex<State> ◀──┼── retire          │
//! │   commit/abort ─┘      + Condvar     └── block_writers   │
//! │                            │                             │
//! │                            ▼                             │
//! │                  data version, externals                 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```rust
//! use quadra_txn::{TransactionCoordinator, TxnMode};
//!
//! let coordinator = TransactionCoordinator::new("example");
//!
//! let mut txn = coordinator.begin(TxnMode::Write).unwrap();
//! let version = txn.commit().unwrap();
//! assert_eq!(version, 1);
//!
//! coordinator.retire().unwrap();
//! assert!(coordinator.begin(TxnMode::Read).is_err());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Components notified of commits.
pub mod external;

/// Transaction admission and lifecycle.
///
/// This module provides:
/// - [`manager::TransactionCoordinator`]: admission, exclusive mode, take-over
/// - [`manager::Transaction`]: transaction handle
/// - [`manager::TransactionState`]: transaction lifecycle states
pub mod manager;

// Re-export commonly used types

pub use external::ExternalComponent;
pub use manager::{
    Transaction, TransactionCoordinator, TransactionError, TransactionState, TransactionStats,
    TxnMode, TxnResult,
};
