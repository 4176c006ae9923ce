//! Transaction coordinator.
//!
//! The coordinator decides when a transaction may start. It does not touch
//! data; the storage engine that owns it does.
//!
//! # Admission
//!
//! ```text
//!                  ┌────────────────────┐
//!   begin(Read) ──▶│ exclusive pending? │── yes ──▶ wait
//!                  └────────────────────┘
//!                           │ no
//!                           ▼
//!                  ┌────────────────────┐
//!   begin(Write) ─▶│ writer active or   │── yes ──▶ wait
//!                  │ writers blocked?   │
//!                  └────────────────────┘
//!                           │ no
//!                           ▼
//!                        admitted
//! ```
//!
//! A pending exclusive request holds back new transactions of either kind, so
//! it cannot be starved by a stream of readers. A retired coordinator refuses
//! every new transaction.

mod transaction;

pub use transaction::{Transaction, TransactionState, TxnMode};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};
use quadra_common::error::QuadraError;
use quadra_common::types::TxnId;
use tracing::{debug, info, warn};

use crate::external::ExternalComponent;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur during transaction operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// The coordinator was retired; its engine has been replaced.
    Retired(String),
    /// The coordinator was shut down.
    ShutDown(String),
    /// Transaction is not in the expected state.
    InvalidState {
        /// The transaction ID.
        txn_id: TxnId,
        /// The current state.
        current: TransactionState,
        /// The expected state(s).
        expected: &'static str,
    },
    /// Internal error.
    Internal(String),
}

impl TransactionError {
    /// Returns true if the coordinator will never admit another transaction.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            TransactionError::Retired(_) | TransactionError::ShutDown(_)
        )
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::Retired(label) => {
                write!(f, "coordinator {} is retired", label)
            }
            TransactionError::ShutDown(label) => {
                write!(f, "coordinator {} is shut down", label)
            }
            TransactionError::InvalidState {
                txn_id,
                current,
                expected,
            } => {
                write!(
                    f,
                    "transaction {:?} in invalid state {}, expected {}",
                    txn_id, current, expected
                )
            }
            TransactionError::Internal(msg) => {
                write!(f, "internal error: {}", msg)
            }
        }
    }
}

impl std::error::Error for TransactionError {}

impl From<TransactionError> for QuadraError {
    fn from(err: TransactionError) -> Self {
        QuadraError::transaction(err.to_string())
    }
}

/// Result type for transaction operations.
pub type TxnResult<T> = Result<T, TransactionError>;

// =============================================================================
// Statistics
// =============================================================================

/// Statistics about a coordinator.
#[derive(Debug, Default)]
pub struct TransactionStats {
    /// Total transactions started.
    pub started: AtomicU64,
    /// Total transactions committed.
    pub committed: AtomicU64,
    /// Total transactions aborted.
    pub aborted: AtomicU64,
    /// Currently active transactions.
    pub active: AtomicU64,
    /// Times exclusive mode was entered.
    pub exclusive_entries: AtomicU64,
}

impl TransactionStats {
    /// Creates new stats.
    pub fn new() -> Self {
        Self::default()
    }
}

// =============================================================================
// Coordinator
// =============================================================================

#[derive(Debug, Default)]
struct CoordinatorState {
    active_readers: u64,
    active_writers: u64,
    exclusive: bool,
    exclusive_waiting: u32,
    writers_blocked: bool,
    retired: bool,
    shut_down: bool,
}

impl CoordinatorState {
    fn active(&self) -> u64 {
        self.active_readers + self.active_writers
    }

    fn check_open(&self, label: &str) -> TxnResult<()> {
        if self.shut_down {
            Err(TransactionError::ShutDown(label.to_string()))
        } else if self.retired {
            Err(TransactionError::Retired(label.to_string()))
        } else {
            Ok(())
        }
    }

    fn admits(&self, mode: TxnMode) -> bool {
        if self.exclusive || self.exclusive_waiting > 0 {
            return false;
        }
        match mode {
            TxnMode::Read => true,
            TxnMode::Write => self.active_writers == 0 && !self.writers_blocked,
        }
    }
}

/// Admits and tracks the transactions of one storage engine.
pub struct TransactionCoordinator {
    label: String,
    state: Mutex<CoordinatorState>,
    changed: Condvar,
    data_version: AtomicU64,
    next_txn_id: AtomicU64,
    externals: RwLock<Vec<Arc<dyn ExternalComponent>>>,
    stats: TransactionStats,
}

impl TransactionCoordinator {
    /// Creates a coordinator. The label appears in logs and errors.
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            state: Mutex::new(CoordinatorState::default()),
            changed: Condvar::new(),
            data_version: AtomicU64::new(0),
            next_txn_id: AtomicU64::new(TxnId::MIN.as_u64()),
            externals: RwLock::new(Vec::new()),
            stats: TransactionStats::new(),
        })
    }

    /// Returns the coordinator label.
    pub fn label(&self) -> &str {
        &self.label
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    /// Begins a transaction, waiting until it can be admitted.
    pub fn begin(self: &Arc<Self>, mode: TxnMode) -> TxnResult<Transaction> {
        self.admit(mode, true)?
            .ok_or_else(|| TransactionError::Internal("blocking admission returned".into()))
    }

    /// Begins a transaction if it can be admitted right away.
    pub fn try_begin(self: &Arc<Self>, mode: TxnMode) -> TxnResult<Option<Transaction>> {
        self.admit(mode, false)
    }

    fn admit(self: &Arc<Self>, mode: TxnMode, can_block: bool) -> TxnResult<Option<Transaction>> {
        {
            let mut state = self.state.lock();
            loop {
                state.check_open(&self.label)?;
                if state.admits(mode) {
                    break;
                }
                if !can_block {
                    return Ok(None);
                }
                self.changed.wait(&mut state);
            }
            match mode {
                TxnMode::Read => state.active_readers += 1,
                TxnMode::Write => state.active_writers += 1,
            }
        }

        let id = TxnId::new(self.next_txn_id.fetch_add(1, AtomicOrdering::SeqCst));
        self.stats.started.fetch_add(1, AtomicOrdering::Relaxed);
        self.stats.active.fetch_add(1, AtomicOrdering::Relaxed);

        Ok(Some(Transaction::new(
            id,
            mode,
            self.data_version(),
            Arc::clone(self),
        )))
    }

    /// Ends a transaction and returns the resulting data version.
    fn finish(&self, mode: TxnMode, committed: bool) -> u64 {
        let wrote = committed && mode == TxnMode::Write;
        let version = if wrote {
            self.data_version.fetch_add(1, AtomicOrdering::SeqCst) + 1
        } else {
            self.data_version()
        };

        {
            let mut state = self.state.lock();
            match mode {
                TxnMode::Read => state.active_readers = state.active_readers.saturating_sub(1),
                TxnMode::Write => state.active_writers = state.active_writers.saturating_sub(1),
            }
        }
        self.changed.notify_all();

        if committed {
            self.stats.committed.fetch_add(1, AtomicOrdering::Relaxed);
        } else {
            self.stats.aborted.fetch_add(1, AtomicOrdering::Relaxed);
        }
        self.stats.active.fetch_sub(1, AtomicOrdering::Relaxed);

        if wrote {
            for component in self.externals.read().iter() {
                component.on_commit(version);
            }
        }
        version
    }

    // -------------------------------------------------------------------------
    // Exclusive mode
    // -------------------------------------------------------------------------

    /// Enters exclusive mode, waiting for every active transaction to end.
    ///
    /// New transactions wait from the moment this is called.
    pub fn start_exclusive_mode(&self) -> TxnResult<()> {
        let mut state = self.state.lock();
        state.check_open(&self.label)?;
        state.exclusive_waiting += 1;
        while state.exclusive || state.active() > 0 {
            self.changed.wait(&mut state);
            if let Err(e) = state.check_open(&self.label) {
                state.exclusive_waiting -= 1;
                drop(state);
                self.changed.notify_all();
                return Err(e);
            }
        }
        state.exclusive_waiting -= 1;
        state.exclusive = true;
        self.stats.exclusive_entries.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(coordinator = %self.label, "entered exclusive mode");
        Ok(())
    }

    /// Enters exclusive mode only if no transaction is active.
    pub fn try_exclusive_mode(&self) -> TxnResult<bool> {
        let mut state = self.state.lock();
        state.check_open(&self.label)?;
        if state.exclusive || state.exclusive_waiting > 0 || state.active() > 0 {
            return Ok(false);
        }
        state.exclusive = true;
        self.stats.exclusive_entries.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(true)
    }

    /// Leaves exclusive mode. A retired coordinator stays exclusive.
    pub fn finish_exclusive_mode(&self) {
        {
            let mut state = self.state.lock();
            if state.retired {
                return;
            }
            if !state.exclusive {
                warn!(coordinator = %self.label, "finish_exclusive_mode without exclusive mode");
                return;
            }
            state.exclusive = false;
        }
        debug!(coordinator = %self.label, "left exclusive mode");
        self.changed.notify_all();
    }

    /// Runs `f` in exclusive mode.
    pub fn exec_exclusive<R>(&self, f: impl FnOnce() -> R) -> TxnResult<R> {
        self.start_exclusive_mode()?;
        let _guard = ExclusiveGuard(self);
        Ok(f())
    }

    /// Retires the coordinator.
    ///
    /// Waits for active transactions to end, then enters exclusive mode for
    /// good: every later `begin` fails with [`TransactionError::Retired`].
    pub fn retire(&self) -> TxnResult<()> {
        let mut state = self.state.lock();
        if state.retired {
            return Ok(());
        }
        state.exclusive_waiting += 1;
        while (state.exclusive || state.active() > 0) && !state.shut_down {
            self.changed.wait(&mut state);
        }
        state.exclusive_waiting -= 1;
        state.exclusive = true;
        state.retired = true;
        drop(state);

        self.changed.notify_all();
        info!(coordinator = %self.label, "coordinator retired");
        Ok(())
    }

    /// Returns true once the coordinator has been retired.
    pub fn is_retired(&self) -> bool {
        self.state.lock().retired
    }

    /// Returns true while exclusive mode is held.
    pub fn is_exclusive(&self) -> bool {
        self.state.lock().exclusive
    }

    // -------------------------------------------------------------------------
    // Writer blocking
    // -------------------------------------------------------------------------

    /// Stops new writers, waiting for the active writer to finish.
    ///
    /// Readers are unaffected.
    pub fn block_writers(&self) -> TxnResult<()> {
        let mut state = self.state.lock();
        loop {
            state.check_open(&self.label)?;
            if !state.writers_blocked && state.active_writers == 0 {
                break;
            }
            self.changed.wait(&mut state);
        }
        state.writers_blocked = true;
        Ok(())
    }

    /// Stops new writers only if no writer is active.
    pub fn try_block_writers(&self) -> TxnResult<bool> {
        let mut state = self.state.lock();
        state.check_open(&self.label)?;
        if state.writers_blocked || state.active_writers > 0 {
            return Ok(false);
        }
        state.writers_blocked = true;
        Ok(true)
    }

    /// Lets writers in again.
    pub fn enable_writers(&self) {
        {
            let mut state = self.state.lock();
            if !state.writers_blocked {
                warn!(coordinator = %self.label, "enable_writers while writers are not blocked");
                return;
            }
            state.writers_blocked = false;
        }
        self.changed.notify_all();
    }

    /// Runs `f` with writers blocked.
    pub fn exec_as_writer<R>(&self, f: impl FnOnce() -> R) -> TxnResult<R> {
        self.block_writers()?;
        let _guard = WritersBlockedGuard(self);
        Ok(f())
    }

    // -------------------------------------------------------------------------
    // Take-over and external components
    // -------------------------------------------------------------------------

    /// Continues the data version and transaction id sequence of `other`.
    pub fn take_over_from(&self, other: &TransactionCoordinator) {
        let version = other.data_version();
        self.data_version.fetch_max(version, AtomicOrdering::SeqCst);
        self.next_txn_id.fetch_max(
            other.next_txn_id.load(AtomicOrdering::SeqCst),
            AtomicOrdering::SeqCst,
        );
        debug!(
            coordinator = %self.label,
            from = %other.label,
            data_version = version,
            "took over coordinator state"
        );
    }

    /// Registers an external component.
    pub fn add_external(&self, component: Arc<dyn ExternalComponent>) {
        self.externals.write().push(component);
    }

    /// Returns the registered external components.
    pub fn externals(&self) -> Vec<Arc<dyn ExternalComponent>> {
        self.externals.read().clone()
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    /// Returns the current data version. Each write commit advances it.
    pub fn data_version(&self) -> u64 {
        self.data_version.load(AtomicOrdering::SeqCst)
    }

    /// Returns the number of active transactions.
    pub fn active_count(&self) -> u64 {
        self.state.lock().active()
    }

    /// Returns the number of active read transactions.
    pub fn active_readers(&self) -> u64 {
        self.state.lock().active_readers
    }

    /// Returns the number of active write transactions.
    pub fn active_writers(&self) -> u64 {
        self.state.lock().active_writers
    }

    /// Refuses all new transactions. Active ones may still end normally.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
        }
        self.changed.notify_all();
        debug!(coordinator = %self.label, "coordinator shut down");
    }

    /// Returns true once shut down.
    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Returns statistics.
    pub fn stats(&self) -> &TransactionStats {
        &self.stats
    }
}

impl fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TransactionCoordinator")
            .field("label", &self.label)
            .field("data_version", &self.data_version())
            .field("active_readers", &state.active_readers)
            .field("active_writers", &state.active_writers)
            .field("exclusive", &state.exclusive)
            .field("retired", &state.retired)
            .finish()
    }
}

struct ExclusiveGuard<'a>(&'a TransactionCoordinator);

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.0.finish_exclusive_mode();
    }
}

struct WritersBlockedGuard<'a>(&'a TransactionCoordinator);

impl Drop for WritersBlockedGuard<'_> {
    fn drop(&mut self) {
        self.0.enable_writers();
    }
}
