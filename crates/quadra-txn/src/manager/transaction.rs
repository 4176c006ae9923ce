//! Transaction handles.

use std::fmt;
use std::sync::Arc;

use quadra_common::types::TxnId;

use super::{TransactionCoordinator, TransactionError, TxnResult};

/// Whether a transaction may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnMode {
    /// Read-only; any number may run concurrently.
    Read,
    /// Read-write; at most one at a time.
    Write,
}

impl fmt::Display for TxnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnMode::Read => write!(f, "Read"),
            TxnMode::Write => write!(f, "Write"),
        }
    }
}

/// The state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

impl TransactionState {
    /// Returns true if the transaction can perform operations.
    pub fn is_active(&self) -> bool {
        *self == TransactionState::Active
    }

    /// Returns true if the transaction has ended.
    pub fn is_ended(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Active => write!(f, "Active"),
            TransactionState::Committed => write!(f, "Committed"),
            TransactionState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// A transaction admitted by a [`TransactionCoordinator`].
///
/// Dropping an active transaction aborts it.
pub struct Transaction {
    id: TxnId,
    mode: TxnMode,
    data_version: u64,
    state: TransactionState,
    coordinator: Arc<TransactionCoordinator>,
}

impl Transaction {
    pub(super) fn new(
        id: TxnId,
        mode: TxnMode,
        data_version: u64,
        coordinator: Arc<TransactionCoordinator>,
    ) -> Self {
        Self {
            id,
            mode,
            data_version,
            state: TransactionState::Active,
            coordinator,
        }
    }

    /// Returns the transaction ID.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the transaction mode.
    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    /// Returns true for write transactions.
    pub fn is_write(&self) -> bool {
        self.mode == TxnMode::Write
    }

    /// Returns the data version observed when the transaction began.
    pub fn data_version(&self) -> u64 {
        self.data_version
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns the coordinator that admitted this transaction.
    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    /// Commits the transaction.
    ///
    /// Returns the data version after the commit; a write commit advances it
    /// by one.
    pub fn commit(&mut self) -> TxnResult<u64> {
        self.ensure_active()?;
        let version = self.coordinator.finish(self.mode, true);
        self.state = TransactionState::Committed;
        Ok(version)
    }

    /// Aborts the transaction.
    pub fn abort(&mut self) -> TxnResult<()> {
        self.ensure_active()?;
        self.coordinator.finish(self.mode, false);
        self.state = TransactionState::Aborted;
        Ok(())
    }

    fn ensure_active(&self) -> TxnResult<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(TransactionError::InvalidState {
                txn_id: self.id,
                current: self.state,
                expected: "Active",
            })
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state.is_active() {
            let _ = self.abort();
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("data_version", &self.data_version)
            .field("state", &self.state)
            .finish()
    }
}
