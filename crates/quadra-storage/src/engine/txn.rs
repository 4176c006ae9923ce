//! Read and write transactions on a [`QuadStore`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use quadra_common::error::QuadraResult;
use quadra_common::types::{Quad, Term, TxnId};
use quadra_txn::Transaction;

use super::store::QuadStore;

/// A read transaction over a fixed snapshot.
///
/// Dropping it without calling [`ReadTxn::end`] ends it as well.
pub struct ReadTxn {
    txn: Transaction,
    snapshot: Arc<BTreeSet<Quad>>,
}

impl ReadTxn {
    pub(super) fn new(txn: Transaction, snapshot: Arc<BTreeSet<Quad>>) -> Self {
        Self { txn, snapshot }
    }

    /// Returns the transaction ID.
    pub fn id(&self) -> TxnId {
        self.txn.id()
    }

    /// Returns the data version the snapshot belongs to.
    pub fn data_version(&self) -> u64 {
        self.txn.data_version()
    }

    /// Returns the number of quads.
    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    /// Returns true if the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    /// Returns true if the snapshot holds `quad`.
    pub fn contains(&self, quad: &Quad) -> bool {
        self.snapshot.contains(quad)
    }

    /// Iterates over all quads in order.
    pub fn iter(&self) -> impl Iterator<Item = &Quad> + '_ {
        self.snapshot.iter()
    }

    /// Iterates over the quads of one graph; `None` is the default graph.
    pub fn graph<'a>(&'a self, graph: Option<&'a Term>) -> impl Iterator<Item = &'a Quad> + 'a {
        self.snapshot
            .iter()
            .filter(move |q| q.graph.as_ref() == graph)
    }

    /// Ends the transaction.
    pub fn end(mut self) -> QuadraResult<()> {
        self.txn.commit()?;
        Ok(())
    }
}

impl fmt::Debug for ReadTxn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadTxn")
            .field("txn", &self.txn)
            .field("quads", &self.snapshot.len())
            .finish()
    }
}

/// The write transaction of a store.
///
/// Changes stay private until [`WriteTxn::commit`]. Dropping an uncommitted
/// write transaction discards its changes.
pub struct WriteTxn {
    store: Arc<QuadStore>,
    txn: Transaction,
    working: BTreeSet<Quad>,
    dirty: bool,
}

impl WriteTxn {
    pub(super) fn new(store: Arc<QuadStore>, txn: Transaction, working: BTreeSet<Quad>) -> Self {
        Self {
            store,
            txn,
            working,
            dirty: false,
        }
    }

    /// Returns the transaction ID.
    pub fn id(&self) -> TxnId {
        self.txn.id()
    }

    /// Adds a quad. Returns false if it was already present.
    pub fn add(&mut self, quad: Quad) -> bool {
        let added = self.working.insert(quad);
        self.dirty |= added;
        added
    }

    /// Removes a quad. Returns false if it was absent.
    pub fn remove(&mut self, quad: &Quad) -> bool {
        let removed = self.working.remove(quad);
        self.dirty |= removed;
        removed
    }

    /// Removes every quad.
    pub fn clear(&mut self) {
        self.dirty |= !self.working.is_empty();
        self.working.clear();
    }

    /// Returns true if the working set holds `quad`.
    pub fn contains(&self, quad: &Quad) -> bool {
        self.working.contains(quad)
    }

    /// Returns the number of quads in the working set.
    pub fn len(&self) -> usize {
        self.working.len()
    }

    /// Returns true if the working set is empty.
    pub fn is_empty(&self) -> bool {
        self.working.is_empty()
    }

    /// Iterates over the working set.
    pub fn iter(&self) -> impl Iterator<Item = &Quad> + '_ {
        self.working.iter()
    }

    /// Commits the changes and returns the new data version.
    ///
    /// If persisting fails the transaction is aborted and nothing changes.
    pub fn commit(self) -> QuadraResult<u64> {
        let Self {
            store,
            mut txn,
            working,
            dirty,
        } = self;
        if dirty {
            // On error `txn` drops here and aborts.
            store.install(working)?;
        }
        Ok(txn.commit()?)
    }

    /// Discards the changes.
    pub fn abort(mut self) -> QuadraResult<()> {
        self.txn.abort()?;
        Ok(())
    }
}

impl fmt::Debug for WriteTxn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTxn")
            .field("txn", &self.txn)
            .field("quads", &self.working.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}
