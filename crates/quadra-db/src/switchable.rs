//! The switchable dataset container.
//!
//! Clients hold a [`DatasetSwitchable`] for the life of the database. It
//! points at the store of the active generation and delegates transactions
//! to it; compaction swaps in the store of the next generation without the
//! client noticing.
//!
//! Container writers pass through a writer gate. While
//! [`DatasetSwitchable::exec_read_only_database`] runs, new writers wait at
//! the gate and in-flight writers have finished, so the active store does not
//! change underneath a copy. Readers are never held at the gate.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};
use quadra_common::error::QuadraResult;
use quadra_common::types::Location;
use quadra_storage::{QuadStore, ReadTxn, WriteTxn};
use tracing::debug;

// =============================================================================
// Writer gate
// =============================================================================

#[derive(Debug, Default)]
struct GateState {
    writers: u32,
    read_only: u32,
}

#[derive(Debug, Default)]
struct WriterGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl WriterGate {
    fn enter_writer(self: &Arc<Self>) -> WriterPermit {
        let mut state = self.state.lock();
        while state.read_only > 0 {
            self.changed.wait(&mut state);
        }
        state.writers += 1;
        WriterPermit {
            gate: Arc::clone(self),
        }
    }

    fn enter_read_only(&self) {
        let mut state = self.state.lock();
        state.read_only += 1;
        while state.writers > 0 {
            self.changed.wait(&mut state);
        }
    }

    fn leave_read_only(&self) {
        self.state.lock().read_only -= 1;
        self.changed.notify_all();
    }
}

/// Admission of one container writer. Dropping it lets the gate close.
struct WriterPermit {
    gate: Arc<WriterGate>,
}

impl Drop for WriterPermit {
    fn drop(&mut self) {
        self.gate.state.lock().writers -= 1;
        self.gate.changed.notify_all();
    }
}

struct ReadOnlyGuard<'a>(&'a WriterGate);

impl Drop for ReadOnlyGuard<'_> {
    fn drop(&mut self) {
        self.0.leave_read_only();
    }
}

// =============================================================================
// Container write transaction
// =============================================================================

/// A write transaction started through the container.
///
/// Dereferences to the underlying [`WriteTxn`].
pub struct ContainerWriteTxn {
    txn: WriteTxn,
    _permit: WriterPermit,
}

impl ContainerWriteTxn {
    /// Commits and returns the new data version.
    pub fn commit(self) -> QuadraResult<u64> {
        self.txn.commit()
    }

    /// Discards the changes.
    pub fn abort(self) -> QuadraResult<()> {
        self.txn.abort()
    }
}

impl Deref for ContainerWriteTxn {
    type Target = WriteTxn;

    fn deref(&self) -> &WriteTxn {
        &self.txn
    }
}

impl DerefMut for ContainerWriteTxn {
    fn deref_mut(&mut self) -> &mut WriteTxn {
        &mut self.txn
    }
}

impl fmt::Debug for ContainerWriteTxn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContainerWriteTxn").field(&self.txn).finish()
    }
}

// =============================================================================
// DatasetSwitchable
// =============================================================================

/// A container whose active store can be replaced atomically.
pub struct DatasetSwitchable {
    location: Location,
    container_path: Option<PathBuf>,
    current: ArcSwap<QuadStore>,
    gate: Arc<WriterGate>,
}

impl DatasetSwitchable {
    /// Creates a container over `store`.
    ///
    /// `container_path` is the container directory; in-memory containers have
    /// none and support no administrative operations.
    pub fn new(location: Location, container_path: Option<PathBuf>, store: Arc<QuadStore>) -> Arc<Self> {
        Arc::new(Self {
            location,
            container_path,
            current: ArcSwap::new(store),
            gate: Arc::new(WriterGate::default()),
        })
    }

    /// Returns the container location.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Returns true if the container has a directory on disk.
    pub fn has_container_path(&self) -> bool {
        self.container_path.is_some()
    }

    /// Returns the container directory.
    pub fn container_path(&self) -> Option<&Path> {
        self.container_path.as_deref()
    }

    /// Returns the active store.
    pub fn get(&self) -> Arc<QuadStore> {
        self.current.load_full()
    }

    /// Installs `new` if the active store is still `expected`.
    ///
    /// Stores are compared by identity. Returns false, leaving the container
    /// unchanged, if another store was active.
    pub fn change(&self, expected: &Arc<QuadStore>, new: Arc<QuadStore>) -> bool {
        let previous = self.current.compare_and_swap(expected, new);
        let swapped = Arc::ptr_eq(&*previous, expected);
        if swapped {
            debug!(container = %self.location, store = %self.get().location(), "active store changed");
        }
        swapped
    }

    /// Installs `new` unconditionally.
    pub fn set(&self, new: Arc<QuadStore>) {
        debug!(container = %self.location, store = %new.location(), "active store set");
        self.current.store(new);
    }

    /// Runs `f` while no container writer is active.
    ///
    /// New writers, through the container or directly on the active store,
    /// wait until `f` returns. Readers are unaffected. `f` must not start a
    /// container write transaction itself.
    pub fn exec_read_only_database<R>(&self, f: impl FnOnce() -> R) -> QuadraResult<R> {
        self.gate.enter_read_only();
        let _guard = ReadOnlyGuard(&self.gate);
        let store = self.get();
        Ok(store.coordinator().exec_as_writer(f)?)
    }

    /// Starts a read transaction on the active store.
    pub fn begin_read(&self) -> QuadraResult<ReadTxn> {
        loop {
            let store = self.get();
            match store.begin_read() {
                Ok(txn) => return Ok(txn),
                Err(e) if self.was_replaced(&store) => {
                    debug!(container = %self.location, error = %e, "store replaced, retrying read");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Starts a write transaction on the active store.
    pub fn begin_write(&self) -> QuadraResult<ContainerWriteTxn> {
        let permit = self.gate.enter_writer();
        loop {
            let store = self.get();
            match store.begin_write() {
                Ok(txn) => {
                    return Ok(ContainerWriteTxn {
                        txn,
                        _permit: permit,
                    })
                }
                Err(e) if self.was_replaced(&store) => {
                    debug!(container = %self.location, error = %e, "store replaced, retrying write");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// A store that refuses transactions and is no longer active was swapped
    /// out between `get` and `begin`.
    fn was_replaced(&self, store: &Arc<QuadStore>) -> bool {
        let coordinator = store.coordinator();
        (coordinator.is_retired() || coordinator.is_shut_down()) && !Arc::ptr_eq(store, &self.get())
    }

    /// Runs `f` in a read transaction.
    pub fn execute_read<R>(&self, f: impl FnOnce(&ReadTxn) -> QuadraResult<R>) -> QuadraResult<R> {
        let txn = self.begin_read()?;
        let result = f(&txn)?;
        txn.end()?;
        Ok(result)
    }

    /// Runs `f` in a write transaction, committing if it succeeds.
    pub fn execute_write<R>(
        &self,
        f: impl FnOnce(&mut WriteTxn) -> QuadraResult<R>,
    ) -> QuadraResult<R> {
        let mut txn = self.begin_write()?;
        let result = f(&mut txn)?;
        txn.commit()?;
        Ok(result)
    }
}

impl fmt::Debug for DatasetSwitchable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetSwitchable")
            .field("location", &self.location)
            .field("store", &self.get().location())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadra_common::config::StoreParams;
    use quadra_common::types::{Quad, Term};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn mem_store() -> Arc<QuadStore> {
        QuadStore::open(Location::mem(), StoreParams::memory_default()).unwrap()
    }

    fn quad(s: &str) -> Quad {
        Quad::triple(Term::iri(s), Term::iri("p"), Term::literal("o"))
    }

    #[test]
    fn test_change_by_identity() {
        let a = mem_store();
        let b = mem_store();
        let c = mem_store();
        let container = DatasetSwitchable::new(Location::mem(), None, Arc::clone(&a));
        assert!(!container.has_container_path());

        assert!(!container.change(&c, Arc::clone(&b)));
        assert!(Arc::ptr_eq(&container.get(), &a));

        assert!(container.change(&a, Arc::clone(&b)));
        assert!(Arc::ptr_eq(&container.get(), &b));

        container.set(Arc::clone(&c));
        assert!(Arc::ptr_eq(&container.get(), &c));
    }

    #[test]
    fn test_execute_write_and_read() {
        let container = DatasetSwitchable::new(Location::mem(), None, mem_store());
        container
            .execute_write(|txn| {
                txn.add(quad("s1"));
                txn.add(quad("s2"));
                Ok(())
            })
            .unwrap();
        let n = container.execute_read(|txn| Ok(txn.len())).unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn test_failed_write_is_discarded() {
        let container = DatasetSwitchable::new(Location::mem(), None, mem_store());
        let result: QuadraResult<()> = container.execute_write(|txn| {
            txn.add(quad("s1"));
            Err(quadra_common::QuadraError::internal("stop"))
        });
        assert!(result.is_err());
        assert_eq!(container.get().len(), 0);
    }

    #[test]
    fn test_read_retries_after_swap() {
        let old = mem_store();
        let container = DatasetSwitchable::new(Location::mem(), None, Arc::clone(&old));
        let new = mem_store();
        {
            let mut txn = new.begin_write().unwrap();
            txn.add(quad("s"));
            txn.commit().unwrap();
        }
        assert!(container.change(&old, new));
        old.coordinator().retire().unwrap();

        let txn = container.begin_read().unwrap();
        assert_eq!(txn.len(), 1);
    }

    #[test]
    fn test_read_only_window_blocks_writers() {
        let container = DatasetSwitchable::new(Location::mem(), None, mem_store());
        let wrote = Arc::new(AtomicBool::new(false));

        container
            .exec_read_only_database(|| {
                let handle = {
                    let container = Arc::clone(&container);
                    let wrote = Arc::clone(&wrote);
                    thread::spawn(move || {
                        container
                            .execute_write(|txn| {
                                txn.add(quad("late"));
                                Ok(())
                            })
                            .unwrap();
                        wrote.store(true, Ordering::SeqCst);
                    })
                };
                thread::sleep(Duration::from_millis(50));
                assert!(!wrote.load(Ordering::SeqCst));
                // Readers still get in.
                assert_eq!(container.begin_read().unwrap().len(), 0);
                handle
            })
            .unwrap()
            .join()
            .unwrap();

        assert!(wrote.load(Ordering::SeqCst));
        assert_eq!(container.get().len(), 1);
    }
}
