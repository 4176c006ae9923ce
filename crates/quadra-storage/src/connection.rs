//! Connections to storage locations.
//!
//! A [`ConnectionRegistry`] hands out one [`StoreConnection`] per location,
//! so a location is never opened twice by the same registry. On-disk
//! connections hold the location's [`ProcessLock`], so a location is never
//! opened twice by the same process or by two processes either.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use quadra_common::config::StoreParams;
use quadra_common::constants::{DATA_FILE, LOCK_FILE};
use quadra_common::error::{QuadraError, QuadraResult};
use quadra_common::types::Location;
use tracing::{debug, info, warn};

use crate::engine::QuadStore;
use crate::lock::ProcessLock;

// =============================================================================
// StoreConnection
// =============================================================================

/// An opened store together with the lock that guards its directory.
pub struct StoreConnection {
    location: Location,
    store: Arc<QuadStore>,
    lock: Option<ProcessLock>,
}

impl StoreConnection {
    /// Returns the location.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<QuadStore> {
        &self.store
    }

    /// Returns the parameters the store was opened with.
    pub fn params(&self) -> &StoreParams {
        self.store.params()
    }

    /// Returns true if this connection holds a process lock.
    pub fn is_locked(&self) -> bool {
        self.lock.as_ref().is_some_and(ProcessLock::is_locked)
    }

    fn shutdown(&self) {
        self.store.shutdown();
        if let Some(lock) = &self.lock {
            lock.release();
        }
    }
}

impl fmt::Debug for StoreConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConnection")
            .field("location", &self.location)
            .field("locked", &self.is_locked())
            .finish()
    }
}

// =============================================================================
// ConnectionRegistry
// =============================================================================

/// Cache of open connections, keyed by location.
///
/// Unique in-memory locations are never cached: every connect creates a new
/// store. All mutating operations are serialized.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<Location, Arc<StoreConnection>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the process-wide registry.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<ConnectionRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(ConnectionRegistry::new))
    }

    /// Connects to `location`, creating storage if there is none.
    ///
    /// Parameters persisted at the location take precedence over `params`.
    /// For a brand-new on-disk location, non-default `params` are persisted.
    pub fn connect_create(
        &self,
        location: &Location,
        params: Option<&StoreParams>,
    ) -> QuadraResult<Arc<StoreConnection>> {
        let mut connections = self.connections.lock();
        if let Some(conn) = connections.get(location) {
            return Ok(Arc::clone(conn));
        }

        let conn = Arc::new(Self::open(location, params)?);
        if !location.is_mem_unique() {
            connections.insert(location.clone(), Arc::clone(&conn));
        }
        Ok(conn)
    }

    /// Connects to `location` only if storage already exists there.
    pub fn connect_existing(&self, location: &Location) -> QuadraResult<Option<Arc<StoreConnection>>> {
        let mut connections = self.connections.lock();
        if let Some(conn) = connections.get(location) {
            return Ok(Some(Arc::clone(conn)));
        }
        if !Self::has_storage(location) {
            return Ok(None);
        }

        let conn = Arc::new(Self::open(location, None)?);
        connections.insert(location.clone(), Arc::clone(&conn));
        Ok(Some(conn))
    }

    /// Returns the cached connection to `location` without opening anything.
    pub fn get(&self, location: &Location) -> Option<Arc<StoreConnection>> {
        self.connections.lock().get(location).cloned()
    }

    /// Returns true if storage exists at `location`.
    pub fn is_setup(&self, location: &Location) -> bool {
        self.connections.lock().contains_key(location) || Self::has_storage(location)
    }

    fn has_storage(location: &Location) -> bool {
        match location {
            Location::Directory(_) => location.has_file(DATA_FILE),
            _ => false,
        }
    }

    fn open(location: &Location, params: Option<&StoreParams>) -> QuadraResult<StoreConnection> {
        let Some(dir) = location.path() else {
            let params = params.cloned().unwrap_or_else(StoreParams::memory_default);
            let store = QuadStore::open(location.clone(), params)?;
            debug!(location = %location, "connected to in-memory store");
            return Ok(StoreConnection {
                location: location.clone(),
                store,
                lock: None,
            });
        };

        fs::create_dir_all(dir).map_err(|e| QuadraError::io_path(dir, e))?;
        let lock = ProcessLock::acquire(dir.join(LOCK_FILE))?;

        let is_new = !location.has_file(DATA_FILE);
        let persisted = StoreParams::read(dir)?;
        let params = match persisted {
            Some(persisted) => {
                if params.is_some_and(|p| *p != persisted) {
                    debug!(location = %location, "using persisted store params over caller params");
                }
                persisted
            }
            None => {
                let params = params.cloned().unwrap_or_default();
                if is_new && !params.is_default() {
                    params.write(dir)?;
                }
                params
            }
        };

        let store = QuadStore::open(location.clone(), params)?;
        info!(location = %location, new = is_new, "connected to store");
        Ok(StoreConnection {
            location: location.clone(),
            store,
            lock: Some(lock),
        })
    }

    /// Releases the connection to `location`.
    ///
    /// Fails with `ActiveTransactions` while the store has open transactions.
    /// Releasing a location that is not connected does nothing.
    pub fn release(&self, location: &Location) -> QuadraResult<()> {
        self.internal_expel(location, false)
    }

    /// Removes the connection to `location` and shuts its store down.
    ///
    /// With `force`, open transactions do not prevent it.
    pub fn internal_expel(&self, location: &Location, force: bool) -> QuadraResult<()> {
        let mut connections = self.connections.lock();
        let Some(conn) = connections.get(location) else {
            return Ok(());
        };

        let active = conn.store.coordinator().active_count();
        if active > 0 {
            if !force {
                return Err(QuadraError::ActiveTransactions {
                    location: location.to_string(),
                    count: active,
                });
            }
            warn!(location = %location, active, "expelling store with active transactions");
        }

        if let Some(conn) = connections.remove(location) {
            conn.shutdown();
        }
        debug!(location = %location, "connection expelled");
        Ok(())
    }

    /// Expels every connection.
    pub fn reset(&self) {
        let drained: Vec<_> = self.connections.lock().drain().collect();
        for (location, conn) in drained {
            conn.shutdown();
            debug!(location = %location, "connection expelled on reset");
        }
    }

    /// Returns true if `location` has a cached connection.
    pub fn is_cached(&self, location: &Location) -> bool {
        self.connections.lock().contains_key(location)
    }

    /// Returns the number of cached connections.
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Returns true if no connection is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .finish()
    }
}
