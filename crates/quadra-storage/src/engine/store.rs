//! Store lifecycle and persistence.

use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use quadra_common::config::StoreParams;
use quadra_common::constants::{DATA_FILE, DATA_FILE_TMP};
use quadra_common::error::{QuadraError, QuadraResult};
use quadra_common::types::{Location, Quad};
use quadra_txn::{TransactionCoordinator, TxnMode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::txn::{ReadTxn, WriteTxn};

/// Data file format version.
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct DataFileOut<'a> {
    format: u32,
    quads: &'a BTreeSet<Quad>,
}

#[derive(Deserialize)]
struct DataFileIn {
    format: u32,
    quads: BTreeSet<Quad>,
}

/// A transactional quad store at one location.
pub struct QuadStore {
    location: Location,
    params: StoreParams,
    coordinator: Arc<TransactionCoordinator>,
    current: RwLock<Arc<BTreeSet<Quad>>>,
}

impl QuadStore {
    /// Opens the store at `location`, creating its data file if absent.
    ///
    /// This does not take the process lock; callers go through the
    /// connection registry for that.
    pub fn open(location: Location, params: StoreParams) -> QuadraResult<Arc<Self>> {
        params.validate()?;

        let quads = match location.path() {
            Some(dir) => Self::load_or_create(dir, &params)?,
            None => BTreeSet::new(),
        };

        info!(location = %location, quads = quads.len(), "store opened");

        Ok(Arc::new(Self {
            coordinator: TransactionCoordinator::new(location.to_string()),
            location,
            params,
            current: RwLock::new(Arc::new(quads)),
        }))
    }

    fn load_or_create(dir: &Path, params: &StoreParams) -> QuadraResult<BTreeSet<Quad>> {
        fs::create_dir_all(dir).map_err(|e| QuadraError::io_path(dir, e))?;

        // A leftover temporary file is an interrupted commit; the data file
        // still holds the last committed state.
        let tmp = dir.join(DATA_FILE_TMP);
        match fs::remove_file(&tmp) {
            Ok(()) => debug!(path = %tmp.display(), "removed interrupted commit"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(QuadraError::io_path(&tmp, e)),
        }

        let path = dir.join(DATA_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let empty = BTreeSet::new();
                write_data_file(dir, &empty, params.sync_on_commit)?;
                return Ok(empty);
            }
            Err(e) => return Err(QuadraError::io_path(&path, e)),
        };

        let data: DataFileIn = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| QuadraError::corruption(format!("{}: {e}", path.display())))?;
        if data.format != FORMAT_VERSION {
            return Err(QuadraError::corruption(format!(
                "{}: unsupported format {}",
                path.display(),
                data.format
            )));
        }
        Ok(data.quads)
    }

    /// Starts a read transaction on the current contents.
    pub fn begin_read(&self) -> QuadraResult<ReadTxn> {
        let txn = self.coordinator.begin(TxnMode::Read)?;
        let snapshot = Arc::clone(&*self.current.read());
        Ok(ReadTxn::new(txn, snapshot))
    }

    /// Starts the write transaction, waiting for any other writer to finish.
    pub fn begin_write(self: &Arc<Self>) -> QuadraResult<WriteTxn> {
        let txn = self.coordinator.begin(TxnMode::Write)?;
        let working = (**self.current.read()).clone();
        Ok(WriteTxn::new(Arc::clone(self), txn, working))
    }

    /// Makes `quads` the committed contents.
    pub(super) fn install(&self, quads: BTreeSet<Quad>) -> QuadraResult<()> {
        if let Some(dir) = self.location.path() {
            write_data_file(dir, &quads, self.params.sync_on_commit)?;
        }
        *self.current.write() = Arc::new(quads);
        Ok(())
    }

    /// Returns the number of committed quads.
    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    /// Returns true if the store holds no quads.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the store location.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Returns the parameters the store was opened with.
    pub fn params(&self) -> &StoreParams {
        &self.params
    }

    /// Returns the transaction coordinator.
    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    /// Stops admitting transactions.
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
        info!(location = %self.location, "store shut down");
    }

    /// Returns true once the store has been shut down.
    pub fn is_shut_down(&self) -> bool {
        self.coordinator.is_shut_down()
    }
}

impl fmt::Debug for QuadStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuadStore")
            .field("location", &self.location)
            .field("quads", &self.len())
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

fn write_data_file(dir: &Path, quads: &BTreeSet<Quad>, sync: bool) -> QuadraResult<()> {
    let tmp = dir.join(DATA_FILE_TMP);
    let path = dir.join(DATA_FILE);

    let file = File::create(&tmp).map_err(|e| QuadraError::io_path(&tmp, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(
        &mut writer,
        &DataFileOut {
            format: FORMAT_VERSION,
            quads,
        },
    )?;
    writer.flush().map_err(|e| QuadraError::io_path(&tmp, e))?;
    if sync {
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| QuadraError::io_path(&tmp, e))?;
    }
    drop(writer);

    fs::rename(&tmp, &path).map_err(|e| QuadraError::io_path(&path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadra_common::types::Term;
    use tempfile::TempDir;

    fn quad(n: u32) -> Quad {
        Quad::triple(
            Term::iri(format!("http://ex/s{n}")),
            Term::iri("http://ex/p"),
            Term::literal(n.to_string()),
        )
    }

    #[test]
    fn test_open_creates_data_file() {
        let tmp = TempDir::new().unwrap();
        let location = Location::create(tmp.path().join("Data-0001")).unwrap();

        let store = QuadStore::open(location.clone(), StoreParams::default()).unwrap();
        assert!(store.is_empty());
        assert!(location.has_file(DATA_FILE));
    }

    #[test]
    fn test_write_persists() {
        let tmp = TempDir::new().unwrap();
        let location = Location::create(tmp.path().join("db")).unwrap();

        {
            let store = QuadStore::open(location.clone(), StoreParams::default()).unwrap();
            let mut txn = store.begin_write().unwrap();
            txn.add(quad(1));
            txn.add(quad(2));
            assert_eq!(txn.commit().unwrap(), 1);
            assert_eq!(store.len(), 2);
        }

        let store = QuadStore::open(location.clone(), StoreParams::default()).unwrap();
        assert_eq!(store.len(), 2);
        assert!(!location.has_file(DATA_FILE_TMP));
    }

    #[test]
    fn test_abort_discards() {
        let store = QuadStore::open(Location::mem(), StoreParams::memory_default()).unwrap();
        let mut txn = store.begin_write().unwrap();
        txn.add(quad(1));
        txn.abort().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_read_by_graph() {
        let store = QuadStore::open(Location::mem(), StoreParams::memory_default()).unwrap();
        let named = Term::iri("http://ex/g");
        let mut writer = store.begin_write().unwrap();
        writer.add(quad(1));
        writer.add(Quad::new(
            Term::iri("http://ex/s2"),
            Term::iri("http://ex/p"),
            Term::literal("2"),
            named.clone(),
        ));
        writer.commit().unwrap();

        let reader = store.begin_read().unwrap();
        let default: Vec<_> = reader.graph(None).collect();
        assert_eq!(default, vec![&quad(1)]);
        let in_named: Vec<_> = reader.graph(Some(&named)).collect();
        assert_eq!(in_named.len(), 1);
        assert_eq!(in_named[0].graph.as_ref(), Some(&named));
        assert_eq!(reader.graph(Some(&Term::iri("http://ex/none"))).count(), 0);
        reader.end().unwrap();
    }

    #[test]
    fn test_reader_keeps_snapshot() {
        let store = QuadStore::open(Location::mem(), StoreParams::memory_default()).unwrap();
        let reader = store.begin_read().unwrap();

        let mut writer = store.begin_write().unwrap();
        writer.add(quad(1));
        writer.commit().unwrap();

        assert_eq!(reader.len(), 0);
        assert_eq!(store.begin_read().unwrap().len(), 1);
    }

    #[test]
    fn test_interrupted_commit_ignored() {
        let tmp = TempDir::new().unwrap();
        let location = Location::create(tmp.path().join("db")).unwrap();
        {
            let store = QuadStore::open(location.clone(), StoreParams::default()).unwrap();
            let mut txn = store.begin_write().unwrap();
            txn.add(quad(1));
            txn.commit().unwrap();
        }
        fs::write(location.file(DATA_FILE_TMP).unwrap(), "{\"format\":1,").unwrap();

        let store = QuadStore::open(location.clone(), StoreParams::default()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(!location.has_file(DATA_FILE_TMP));
    }

    #[test]
    fn test_corrupt_data_file() {
        let tmp = TempDir::new().unwrap();
        let location = Location::create(tmp.path().join("db")).unwrap();
        fs::write(location.file(DATA_FILE).unwrap(), "garbage").unwrap();

        let err = QuadStore::open(location, StoreParams::default()).unwrap_err();
        assert!(matches!(err, QuadraError::Corruption { .. }));
    }

    #[test]
    fn test_shutdown_refuses_transactions() {
        let store = QuadStore::open(Location::mem(), StoreParams::memory_default()).unwrap();
        store.shutdown();
        assert!(store.is_shut_down());
        let err = store.begin_read().unwrap_err();
        assert_eq!(err.code(), quadra_common::ErrorCode::Transaction);
    }
}
