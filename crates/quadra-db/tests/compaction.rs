//! End-to-end compaction tests.
//!
//! These run real containers on temporary directories through
//! `DatabaseMgr`, covering both compaction strategies, failure recovery and
//! concurrent transactions.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use quadra_common::config::DatabaseConfig;
use quadra_common::constants::INCOMPLETE_WIP;
use quadra_common::error::{QuadraError, QuadraResult};
use quadra_common::types::{Location, Quad, Term};
use quadra_db::compact::{CompactionStrategy, InPlaceStrategy, RenameStrategy};
use quadra_db::naming;
use quadra_db::{DatabaseMgr, DatasetSwitchable, OldGeneration};
use quadra_storage::{ConnectionRegistry, DatasetCopier, QuadStore};
use quadra_txn::ExternalComponent;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn manager(strategy: Box<dyn CompactionStrategy>) -> DatabaseMgr {
    init_tracing();
    DatabaseMgr::new(ConnectionRegistry::new(), DatabaseConfig::default())
        .unwrap()
        .with_strategy(strategy)
}

/// Returns the canonical container directory and its location.
fn container_dir(tmp: &TempDir) -> (PathBuf, Location) {
    let location = Location::create(tmp.path().join("db")).unwrap();
    let path = location.path().unwrap().to_path_buf();
    (path, location)
}

fn quad(n: usize) -> Quad {
    Quad::new(
        Term::iri(format!("http://example/s{n}")),
        Term::iri("http://example/p"),
        Term::literal(format!("value {n}")),
        Term::iri("http://example/g"),
    )
}

fn load(container: &DatasetSwitchable, range: std::ops::Range<usize>) {
    container
        .execute_write(|txn| {
            for n in range {
                txn.add(quad(n));
            }
            Ok(())
        })
        .unwrap();
}

fn contents(container: &DatasetSwitchable) -> Vec<Quad> {
    container
        .execute_read(|txn| Ok(txn.iter().cloned().collect()))
        .unwrap()
}

fn active_dir(container: &DatasetSwitchable) -> PathBuf {
    container.get().location().path().unwrap().to_path_buf()
}

fn generation_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("Data"))
        .collect();
    names.sort();
    names
}

/// Copies some quads, then fails.
struct FailingCopier;

impl DatasetCopier for FailingCopier {
    fn copy(&self, source: &QuadStore, dest: &Arc<QuadStore>) -> QuadraResult<u64> {
        let read = source.begin_read()?;
        let mut write = dest.begin_write()?;
        if let Some(first) = read.iter().next() {
            write.add(first.clone());
        }
        write.commit()?;
        read.end()?;
        Err(io::Error::new(io::ErrorKind::Other, "no space left on device").into())
    }
}

#[derive(Debug, Default)]
struct CommitCounter {
    commits: AtomicU64,
    last_version: AtomicU64,
}

impl ExternalComponent for CommitCounter {
    fn name(&self) -> &str {
        "commit-counter"
    }

    fn on_commit(&self, data_version: u64) {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.last_version.store(data_version, Ordering::SeqCst);
    }
}

// =============================================================================
// Rename strategy
// =============================================================================

#[test]
fn test_simple_compaction() {
    let tmp = TempDir::new().unwrap();
    let (dir, location) = container_dir(&tmp);
    let mgr = manager(Box::new(RenameStrategy));

    let container = mgr.connect(&location).unwrap();
    load(&container, 0..1);

    let outcome = mgr.compact(&container, true).unwrap();
    assert_eq!(outcome.quads_copied, 1);
    assert_eq!(outcome.old_generation, OldGeneration::Deleted);
    assert_eq!(outcome.previous, dir.join("Data-0001"));
    assert_eq!(outcome.current, dir.join("Data-0002"));

    assert!(!dir.join("Data-0001").exists());
    assert!(dir.join("Data-0002").is_dir());
    assert!(!dir.join("Data-0002-tmp").exists());
    assert_eq!(active_dir(&container), dir.join("Data-0002"));
    assert_eq!(contents(&container), vec![quad(0)]);
}

#[test]
fn test_compaction_preserves_contents() {
    let tmp = TempDir::new().unwrap();
    let (_, location) = container_dir(&tmp);
    let mgr = manager(Box::new(RenameStrategy));

    let container = mgr.connect(&location).unwrap();
    load(&container, 0..200);
    container
        .execute_write(|txn| {
            for n in (0..200).step_by(3) {
                txn.remove(&quad(n));
            }
            Ok(())
        })
        .unwrap();
    let before = contents(&container);

    let outcome = mgr.compact(&container, true).unwrap();
    assert_eq!(outcome.quads_copied, before.len() as u64);
    assert_eq!(contents(&container), before);
}

#[test]
fn test_generation_monotonicity() {
    let tmp = TempDir::new().unwrap();
    let (dir, location) = container_dir(&tmp);
    let mgr = manager(Box::new(RenameStrategy));

    let container = mgr.connect(&location).unwrap();
    load(&container, 0..10);
    for _ in 0..3 {
        let outcome = mgr.compact(&container, false).unwrap();
        assert_eq!(outcome.old_generation, OldGeneration::Retained);
    }

    assert_eq!(
        generation_names(&dir),
        vec!["Data-0001", "Data-0002", "Data-0003", "Data-0004"]
    );
    assert_eq!(
        naming::find_storage_location(&dir).unwrap(),
        Some(dir.join("Data-0004"))
    );
    assert_eq!(active_dir(&container), dir.join("Data-0004"));
    assert_eq!(contents(&container).len(), 10);
}

#[test]
fn test_failed_compaction_leaves_state_untouched() {
    let tmp = TempDir::new().unwrap();
    let (dir, location) = container_dir(&tmp);
    let mgr = manager(Box::new(RenameStrategy)).with_copier(Arc::new(FailingCopier));

    let container = mgr.connect(&location).unwrap();
    load(&container, 0..5);
    let store = container.get();

    let err = mgr.compact(&container, true).unwrap_err();
    assert_eq!(err.io_kind(), Some(io::ErrorKind::Other));

    assert!(Arc::ptr_eq(&container.get(), &store));
    assert!(!store.coordinator().is_retired());
    assert_eq!(generation_names(&dir), vec!["Data-0001"]);
    assert_eq!(contents(&container).len(), 5);

    // Writers are admitted again.
    load(&container, 5..6);
    assert_eq!(contents(&container).len(), 6);
}

#[test]
fn test_compaction_rejects_stale_container() {
    let tmp = TempDir::new().unwrap();
    let (dir, location) = container_dir(&tmp);
    let mgr = manager(Box::new(RenameStrategy));

    let container = mgr.connect(&location).unwrap();
    fs::create_dir_all(dir.join("Data-0005")).unwrap();

    let err = mgr.compact(&container, false).unwrap_err();
    assert!(matches!(err, QuadraError::InconsistentState { .. }));
    assert_eq!(generation_names(&dir), vec!["Data-0001", "Data-0005"]);
    assert_eq!(active_dir(&container), dir.join("Data-0001"));
}

#[test]
fn test_compaction_rejects_expelled_store_without_reopening() {
    let tmp = TempDir::new().unwrap();
    let (dir, location) = container_dir(&tmp);
    let mgr = manager(Box::new(RenameStrategy));

    let container = mgr.connect(&location).unwrap();
    let generation = container.get().location().clone();
    mgr.registry().internal_expel(&generation, true).unwrap();

    let err = mgr.compact(&container, false).unwrap_err();
    assert!(matches!(err, QuadraError::InconsistentState { .. }));
    assert!(!mgr.registry().is_cached(&generation));
    assert!(mgr.registry().is_empty());
    assert_eq!(generation_names(&dir), vec!["Data-0001"]);
    assert_eq!(active_dir(&container), dir.join("Data-0001"));
}

#[test]
fn test_compaction_unsupported_in_memory() {
    let mgr = manager(Box::new(RenameStrategy));
    let container = mgr.connect(&Location::mem()).unwrap();

    let err = mgr.compact(&container, false).unwrap_err();
    assert!(matches!(err, QuadraError::UnsupportedOperation { .. }));
}

// =============================================================================
// Transactions across the switch
// =============================================================================

#[test]
fn test_old_generation_retired() {
    let tmp = TempDir::new().unwrap();
    let (_, location) = container_dir(&tmp);
    let mgr = manager(Box::new(RenameStrategy));

    let container = mgr.connect(&location).unwrap();
    load(&container, 0..3);
    let old = container.get();

    mgr.compact(&container, false).unwrap();

    assert!(old.coordinator().is_retired());
    assert!(old.begin_read().is_err());
    assert!(old.begin_write().is_err());
    assert!(!mgr.registry().is_cached(old.location()));
    assert!(!container.get().coordinator().is_retired());
}

#[test]
fn test_reader_in_flight_during_compaction() {
    let tmp = TempDir::new().unwrap();
    let (_, location) = container_dir(&tmp);
    let mgr = Arc::new(manager(Box::new(RenameStrategy)));

    let container = mgr.connect(&location).unwrap();
    load(&container, 0..4);
    let old = container.get();
    let reader = container.begin_read().unwrap();

    let handle = {
        let mgr = Arc::clone(&mgr);
        let container = Arc::clone(&container);
        thread::spawn(move || mgr.compact(&container, false))
    };

    // The switch happens while the reader is open; retirement then waits.
    let deadline = Instant::now() + Duration::from_secs(10);
    while Arc::ptr_eq(&container.get(), &old) {
        assert!(Instant::now() < deadline, "compaction did not switch");
        thread::sleep(Duration::from_millis(5));
    }

    load(&container, 4..5);
    assert_eq!(reader.len(), 4);
    assert!(!reader.contains(&quad(4)));
    assert_eq!(old.len(), 4);
    reader.end().unwrap();

    let outcome = handle.join().unwrap().unwrap();
    assert_eq!(outcome.quads_copied, 4);
    assert!(old.coordinator().is_retired());
    assert_eq!(contents(&container).len(), 5);
}

#[test]
fn test_externals_and_version_carried_over() {
    let tmp = TempDir::new().unwrap();
    let (_, location) = container_dir(&tmp);
    let mgr = manager(Box::new(RenameStrategy));

    let container = mgr.connect(&location).unwrap();
    let counter = Arc::new(CommitCounter::default());
    container.get().coordinator().add_external(counter.clone());

    load(&container, 0..1);
    load(&container, 1..2);
    let version = container.get().coordinator().data_version();
    assert_eq!(counter.commits.load(Ordering::SeqCst), 2);

    mgr.compact(&container, true).unwrap();
    let coordinator = Arc::clone(container.get().coordinator());
    assert!(coordinator.data_version() >= version);
    assert_eq!(coordinator.externals().len(), 1);

    load(&container, 2..3);
    assert_eq!(counter.commits.load(Ordering::SeqCst), 3);
    assert!(counter.last_version.load(Ordering::SeqCst) > version);
}

// =============================================================================
// In-place strategy
// =============================================================================

#[test]
fn test_in_place_deferred_deletion() {
    let tmp = TempDir::new().unwrap();
    let (dir, location) = container_dir(&tmp);
    let mgr = manager(Box::new(InPlaceStrategy));

    let container = mgr.connect(&location).unwrap();
    load(&container, 0..3);

    let outcome = mgr.compact(&container, true).unwrap();
    assert_eq!(outcome.old_generation, OldGeneration::DeletionDeferred);
    assert!(dir.join("Data-0001").exists());
    assert_eq!(
        naming::pending_deletions(&dir).unwrap(),
        vec![dir.join("Data-0001")]
    );
    assert_eq!(active_dir(&container), dir.join("Data-0002"));

    mgr.release(&location).unwrap();
    let container = mgr.connect(&location).unwrap();

    assert!(!dir.join("Data-0001").exists());
    assert!(!dir.join(INCOMPLETE_WIP).exists());
    assert_eq!(active_dir(&container), dir.join("Data-0002"));
    assert_eq!(contents(&container).len(), 3);
}

#[test]
fn test_in_place_failure_discards_target() {
    let tmp = TempDir::new().unwrap();
    let (dir, location) = container_dir(&tmp);
    let mgr = manager(Box::new(InPlaceStrategy)).with_copier(Arc::new(FailingCopier));

    let container = mgr.connect(&location).unwrap();
    load(&container, 0..3);

    assert!(mgr.compact(&container, true).is_err());
    assert_eq!(generation_names(&dir), vec!["Data-0001"]);
    assert!(!dir.join(INCOMPLETE_WIP).exists());
    assert_eq!(active_dir(&container), dir.join("Data-0001"));
    assert_eq!(contents(&container).len(), 3);
}

#[test]
fn test_in_place_crash_recovery() {
    let tmp = TempDir::new().unwrap();
    let (dir, location) = container_dir(&tmp);

    {
        let mgr = manager(Box::new(InPlaceStrategy));
        let container = mgr.connect(&location).unwrap();
        load(&container, 0..2);
        mgr.reset();
    }

    // A copy interrupted after the target was recorded and created.
    naming::record_pending_deletion(&dir, &dir.join("Data-0002")).unwrap();
    fs::create_dir_all(dir.join("Data-0002")).unwrap();

    let mgr = manager(Box::new(InPlaceStrategy));
    let container = mgr.connect(&location).unwrap();
    assert_eq!(generation_names(&dir), vec!["Data-0001"]);
    assert_eq!(active_dir(&container), dir.join("Data-0001"));
    assert_eq!(contents(&container).len(), 2);
}
