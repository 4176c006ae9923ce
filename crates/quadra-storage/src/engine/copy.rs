//! Bulk copy between stores.

use std::sync::Arc;

use quadra_common::error::QuadraResult;
use tracing::debug;

use super::store::QuadStore;

/// Copies the full contents of one store into another.
pub trait DatasetCopier: Send + Sync {
    /// Copies everything in `source` into `dest`. Returns the number of quads
    /// copied.
    fn copy(&self, source: &QuadStore, dest: &Arc<QuadStore>) -> QuadraResult<u64>;
}

/// Copies inside one read transaction on the source and one write
/// transaction on the destination.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuadCopier;

impl DatasetCopier for QuadCopier {
    fn copy(&self, source: &QuadStore, dest: &Arc<QuadStore>) -> QuadraResult<u64> {
        let read = source.begin_read()?;
        let mut write = dest.begin_write()?;

        let mut copied = 0u64;
        for quad in read.iter() {
            if write.add(quad.clone()) {
                copied += 1;
            }
        }
        write.commit()?;
        read.end()?;

        debug!(
            source = %source.location(),
            dest = %dest.location(),
            copied,
            "dataset copied"
        );
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadra_common::config::StoreParams;
    use quadra_common::types::{Location, Quad, Term};

    #[test]
    fn test_copy_all_quads() {
        let source = QuadStore::open(Location::mem(), StoreParams::memory_default()).unwrap();
        let mut txn = source.begin_write().unwrap();
        for n in 0..10 {
            txn.add(Quad::new(
                Term::iri(format!("s{n}")),
                Term::iri("p"),
                Term::literal("o"),
                Term::iri("g"),
            ));
        }
        txn.commit().unwrap();

        let dest = QuadStore::open(Location::mem(), StoreParams::memory_default()).unwrap();
        assert_eq!(QuadCopier.copy(&source, &dest).unwrap(), 10);
        assert_eq!(dest.len(), 10);
        assert_eq!(source.coordinator().active_count(), 0);
        assert_eq!(dest.coordinator().active_count(), 0);
    }
}
