//! The quad storage engine.
//!
//! A [`QuadStore`] keeps its quads as an immutable sorted set behind an `Arc`.
//! Readers take the current set and keep it for their whole transaction;
//! the single writer works on a private copy that replaces the shared one on
//! commit. For on-disk stores every write commit rewrites the data file
//! through a temporary file and a rename.
//!
//! ```text
//!   begin_read ──▶ Arc<BTreeSet<Quad>> (snapshot) ──▶ iterate
//!
//!   begin_write ──▶ clone of snapshot ──▶ add/remove
//!                                          │
//!                                 commit   ▼
//!                    quads.json.tmp ──rename──▶ quads.json
//!                                          │
//!                                          ▼
//!                               install as current set
//! ```

mod copy;
mod store;
mod txn;

pub use copy::{DatasetCopier, QuadCopier};
pub use store::QuadStore;
pub use txn::{ReadTxn, WriteTxn};
