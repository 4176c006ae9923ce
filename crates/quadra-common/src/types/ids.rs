//! Identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier.
///
/// Allocated in increasing order by a transaction coordinator. The sequence
/// carries over when a container moves to a new generation, so an id is
/// never handed out twice for one container.
///
/// ```rust
/// use quadra_common::types::TxnId;
///
/// assert!(TxnId::MIN > TxnId::new(0));
/// assert_eq!(TxnId::new(3).to_string(), "txn:3");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(u64);

impl TxnId {
    /// First id a coordinator hands out.
    pub const MIN: Self = Self(1);

    /// Wraps a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txn_id_order() {
        let a = TxnId::new(5);
        let b = TxnId::new(6);
        assert!(a < b);
        assert_eq!(b.as_u64(), 6);
        assert_eq!(a.to_string(), "txn:5");
    }
}
