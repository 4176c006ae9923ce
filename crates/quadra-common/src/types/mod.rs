//! Type definitions for Quadra.
//!
//! This module contains the core type definitions used across the database.

mod ids;
mod location;
mod quad;

pub use ids::TxnId;
pub use location::Location;
pub use quad::{Quad, Term};
