//! Error handling for Quadra.
//!
//! This module provides a unified error type and result alias used
//! across all Quadra crates.

mod database;

pub use database::{ErrorCode, QuadraError};

/// Result type alias for Quadra operations.
pub type QuadraResult<T> = std::result::Result<T, QuadraError>;
