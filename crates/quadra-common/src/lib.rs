//! # quadra-common
//!
//! Common types, errors, and configuration for Quadra.
//!
//! This crate provides the foundational types used across all Quadra
//! components. It includes:
//!
//! - **Types**: storage `Location`s, RDF `Quad`s and `Term`s, `TxnId`
//! - **Errors**: unified error handling with `QuadraError`
//! - **Config**: `StoreParams` (persisted engine settings) and `DatabaseConfig`
//! - **Constants**: on-disk names shared by every layer
//!
//! ## Example
//!
//! ```rust
//! use quadra_common::types::{Location, Quad, Term};
//! use quadra_common::error::QuadraResult;
//!
//! fn example() -> QuadraResult<()> {
//!     let location = Location::mem();
//!     assert!(location.is_mem());
//!     let quad = Quad::triple(
//!         Term::iri("http://example/s"),
//!         Term::iri("http://example/p"),
//!         Term::literal("o"),
//!     );
//!     assert!(quad.graph.is_none());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::{DatabaseConfig, StoreParams};
pub use error::{ErrorCode, QuadraError, QuadraResult};
pub use types::{Location, Quad, Term, TxnId};
