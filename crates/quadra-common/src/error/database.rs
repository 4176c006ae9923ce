//! Database error types.
//!
//! Every failure surfaced by the storage core maps to one `QuadraError`
//! variant, and every variant to a stable `ErrorCode`.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Operation not supported for this kind of location.
    UnsupportedOperation = 0x0002,
    /// Invalid argument provided.
    InvalidArgument = 0x0003,
    /// Invalid configuration.
    InvalidConfig = 0x0004,

    // I/O errors (0x0100 - 0x01FF)
    /// General I/O error.
    Io = 0x0100,
    /// Location does not exist.
    NoSuchLocation = 0x0101,
    /// Data corruption detected.
    Corruption = 0x0104,
    /// Unique file allocation gave up.
    TooManyAttempts = 0x0105,

    // Storage errors (0x0200 - 0x02FF)
    /// Container directory is in an unexpected state.
    InconsistentState = 0x0200,
    /// Process lock already held.
    LockHeld = 0x0201,

    // Transaction errors (0x0300 - 0x03FF)
    /// Engine still has open transactions.
    ActiveTransactions = 0x0300,
    /// Transaction could not begin or complete.
    Transaction = 0x0301,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x02 => "Storage",
            0x03 => "Transaction",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for Quadra.
///
/// # Example
///
/// ```rust
/// use quadra_common::error::{ErrorCode, QuadraError, QuadraResult};
///
/// fn open(path: &str) -> QuadraResult<()> {
///     Err(QuadraError::no_such_location(path))
/// }
///
/// assert_eq!(open("/nowhere").unwrap_err().code(), ErrorCode::NoSuchLocation);
/// ```
#[derive(Debug, Error)]
pub enum QuadraError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug or an unexpected environment.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Operation is not supported for this location.
    #[error("operation not supported: {operation}")]
    UnsupportedOperation {
        /// The unsupported operation.
        operation: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// I/O error on a known path.
    #[error("I/O error on {}: {source}", path.display())]
    IoPath {
        /// Path being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Location does not exist.
    #[error("no such location: {location}")]
    NoSuchLocation {
        /// The missing location.
        location: String,
    },

    /// Data corruption detected.
    #[error("data corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Unique file allocation exhausted its attempts.
    #[error("could not create a unique file for '{base}' after {attempts} attempts")]
    TooManyAttempts {
        /// Base name that kept colliding.
        base: String,
        /// Attempts made.
        attempts: u32,
    },

    // ==========================================================================
    // Storage Errors
    // ==========================================================================
    /// Container directory holds something unexpected.
    #[error("inconsistent state: {message}")]
    InconsistentState {
        /// Description of the problem.
        message: String,
    },

    /// Another holder owns the process lock.
    #[error("lock already held: {}", path.display())]
    LockHeld {
        /// The lock file.
        path: PathBuf,
    },

    // ==========================================================================
    // Transaction Errors
    // ==========================================================================
    /// Engine still has open transactions.
    #[error("{count} active transaction(s) on {location}")]
    ActiveTransactions {
        /// The busy location.
        location: String,
        /// Open transactions at the time of the check.
        count: u64,
    },

    /// Transaction could not begin or complete.
    #[error("transaction error: {reason}")]
    Transaction {
        /// Reason for failure.
        reason: String,
    },
}

impl QuadraError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::UnsupportedOperation { .. } => ErrorCode::UnsupportedOperation,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::Io { .. } | Self::IoPath { .. } => ErrorCode::Io,
            Self::NoSuchLocation { .. } => ErrorCode::NoSuchLocation,
            Self::Corruption { .. } => ErrorCode::Corruption,
            Self::TooManyAttempts { .. } => ErrorCode::TooManyAttempts,
            Self::InconsistentState { .. } => ErrorCode::InconsistentState,
            Self::LockHeld { .. } => ErrorCode::LockHeld,
            Self::ActiveTransactions { .. } => ErrorCode::ActiveTransactions,
            Self::Transaction { .. } => ErrorCode::Transaction,
        }
    }

    /// Returns true if retrying later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ActiveTransactions { .. } | Self::LockHeld { .. } | Self::TooManyAttempts { .. }
        )
    }

    /// Returns the underlying I/O error kind, if any.
    #[must_use]
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io { source } | Self::IoPath { source, .. } => Some(source.kind()),
            _ => None,
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    #[must_use]
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a missing location error.
    #[must_use]
    pub fn no_such_location(location: impl fmt::Display) -> Self {
        Self::NoSuchLocation {
            location: location.to_string(),
        }
    }

    /// Creates an inconsistent state error.
    #[must_use]
    pub fn inconsistent_state(message: impl Into<String>) -> Self {
        Self::InconsistentState {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a transaction error.
    #[must_use]
    pub fn transaction(reason: impl Into<String>) -> Self {
        Self::Transaction {
            reason: reason.into(),
        }
    }

    /// Wraps an I/O error with the path it happened on.
    #[must_use]
    pub fn io_path(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::IoPath {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for QuadraError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Self::Io { source: err.into() }
        } else {
            Self::Corruption {
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = QuadraError::LockHeld {
            path: PathBuf::from("/db/tdb.lock"),
        };
        assert_eq!(err.code(), ErrorCode::LockHeld);
        assert_eq!(err.code().category(), "Storage");
        assert_eq!(
            QuadraError::transaction("x").code().category(),
            "Transaction"
        );
    }

    #[test]
    fn test_error_display() {
        let err = QuadraError::ActiveTransactions {
            location: "/db/Data-0001".into(),
            count: 2,
        };
        assert_eq!(err.to_string(), "2 active transaction(s) on /db/Data-0001");

        let err = QuadraError::TooManyAttempts {
            base: "backup_x".into(),
            attempts: 5,
        };
        assert!(err.to_string().contains("5 attempts"));
    }

    #[test]
    fn test_retryable() {
        assert!(QuadraError::LockHeld {
            path: PathBuf::new()
        }
        .is_retryable());
        assert!(!QuadraError::unsupported("compact").is_retryable());
    }

    #[test]
    fn test_io_error_from() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: QuadraError = io_err.into();
        assert_eq!(err.code(), ErrorCode::Io);
        assert_eq!(err.io_kind(), Some(io::ErrorKind::PermissionDenied));

        let err = QuadraError::io_path("/x", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.io_kind(), Some(io::ErrorKind::NotFound));
        assert!(err.to_string().starts_with("I/O error on /x"));
    }

    #[test]
    fn test_json_error_is_corruption() {
        let err: QuadraError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::Corruption);
    }
}
