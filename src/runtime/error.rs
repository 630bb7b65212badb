//! Error types for the tandem runtime
//!
//! Domain errors use thiserror; `anyhow` only appears at the config-loading
//! boundary.

use std::io;
use thiserror::Error;

use super::registry::CellId;

/// Top-level runtime error
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Cell operation errors
    #[error("Cell error: {0}")]
    Cell(#[from] CellError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The realtime worker thread could not be started
    #[error("Failed to spawn realtime runtime thread: {0}")]
    Spawn(io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by cell operations
#[derive(Debug, Error)]
pub enum CellError {
    /// The operation needs authoritative storage, which this context does not hold
    #[error("`{operation}` must be called from the {expected}")]
    InvalidContext {
        /// Operation that was attempted
        operation: &'static str,
        /// Execution context the operation requires
        expected: &'static str,
    },

    /// The value could not be cloned for transfer to the other runtime
    #[error("Clone for transfer failed: {0}")]
    Clone(#[from] CloneError),

    /// A realtime cell exists under this id with another value type
    #[error("Cell {id} does not hold values of type {expected}")]
    TypeMismatch {
        /// Cell identifier
        id: CellId,
        /// Requested value type
        expected: &'static str,
    },
}

impl CellError {
    /// Build an `InvalidContext` error for an operation that needs the realtime runtime
    pub fn realtime_only(operation: &'static str) -> Self {
        CellError::InvalidContext {
            operation,
            expected: "realtime runtime",
        }
    }
}

/// Failure to produce a transferable copy of a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloneError {
    /// The value holds a resource that cannot leave its runtime
    #[error("value is not transferable: {0}")]
    NotTransferable(String),
}

/// Convenience result alias for cell operations
pub type CellResult<T> = std::result::Result<T, CellError>;

/// Convenience result alias for clone-for-transfer
pub type CloneResult<T> = std::result::Result<T, CloneError>;

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_context_message_names_operation() {
        let err = CellError::realtime_only("add_listener");
        assert_eq!(
            err.to_string(),
            "`add_listener` must be called from the realtime runtime"
        );
    }

    #[test]
    fn test_spawn_error_keeps_io_source() {
        let err = RuntimeError::Spawn(io::Error::other("no threads"));
        assert_eq!(
            err.to_string(),
            "Failed to spawn realtime runtime thread: no threads"
        );
    }

    #[test]
    fn test_clone_error_converts() {
        let err: CellError = CloneError::NotTransferable("socket".into()).into();
        assert!(matches!(err, CellError::Clone(_)));
    }
}
