//! Coordinator error types.

use thiserror::Error;

/// Errors surfaced by coordinator lifecycle operations.
///
/// Per-message and per-connection failures never reach this type; they are
/// answered on the wire or handled as disconnects.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying bind failure.
        #[source]
        source: std::io::Error,
    },
    /// Other I/O failure on the listening socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;
