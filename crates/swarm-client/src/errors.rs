//! Client error types.

use swarm_core::{EnvelopeError, MessageId};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors surfaced by [`crate::SwarmClient`] operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configured coordinator URL is unusable.
    #[error("invalid coordinator URL {url}: {reason}")]
    InvalidUrl {
        /// URL as configured.
        url: String,
        /// What is wrong with it.
        reason: String,
    },

    /// No agent identity was configured.
    #[error("agent id is required")]
    MissingAgentId,

    /// The transport could not be opened.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        /// Handshake URL.
        url: String,
        /// Underlying transport failure.
        #[source]
        source: Box<tungstenite::Error>,
    },

    /// The handshake did not complete in time.
    #[error("connecting to {url} timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Handshake URL.
        url: String,
        /// Configured connect timeout.
        timeout_ms: u64,
    },

    /// The coordinator closed the transport instead of admitting the session.
    #[error("coordinator refused the connection: {reason} ({code})")]
    Refused {
        /// Close code, e.g. 1013 when the coordinator is at capacity.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// The outbound queue is at capacity.
    #[error("outbound queue full ({capacity} messages)")]
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },

    /// Not connected and queueing is disabled.
    #[error("not connected")]
    NotConnected,

    /// No correlated response arrived within the request timeout.
    #[error("request {id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Id of the request.
        id: MessageId,
        /// Configured request timeout.
        timeout_ms: u64,
    },

    /// The client was disconnected while the operation was in flight.
    #[error("client disconnected")]
    Disconnected,

    /// The coordinator answered with an `error` message.
    #[error("coordinator error {code}: {message}")]
    Remote {
        /// Error code from the payload.
        code: String,
        /// Human-readable message from the payload.
        message: String,
    },

    /// An outbound message could not be encoded.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
