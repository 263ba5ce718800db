//! Envelope error types.

use thiserror::Error;

/// Errors raised while encoding or decoding a [`crate::SwarmMessage`].
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame was not valid JSON or did not match the envelope shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The frame was binary and not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    NotUtf8,
}

/// Result type for envelope operations.
pub type Result<T> = std::result::Result<T, EnvelopeError>;
