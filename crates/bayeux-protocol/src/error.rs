//! Protocol error types.

use thiserror::Error;

/// A specialized `Result` type for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Represents errors raised while validating or encoding protocol data.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ProtocolError {
    /// A received frame could not be parsed into a message batch.
    #[error("Malformed message batch: {0}")]
    MalformedBatch(String),

    /// A channel path failed validation.
    #[error("Invalid channel '{path}': {reason}")]
    InvalidChannel {
        /// The offending path.
        path: String,
        /// Why the path was rejected.
        reason: String,
    },
}

impl ProtocolError {
    /// Create an [`ProtocolError::InvalidChannel`] error.
    pub fn invalid_channel(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidChannel {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedBatch(err.to_string())
    }
}
