//! Client error types.

use thiserror::Error;

/// A specialized `Result` type for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Represents errors surfaced by the client session and its channels.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// An operation was attempted in a state that forbids it: a released
    /// channel was used, or the session is not in a state for the call.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The transport failed to carry the message.
    #[error(transparent)]
    Transport(#[from] bayeux_transport::TransportError),

    /// Protocol-level data was invalid (e.g. a malformed channel path).
    #[error(transparent)]
    Protocol(#[from] bayeux_protocol::ProtocolError),

    /// An extension vetoed the message; it was not sent, or its reply was
    /// not dispatched.
    #[error("Message vetoed by an extension")]
    Vetoed,

    /// The exchange produced no outcome; the reply path was torn down.
    #[error("No outcome delivered for the exchange")]
    Interrupted,
}

impl ClientError {
    /// Create an [`ClientError::IllegalState`] error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }
}
