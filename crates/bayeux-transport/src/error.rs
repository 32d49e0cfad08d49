//! Transport error types.

use std::time::Duration;

use thiserror::Error;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Represents failures reported by a transport.
///
/// Errors are cloneable so that one underlying failure can be fanned out to
/// every pending exchange it kills.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// The remote endpoint could not be reached. The transport stays usable;
    /// the session may retry.
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// Connection establishment did not complete in time.
    #[error("Connect timed out after {timeout:?}")]
    ConnectTimeout {
        /// The configured connect timeout.
        timeout: Duration,
    },

    /// The server refused the protocol upgrade. The transport marks itself
    /// permanently unsupported; the session should fall back.
    #[error("WebSocket upgrade rejected: HTTP {http_code} (websocket code {websocket_code})")]
    UpgradeRejected {
        /// The HTTP status returned instead of `101 Switching Protocols`.
        http_code: u16,
        /// The WebSocket close code equivalent (`1002`, protocol error).
        websocket_code: u16,
    },

    /// No reply arrived for a message before its network-delay budget ran
    /// out.
    #[error("Exchange expired")]
    Timeout,

    /// The transport was aborted while the message was in flight.
    #[error("Aborted")]
    Aborted,

    /// The underlying connection closed.
    #[error("Connection closed: {code} {reason}")]
    Closed {
        /// The close code.
        code: u16,
        /// The close reason, possibly empty.
        reason: String,
    },

    /// A frame could not be written.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// A received frame could not be parsed.
    #[error("Parse failed: {0}")]
    ParseFailed(String),

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),

    /// An operation was attempted in a state that forbids it.
    #[error("Illegal state: {0}")]
    IllegalState(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<bayeux_protocol::ProtocolError> for TransportError {
    fn from(err: bayeux_protocol::ProtocolError) -> Self {
        Self::ParseFailed(err.to_string())
    }
}
