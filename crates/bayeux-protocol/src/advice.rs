//! Server advice steering reconnect cadence and timeouts.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The server's recommendation for how the client should reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectPolicy {
    /// Retry the pending operation (the default when no advice is given).
    Retry,
    /// Re-handshake: the server no longer knows this client.
    Handshake,
    /// Stop: the session is over.
    None,
}

/// The `advice` field of a Bayeux message.
///
/// Unrecognized advice keys are preserved in [`Advice::extra`] so a parsed
/// message re-encodes losslessly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    /// How the client should reconnect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<ReconnectPolicy>,

    /// Milliseconds to wait before the next connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,

    /// Milliseconds the server may hold a long poll before answering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Advice keys this implementation does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Advice {
    /// The reconnect policy, defaulting to [`ReconnectPolicy::Retry`].
    pub fn reconnect_or_default(&self) -> ReconnectPolicy {
        self.reconnect.unwrap_or(ReconnectPolicy::Retry)
    }

    /// The advised inter-connect interval, defaulting to zero.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval.unwrap_or(0))
    }

    /// The advised long-poll timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }
}
