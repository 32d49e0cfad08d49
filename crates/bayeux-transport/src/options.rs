//! Transport configuration options.

use std::time::Duration;

/// Recognized transport options with their defaults.
///
/// ```
/// use std::time::Duration;
/// use bayeux_transport::TransportOptions;
///
/// let options = TransportOptions::default()
///     .with_protocol("cometd-custom")
///     .with_max_network_delay(Duration::from_secs(5));
/// assert_eq!(options.protocol, "cometd-custom");
/// ```
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// The WebSocket subprotocol offered during the upgrade.
    pub protocol: String,
    /// How long connection establishment may take.
    pub connect_timeout: Duration,
    /// How long the connection may sit idle before the peer may drop it.
    pub idle_timeout: Duration,
    /// Largest acceptable incoming frame, in bytes.
    pub max_message_size: usize,
    /// Baseline time budget for a reply to an outgoing message. A
    /// `/meta/connect` additionally gets the server-advised long-poll
    /// timeout on top of this.
    pub max_network_delay: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            protocol: "cometd".to_string(),
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            max_message_size: 64 * 1024,
            max_network_delay: Duration::from_secs(15),
        }
    }
}

impl TransportOptions {
    /// Set the WebSocket subprotocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the maximum incoming frame size.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the baseline reply budget.
    #[must_use]
    pub fn with_max_network_delay(mut self, delay: Duration) -> Self {
        self.max_network_delay = delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_spec() {
        let options = TransportOptions::default();
        assert_eq!(options.protocol, "cometd");
        assert_eq!(options.connect_timeout, Duration::from_secs(30));
        assert_eq!(options.idle_timeout, Duration::from_secs(60));
        assert_eq!(options.max_network_delay, Duration::from_secs(15));
    }
}
