//! The Bayeux message envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::advice::Advice;
use crate::channel::{META_CONNECT, META_DISCONNECT, META_HANDSHAKE, META_SUBSCRIBE};

/// A single Bayeux message.
///
/// Messages are immutable once handed to a transport; the `id` assigned by
/// the session is the correlation key between a request and its reply.
/// Fields this implementation does not model are preserved in
/// [`Message::extra`] so that re-encoding a parsed frame is lossless.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Correlation id, unique and monotonic per session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The channel this message travels on.
    pub channel: String,

    /// The server-assigned client id, set after a successful handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Reply flag: present on replies, absent on requests and broadcasts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,

    /// Application payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Extension data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Map<String, Value>>,

    /// Server advice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,

    /// The channel being (un)subscribed, on `/meta/(un)subscribe` messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,

    /// The transport carrying a `/meta/connect`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,

    /// Transports the client can speak, on `/meta/handshake` requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,

    /// Protocol version, on `/meta/handshake` messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Minimum acceptable protocol version, on `/meta/handshake` requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_version: Option<String>,

    /// Human-readable failure description on unsuccessful replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wire fields this implementation does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Create an empty message on `channel`.
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    /// `true` for `/meta/...` messages.
    pub fn is_meta(&self) -> bool {
        self.channel.starts_with("/meta/")
    }

    /// `true` for the reply to a publish: a non-meta message carrying the
    /// `successful` flag.
    pub fn is_publish_reply(&self) -> bool {
        !self.is_meta() && self.successful.is_some()
    }

    /// `true` for any reply (meta or publish-reply), as opposed to a
    /// server-pushed broadcast.
    pub fn is_reply(&self) -> bool {
        self.is_meta() || self.is_publish_reply()
    }

    /// `true` when the reply reports success.
    pub fn is_successful(&self) -> bool {
        self.successful == Some(true)
    }

    /// `true` for `/meta/handshake` messages.
    pub fn is_handshake(&self) -> bool {
        self.channel == META_HANDSHAKE
    }

    /// `true` for `/meta/connect` messages.
    pub fn is_connect(&self) -> bool {
        self.channel == META_CONNECT
    }

    /// `true` for `/meta/subscribe` messages.
    pub fn is_subscribe(&self) -> bool {
        self.channel == META_SUBSCRIBE
    }

    /// `true` for `/meta/disconnect` messages.
    pub fn is_disconnect(&self) -> bool {
        self.channel == META_DISCONNECT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_replies() {
        let mut handshake_reply = Message::new(META_HANDSHAKE);
        handshake_reply.successful = Some(true);
        assert!(handshake_reply.is_meta());
        assert!(handshake_reply.is_reply());
        assert!(!handshake_reply.is_publish_reply());

        let mut publish_reply = Message::new("/echo");
        publish_reply.successful = Some(true);
        assert!(publish_reply.is_publish_reply());
        assert!(publish_reply.is_reply());

        let mut broadcast = Message::new("/echo");
        broadcast.data = Some(json!("hello"));
        assert!(!broadcast.is_reply());
    }

    #[test]
    fn camel_case_wire_names() {
        let mut message = Message::new(META_CONNECT);
        message.id = Some("7".into());
        message.client_id = Some("abc123".into());
        message.connection_type = Some("websocket".into());

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "7",
                "channel": "/meta/connect",
                "clientId": "abc123",
                "connectionType": "websocket",
            })
        );
    }

    #[test]
    fn preserves_unknown_fields() {
        let wire = json!({
            "channel": "/foo",
            "data": {"k": 1},
            "timestamp": "2012-01-01T00:00:00",
        });
        let message: Message = serde_json::from_value(wire.clone()).unwrap();
        assert_eq!(
            message.extra.get("timestamp"),
            Some(&json!("2012-01-01T00:00:00"))
        );
        assert_eq!(serde_json::to_value(&message).unwrap(), wire);
    }
}
