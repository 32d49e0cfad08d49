//! The JSON wire codec.
//!
//! Bayeux frames are JSON arrays of message objects. Some servers send a
//! bare object for single-message frames; [`parse_messages`] accepts both.

use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::Message;

/// Parse a text frame into a batch of messages.
pub fn parse_messages(text: &str) -> ProtocolResult<Vec<Message>> {
    let value: Value = serde_json::from_str(text)?;
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(ProtocolError::from))
            .collect(),
        Value::Object(_) => Ok(vec![serde_json::from_value(value)?]),
        other => Err(ProtocolError::MalformedBatch(format!(
            "expected a JSON array of messages, got {other}"
        ))),
    }
}

/// Serialize a batch of messages into a JSON array frame.
pub fn generate_json(messages: &[Message]) -> ProtocolResult<String> {
    serde_json::to_string(messages).map_err(ProtocolError::from)
}
