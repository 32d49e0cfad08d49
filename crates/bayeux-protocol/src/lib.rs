//! # Bayeux Protocol
//!
//! Protocol-level types for the Bayeux 1.0 pub/sub protocol: the message
//! envelope, the channel model (meta channels, user channels, wildcards),
//! server advice, and the JSON wire codec.
//!
//! This crate is transport-agnostic. Frames on the wire are JSON arrays of
//! message objects; [`codec::parse_messages`] and [`codec::generate_json`]
//! convert between frame text and [`Message`] batches while preserving
//! fields this implementation does not model (so re-encoding a parsed frame
//! is lossless modulo whitespace and key order).
//!
//! ## Architecture
//!
//! ```text
//! bayeux-protocol/
//! ├── message.rs     # Message envelope and reply classification
//! ├── channel.rs     # ChannelId, meta constants, wildcard matching
//! ├── advice.rs      # Server advice and reconnect policy
//! ├── codec.rs       # parse_messages / generate_json
//! └── error.rs       # ProtocolError
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod advice;
pub mod channel;
pub mod codec;
pub mod error;
pub mod message;

pub use advice::{Advice, ReconnectPolicy};
pub use channel::{
    ChannelId, META_CONNECT, META_DISCONNECT, META_HANDSHAKE, META_SUBSCRIBE, META_UNSUBSCRIBE,
};
pub use codec::{generate_json, parse_messages};
pub use error::{ProtocolError, ProtocolResult};
pub use message::Message;

/// The Bayeux protocol version spoken by this implementation.
pub const BAYEUX_VERSION: &str = "1.0";
