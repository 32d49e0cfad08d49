//! # Bayeux Client
//!
//! The client side of the Bayeux 1.0 pub/sub protocol: a session that
//! drives the handshake → connect → subscribe → publish → disconnect
//! lifecycle over a pluggable transport, a channel tree with release
//! semantics, and an extension pipeline that sees every message in both
//! directions.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bayeux_client::{ClientSession, SessionState};
//! use bayeux_transport::TransportOptions;
//! use bayeux_websocket::WebSocketTransport;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(WebSocketTransport::new(
//!     "http://localhost:8080/cometd",
//!     TransportOptions::default(),
//! ));
//! let session = ClientSession::new(transport);
//! session.handshake(None).await?;
//! session
//!     .wait_for_state(SessionState::Connected, std::time::Duration::from_secs(5))
//!     .await;
//!
//! let channel = session.channel("/chat/demo")?;
//! channel.publish(json!({"text": "hello"})).await?;
//! session.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! bayeux-client/
//! ├── session.rs      # ClientSession: state machine and meta-connect loop
//! ├── channel.rs      # ClientChannel and the interned channel registry
//! ├── extension.rs    # Extension and the bidirectional pipeline
//! ├── backoff.rs      # Geometric retry backoff
//! ├── diagnostics.rs  # Log levels and message tracing
//! └── error.rs        # ClientError
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod backoff;
pub mod channel;
pub mod diagnostics;
pub mod error;
pub mod extension;
pub mod session;

pub use backoff::Backoff;
pub use channel::{ClientChannel, MessageListener};
pub use diagnostics::LogLevel;
pub use error::{ClientError, ClientResult};
pub use extension::{Extension, ExtensionChain};
pub use session::{ClientSession, SessionState};
