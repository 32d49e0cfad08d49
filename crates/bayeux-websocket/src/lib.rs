//! # Bayeux WebSocket Transport
//!
//! The concrete WebSocket realization of the Bayeux transport contract. A
//! single long-lived socket multiplexes every in-flight message; each
//! outgoing message is tracked by an exchange with its own expiry, and
//! replies correlate back by message id. Server-pushed messages are routed
//! to the session's push listener.
//!
//! ## Architecture
//!
//! ```text
//! bayeux-websocket/
//! ├── exchange.rs   # Exchange and the at-most-once completion table
//! └── transport.rs  # WebSocketTransport: connect, send, receive, expiry
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bayeux_transport::{ClientTransport, TransportOptions};
//! use bayeux_websocket::WebSocketTransport;
//!
//! let transport = WebSocketTransport::new(
//!     "http://localhost:8080/cometd",
//!     TransportOptions::default(),
//! );
//! transport.init();
//! let transport: Arc<dyn ClientTransport> = Arc::new(transport);
//! // hand the transport to a client session
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod exchange;
pub mod transport;

pub use exchange::{Exchange, ExchangeTable};
pub use transport::{WebSocketTransport, PROTOCOL_ERROR_CLOSE_CODE, TRANSPORT_NAME};
