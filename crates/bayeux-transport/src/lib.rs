//! # Bayeux Transport Contract
//!
//! The seam between a Bayeux client session and the transports that carry
//! its messages. A transport delivers batches of [`bayeux_protocol::Message`]
//! to a remote server, correlates replies back to the batch's
//! [`TransportListener`], and surfaces failures; the session never touches
//! the wire directly.
//!
//! Lifecycle: `init → send* → terminate`, with `abort` for forced shutdown
//! and `reset` to release resources created at `init`.
//!
//! ## Architecture
//!
//! ```text
//! bayeux-transport/
//! ├── traits.rs     # ClientTransport and TransportListener
//! ├── options.rs    # TransportOptions (recognized keys and defaults)
//! ├── scheduler.rs  # Scheduler: cancellable delayed tasks for expiries
//! └── error.rs      # TransportError
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod error;
pub mod options;
pub mod scheduler;
pub mod traits;

pub use error::{TransportError, TransportResult};
pub use options::TransportOptions;
pub use scheduler::{ScheduledTask, Scheduler};
pub use traits::{ClientTransport, TransportListener};
