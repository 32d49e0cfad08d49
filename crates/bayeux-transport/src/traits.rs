//! Core transport traits.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bayeux_protocol::Message;

use crate::error::TransportError;

/// Receives the outcomes of a batch handed to [`ClientTransport::send`],
/// plus server-pushed messages when installed as the push listener.
///
/// The transport never holds internal locks while invoking a listener, and
/// for each message exactly one of a reply, a timeout failure, or an abort
/// failure is delivered.
#[async_trait]
pub trait TransportListener: Send + Sync {
    /// Called after exchanges are registered but strictly before the batch
    /// hits the wire, so a reply can never be observed ahead of it.
    async fn on_sending(&self, messages: &[Message]) {
        let _ = messages;
    }

    /// Called with correlated replies, or with pushed messages on the push
    /// listener.
    async fn on_messages(&self, messages: Vec<Message>);

    /// Called when the messages failed: connect error, timeout, abort, or
    /// connection loss.
    async fn on_failure(&self, failure: TransportError, messages: &[Message]);
}

/// A transport able to carry Bayeux message batches.
///
/// Lifecycle: `init → send* → terminate`. `abort` forces shutdown and fails
/// everything in flight; `reset` releases resources created at `init` (a
/// subsequent `init` must bring the transport back up).
#[async_trait]
pub trait ClientTransport: Send + Sync + fmt::Debug {
    /// The transport's connection-type name, e.g. `"websocket"`.
    fn name(&self) -> &str;

    /// Whether this transport is willing to carry the given Bayeux version.
    /// A transport may veto based on earlier failures (e.g. a rejected
    /// WebSocket upgrade).
    fn accept(&self, bayeux_version: &str) -> bool {
        let _ = bayeux_version;
        true
    }

    /// Apply configuration and allocate internal resources. Idempotent
    /// relative to a subsequent [`ClientTransport::reset`].
    fn init(&self);

    /// Deliver a batch. Per-message exchanges are registered before
    /// transmission; outcomes arrive on `listener`. Independent batches have
    /// no ordering guarantee between them.
    async fn send(&self, listener: Arc<dyn TransportListener>, messages: Vec<Message>);

    /// Forced shutdown: every pending exchange fails with
    /// [`TransportError::Aborted`].
    async fn abort(&self);

    /// Release resources created at `init`.
    fn reset(&self);

    /// Graceful shutdown after the last reply.
    async fn terminate(&self);

    /// Install the listener that receives server-pushed (non-reply)
    /// messages.
    fn set_push_listener(&self, listener: Arc<dyn TransportListener>);
}
