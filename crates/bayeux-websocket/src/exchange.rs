//! The table of in-flight exchanges.
//!
//! Every message handed to the transport is tracked by an [`Exchange`]
//! until its reply arrives, its expiry fires, or the transport dies.
//! Whoever removes the entry from the table owns the notification; losers
//! of that race stay silent, which is what makes delivery exactly-once.

use std::fmt;
use std::sync::Arc;

use bayeux_protocol::Message;
use bayeux_transport::{ScheduledTask, TransportListener};
use dashmap::DashMap;

/// An in-flight request awaiting its reply.
pub struct Exchange {
    /// The message as it went out.
    pub message: Message,
    /// Where the outcome is delivered.
    pub listener: Arc<dyn TransportListener>,
    /// The pending expiry; cancelled when the exchange completes.
    pub task: ScheduledTask,
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.message.id)
            .field("channel", &self.message.channel)
            .finish_non_exhaustive()
    }
}

/// Maps outgoing message ids to their pending exchanges.
#[derive(Debug, Default)]
pub struct ExchangeTable {
    exchanges: DashMap<String, Exchange>,
}

impl ExchangeTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new exchange.
    ///
    /// # Panics
    ///
    /// Panics if an exchange is already registered for the message id;
    /// ids are unique per session, so a collision is a caller bug.
    pub fn register(&self, exchange: Exchange) {
        let id = exchange
            .message
            .id
            .clone()
            .expect("messages must carry an id before they are sent");
        let prior = self.exchanges.insert(id, exchange);
        assert!(prior.is_none(), "duplicate exchange for message id");
    }

    /// Atomically remove and return the exchange for `id`, cancelling its
    /// expiry. Idempotent: the second caller gets `None` and must not
    /// notify.
    pub fn complete(&self, id: &str) -> Option<Exchange> {
        let exchange = self.exchanges.remove(id).map(|(_, exchange)| exchange);
        // The timer is cancelled only after removal, so a concurrent firing
        // cannot observe a half-removed entry.
        if let Some(exchange) = &exchange {
            exchange.task.cancel();
        }
        exchange
    }

    /// Remove and return every pending exchange, for transport shutdown.
    pub fn drain(&self) -> Vec<Exchange> {
        let ids: Vec<String> = self
            .exchanges
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.iter().filter_map(|id| self.complete(id)).collect()
    }

    /// Number of exchanges currently pending.
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    /// Whether no exchanges are pending.
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}
