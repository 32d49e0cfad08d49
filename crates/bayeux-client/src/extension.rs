//! The extension pipeline.
//!
//! Extensions are named interceptors that see every message crossing the
//! session boundary, once per message per direction, in registration order
//! for both directions. An extension may rewrite the message or veto it by
//! returning `None`; a veto short-circuits the rest of the chain and the
//! message is dropped (an outgoing veto means it is never sent, an incoming
//! veto means it is never dispatched).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bayeux_protocol::Message;
use parking_lot::RwLock;
use tracing::debug;

/// A bidirectional message interceptor.
///
/// Both hooks default to passthrough, so an extension may implement either
/// one, both, or neither (an empty extension is legal and has no effect).
#[async_trait]
pub trait Extension: Send + Sync {
    /// Inspect or rewrite a message received from the server. Return `None`
    /// to veto it.
    async fn incoming(&self, message: Message) -> Option<Message> {
        Some(message)
    }

    /// Inspect or rewrite a message about to be sent. Return `None` to veto
    /// it.
    async fn outgoing(&self, message: Message) -> Option<Message> {
        Some(message)
    }
}

/// The ordered, named chain of registered extensions.
#[derive(Default)]
pub struct ExtensionChain {
    extensions: RwLock<Vec<(String, Arc<dyn Extension>)>>,
}

impl ExtensionChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `extension` under `name`. Returns `false` (and registers
    /// nothing) if the name is taken.
    pub fn register(&self, name: &str, extension: Arc<dyn Extension>) -> bool {
        let mut extensions = self.extensions.write();
        if extensions.iter().any(|(existing, _)| existing == name) {
            return false;
        }
        extensions.push((name.to_string(), extension));
        true
    }

    /// Remove the extension registered under `name`, if any.
    pub fn unregister(&self, name: &str) -> bool {
        let mut extensions = self.extensions.write();
        let before = extensions.len();
        extensions.retain(|(existing, _)| existing != name);
        extensions.len() != before
    }

    /// Run the incoming hooks in registration order. `None` means the
    /// message was vetoed and must not be dispatched.
    pub async fn incoming(&self, message: Message) -> Option<Message> {
        // Snapshot outside the lock: hooks are user code and must never run
        // under it.
        let extensions = self.snapshot();
        let mut message = message;
        for (name, extension) in extensions {
            match extension.incoming(message).await {
                Some(next) => message = next,
                None => {
                    debug!(extension = %name, "incoming message vetoed");
                    return None;
                }
            }
        }
        Some(message)
    }

    /// Run the outgoing hooks in registration order. `None` means the
    /// message was vetoed and must not be sent.
    pub async fn outgoing(&self, message: Message) -> Option<Message> {
        let extensions = self.snapshot();
        let mut message = message;
        for (name, extension) in extensions {
            match extension.outgoing(message).await {
                Some(next) => message = next,
                None => {
                    debug!(extension = %name, "outgoing message vetoed");
                    return None;
                }
            }
        }
        Some(message)
    }

    fn snapshot(&self) -> Vec<(String, Arc<dyn Extension>)> {
        self.extensions.read().clone()
    }
}

impl fmt::Debug for ExtensionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .extensions
            .read()
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        f.debug_struct("ExtensionChain")
            .field("extensions", &names)
            .finish()
    }
}
