//! The channel tree.
//!
//! Channels are interned per session: while a channel is alive,
//! `session.channel(path)` always returns the same instance. A channel with
//! no listeners and no subscribers can be released back to the registry;
//! released channels are inert and every operation on them fails, while a
//! fresh lookup of the same path produces a brand-new instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bayeux_protocol::{ChannelId, Message, META_SUBSCRIBE, META_UNSUBSCRIBE};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::session::{ClientSession, SessionCore};

/// Receives messages delivered on a channel.
///
/// Listeners may be invoked from any task; the core never holds internal
/// locks while a listener runs.
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// Called with each message delivered on `channel`.
    async fn on_message(&self, channel: &Arc<ClientChannel>, message: &Message);
}

/// A client-side view of one Bayeux channel.
///
/// `listeners` observe every message that touches the channel (meta
/// replies, publish replies, and broadcasts); `subscribers` receive only
/// broadcast data messages and imply a server-side subscription.
pub struct ClientChannel {
    id: ChannelId,
    session: Weak<SessionCore>,
    listeners: Mutex<Vec<Arc<dyn MessageListener>>>,
    subscribers: Mutex<Vec<Arc<dyn MessageListener>>>,
    attributes: Mutex<HashMap<String, Value>>,
    released: AtomicBool,
}

impl ClientChannel {
    fn new(id: ChannelId, session: Weak<SessionCore>) -> Self {
        Self {
            id,
            session,
            listeners: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            attributes: Mutex::new(HashMap::new()),
            released: AtomicBool::new(false),
        }
    }

    /// The channel's id.
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Whether this channel has been released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// The session this channel belongs to.
    pub fn session(&self) -> ClientResult<ClientSession> {
        self.ensure_active()?;
        Ok(ClientSession::from_core(self.core()?))
    }

    /// Add a general channel listener.
    pub fn add_listener(&self, listener: Arc<dyn MessageListener>) -> ClientResult<()> {
        self.ensure_active()?;
        self.listeners.lock().push(listener);
        Ok(())
    }

    /// Remove a previously added listener (by identity). Returns whether it
    /// was present.
    pub fn remove_listener(&self, listener: &Arc<dyn MessageListener>) -> ClientResult<bool> {
        self.ensure_active()?;
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|existing| !Arc::ptr_eq(existing, listener));
        Ok(listeners.len() != before)
    }

    /// Snapshot of the current listeners.
    pub fn listeners(&self) -> ClientResult<Vec<Arc<dyn MessageListener>>> {
        self.ensure_active()?;
        Ok(self.listeners.lock().clone())
    }

    /// Snapshot of the current subscribers.
    pub fn subscribers(&self) -> ClientResult<Vec<Arc<dyn MessageListener>>> {
        self.ensure_active()?;
        Ok(self.subscribers.lock().clone())
    }

    /// Subscribe to this channel.
    ///
    /// Sends `/meta/subscribe` and registers `listener` as a subscriber
    /// only if the server replies successfully; the reply is returned either
    /// way.
    pub async fn subscribe(
        self: &Arc<Self>,
        listener: Arc<dyn MessageListener>,
    ) -> ClientResult<Message> {
        self.ensure_active()?;
        if self.id.is_meta() {
            return Err(ClientError::illegal_state(
                "meta channels do not support subscribers",
            ));
        }
        let core = self.core()?;
        let mut message = Message::new(META_SUBSCRIBE);
        message.subscription = Some(self.id.as_str().to_string());
        let reply = core.send(message).await?;
        if reply.is_successful() {
            self.ensure_active()?;
            self.subscribers.lock().push(listener);
        }
        Ok(reply)
    }

    /// Unsubscribe one subscriber.
    ///
    /// Sends `/meta/unsubscribe` and removes `listener` only on a
    /// successful reply.
    pub async fn unsubscribe(
        self: &Arc<Self>,
        listener: &Arc<dyn MessageListener>,
    ) -> ClientResult<Message> {
        self.ensure_active()?;
        let reply = self.send_unsubscribe().await?;
        if reply.is_successful() {
            self.subscribers
                .lock()
                .retain(|existing| !Arc::ptr_eq(existing, listener));
        }
        Ok(reply)
    }

    /// Unsubscribe every subscriber with a single wire exchange.
    pub async fn unsubscribe_all(self: &Arc<Self>) -> ClientResult<Message> {
        self.ensure_active()?;
        let reply = self.send_unsubscribe().await?;
        if reply.is_successful() {
            self.subscribers.lock().clear();
        }
        Ok(reply)
    }

    async fn send_unsubscribe(self: &Arc<Self>) -> ClientResult<Message> {
        let core = self.core()?;
        let mut message = Message::new(META_UNSUBSCRIBE);
        message.subscription = Some(self.id.as_str().to_string());
        core.send(message).await
    }

    /// Publish `data` on this channel. Best-effort: the correlated
    /// publish-reply is returned, successful or not.
    pub async fn publish(self: &Arc<Self>, data: Value) -> ClientResult<Message> {
        self.ensure_active()?;
        if self.id.is_meta() {
            return Err(ClientError::illegal_state(
                "cannot publish on a meta channel",
            ));
        }
        if self.id.is_wild() {
            return Err(ClientError::illegal_state(
                "cannot publish on a wildcard channel",
            ));
        }
        let core = self.core()?;
        let mut message = Message::new(self.id.as_str());
        message.data = Some(data);
        core.send(message).await
    }

    /// Set a channel attribute.
    pub fn set_attribute(&self, name: impl Into<String>, value: Value) -> ClientResult<()> {
        self.ensure_active()?;
        self.attributes.lock().insert(name.into(), value);
        Ok(())
    }

    /// Read a channel attribute.
    pub fn get_attribute(&self, name: &str) -> ClientResult<Option<Value>> {
        self.ensure_active()?;
        Ok(self.attributes.lock().get(name).cloned())
    }

    /// Remove a channel attribute, returning its previous value.
    pub fn remove_attribute(&self, name: &str) -> ClientResult<Option<Value>> {
        self.ensure_active()?;
        Ok(self.attributes.lock().remove(name))
    }

    /// The names of the currently set attributes.
    pub fn attribute_names(&self) -> ClientResult<Vec<String>> {
        self.ensure_active()?;
        Ok(self.attributes.lock().keys().cloned().collect())
    }

    /// Release this channel back to the registry.
    ///
    /// Succeeds iff the channel has no listeners and no subscribers at the
    /// instant of the call; on success the channel becomes inert and is
    /// evicted, so the next lookup of this path creates a new instance.
    /// Releasing an already-released channel is a no-op returning `true`.
    pub fn release(&self) -> bool {
        if self.is_released() {
            return true;
        }
        match self.session.upgrade() {
            Some(core) => core.registry().release(self),
            // The session is gone; there is no registry to evict from.
            None => {
                if self.listeners.lock().is_empty() && self.subscribers.lock().is_empty() {
                    self.released.store(true, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Deliver `message` to this channel's observers: subscribers for
    /// broadcast data messages, listeners for everything.
    pub(crate) async fn deliver(self: &Arc<Self>, message: &Message) {
        let is_broadcast = !message.is_reply() && message.data.is_some();
        if is_broadcast && !self.id.is_meta() {
            let subscribers = self.subscribers.lock().clone();
            for subscriber in subscribers {
                subscriber.on_message(self, message).await;
            }
        }
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.on_message(self, message).await;
        }
    }

    fn ensure_active(&self) -> ClientResult<()> {
        if self.is_released() {
            Err(ClientError::IllegalState(format!(
                "channel {} is released",
                self.id
            )))
        } else {
            Ok(())
        }
    }

    fn core(&self) -> ClientResult<Arc<SessionCore>> {
        self.session
            .upgrade()
            .ok_or_else(|| ClientError::illegal_state("the session is gone"))
    }
}

impl fmt::Debug for ClientChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientChannel")
            .field("id", &self.id)
            .field("listeners", &self.listeners.lock().len())
            .field("subscribers", &self.subscribers.lock().len())
            .field("released", &self.is_released())
            .finish()
    }
}

/// The interned set of channels belonging to one session.
#[derive(Debug, Default)]
pub(crate) struct ChannelRegistry {
    channels: DashMap<String, Arc<ClientChannel>>,
}

impl ChannelRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Return the interned channel for `path`, creating it if needed.
    /// Creation is observably single: concurrent callers get the same
    /// instance.
    pub(crate) fn channel(
        &self,
        core: &Arc<SessionCore>,
        path: &str,
    ) -> ClientResult<Arc<ClientChannel>> {
        let id = ChannelId::new(path)?;
        let channel = self
            .channels
            .entry(id.as_str().to_string())
            .or_insert_with(|| Arc::new(ClientChannel::new(id, Arc::downgrade(core))))
            .clone();
        Ok(channel)
    }

    /// Release `channel`: under the per-path entry lock, verify it has no
    /// observers, mark it released, and evict it.
    pub(crate) fn release(&self, channel: &ClientChannel) -> bool {
        match self.channels.entry(channel.id.as_str().to_string()) {
            Entry::Occupied(entry) => {
                // Only the interned instance can be released through the
                // registry; a stale handle for this path is a different
                // channel object.
                if !std::ptr::eq(Arc::as_ptr(entry.get()), channel) {
                    return false;
                }
                if channel.listeners.lock().is_empty() && channel.subscribers.lock().is_empty() {
                    channel.released.store(true, Ordering::SeqCst);
                    entry.remove();
                    debug!(channel = %channel.id, "channel released");
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Deliver `message` to the exact channel for its path and to every
    /// interned wildcard channel matching it.
    pub(crate) async fn dispatch(&self, message: &Message) {
        let mut paths = vec![message.channel.clone()];
        paths.extend(ChannelId::wilds_of(&message.channel));
        for path in paths {
            let channel = self.channels.get(&path).map(|entry| Arc::clone(&entry));
            if let Some(channel) = channel {
                channel.deliver(message).await;
            }
        }
    }
}
