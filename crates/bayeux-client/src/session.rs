//! The client session state machine.
//!
//! A [`ClientSession`] drives the Bayeux lifecycle over a transport:
//! handshake, then a meta-connect loop that keeps one long poll outstanding,
//! with subscribes, publishes, and the disconnect multiplexed alongside it.
//! Server advice steers the loop; consecutive failures accrue backoff.
//!
//! The session is a cheaply-cloneable handle over shared state; all clones
//! drive the same underlying session.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bayeux_protocol::{
    Advice, Message, ReconnectPolicy, BAYEUX_VERSION, META_CONNECT, META_DISCONNECT, META_HANDSHAKE,
};
use bayeux_transport::{ClientTransport, TransportError, TransportListener};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::channel::{ChannelRegistry, ClientChannel};
use crate::diagnostics::{Diagnostics, LogLevel};
use crate::error::{ClientError, ClientResult};
use crate::extension::{Extension, ExtensionChain};

/// How long a vetoed `/meta/disconnect` may hold the state machine in
/// `Disconnecting` before the transition is forced locally.
const DISCONNECT_VETO_GRACE: Duration = Duration::from_millis(100);

/// The session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No handshake attempted, or the last attempt failed and a retry is
    /// pending.
    Unconnected,
    /// A `/meta/handshake` is in flight.
    Handshaking,
    /// Handshake succeeded; the first `/meta/connect` is in flight.
    Connecting,
    /// The meta-connect loop is established.
    Connected,
    /// A `/meta/disconnect` is in flight.
    Disconnecting,
    /// The session is over.
    Disconnected,
}

/// A Bayeux client session.
///
/// Cloning is cheap and every clone shares the same session. Call
/// [`ClientSession::disconnect`] before dropping the last handle, otherwise
/// the meta-connect loop keeps the session alive until its transport fails.
#[derive(Clone, Debug)]
pub struct ClientSession {
    core: Arc<SessionCore>,
}

pub(crate) struct SessionCore {
    transport: Arc<dyn ClientTransport>,
    registry: ChannelRegistry,
    extensions: ExtensionChain,
    diagnostics: Diagnostics,
    backoff: Backoff,
    state_tx: watch::Sender<SessionState>,
    client_id: Mutex<Option<String>>,
    advice: Mutex<Advice>,
    handshake_ext: Mutex<Option<Map<String, Value>>>,
    message_ids: AtomicU64,
}

impl std::fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCore")
            .field("state", &*self.state_tx.borrow())
            .field("client_id", &self.client_id.lock())
            .field("transport", &self.transport.name())
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    /// Create a session over `transport`.
    pub fn new(transport: Arc<dyn ClientTransport>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unconnected);
        let core = Arc::new(SessionCore {
            transport,
            registry: ChannelRegistry::new(),
            extensions: ExtensionChain::new(),
            diagnostics: Diagnostics::new(),
            backoff: Backoff::default(),
            state_tx,
            client_id: Mutex::new(None),
            advice: Mutex::new(Advice::default()),
            handshake_ext: Mutex::new(None),
            message_ids: AtomicU64::new(0),
        });
        core.transport.set_push_listener(Arc::new(PushListener {
            core: Arc::downgrade(&core),
        }));
        Self { core }
    }

    pub(crate) fn from_core(core: Arc<SessionCore>) -> Self {
        Self { core }
    }

    /// Start the session: initialize the transport and send
    /// `/meta/handshake`, optionally carrying `ext` data.
    ///
    /// On success the session stores its client id, transitions through
    /// `Connecting`, and starts the meta-connect loop. On a failed attempt
    /// the advice-driven retry is scheduled in the background and the
    /// unsuccessful reply (or the error) is returned.
    pub async fn handshake(&self, ext: Option<Map<String, Value>>) -> ClientResult<Message> {
        *self.core.handshake_ext.lock() = ext;
        self.core.do_handshake().await
    }

    /// End the session: send `/meta/disconnect` and close the transport
    /// once both the disconnect and the outstanding long poll are settled.
    pub async fn disconnect(&self) -> ClientResult<()> {
        let core = &self.core;
        if core.state() == SessionState::Disconnected {
            return Ok(());
        }
        core.set_state(SessionState::Disconnecting);
        match core.send(Message::new(META_DISCONNECT)).await {
            Ok(_reply) => {}
            Err(ClientError::Vetoed) => {
                // A vetoed disconnect must not wedge the state machine in
                // Disconnecting forever; force the transition after a short
                // grace period.
                tokio::time::sleep(DISCONNECT_VETO_GRACE).await;
            }
            // Failure or timeout of the disconnect still ends the session.
            Err(error) => debug!(%error, "disconnect did not complete cleanly"),
        }
        core.set_state(SessionState::Disconnected);
        core.transport.terminate().await;
        Ok(())
    }

    /// The interned channel for `path`.
    pub fn channel(&self, path: &str) -> ClientResult<Arc<ClientChannel>> {
        self.core.registry.channel(&self.core, path)
    }

    /// Whether the meta-connect loop is established.
    pub fn is_connected(&self) -> bool {
        self.core.state() == SessionState::Connected
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    /// Wait until the session reaches `state`, up to `timeout`. Returns
    /// whether the state was reached.
    pub async fn wait_for_state(&self, state: SessionState, timeout: Duration) -> bool {
        let mut rx = self.core.state_tx.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|current| *current == state))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    /// Register a named extension. Returns `false` if the name is taken.
    pub fn add_extension(&self, name: &str, extension: Arc<dyn Extension>) -> bool {
        self.core.extensions.register(name, extension)
    }

    /// Unregister a named extension. Returns whether it was present.
    pub fn remove_extension(&self, name: &str) -> bool {
        self.core.extensions.unregister(name)
    }

    /// Set the session diagnostics level.
    pub fn set_log_level(&self, level: LogLevel) {
        self.core.diagnostics.set_level(level);
    }

    /// The client id assigned by the server, once handshaken.
    pub fn client_id(&self) -> Option<String> {
        self.core.client_id.lock().clone()
    }
}

impl SessionCore {
    pub(crate) fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(from = ?*current, to = ?state, "session state");
                *current = state;
                true
            }
        });
    }

    fn is_ending(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Disconnecting | SessionState::Disconnected
        )
    }

    fn next_message_id(&self) -> String {
        (self.message_ids.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    /// Run the outgoing pipeline and deliver `message`, awaiting the
    /// correlated reply.
    pub(crate) async fn send(self: &Arc<Self>, mut message: Message) -> ClientResult<Message> {
        message.id = Some(self.next_message_id());
        if !message.is_handshake() {
            message.client_id = self.client_id.lock().clone();
        }
        self.diagnostics.trace_message("out", &message);

        let Some(message) = self.extensions.outgoing(message).await else {
            return Err(ClientError::Vetoed);
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let listener: Arc<dyn TransportListener> = Arc::new(ReplyListener {
            core: Arc::downgrade(self),
            reply: Mutex::new(Some(reply_tx)),
        });
        self.transport.send(listener, vec![message]).await;

        reply_rx.await.map_err(|_| ClientError::Interrupted)?
    }

    /// Run the incoming pipeline on a received message and dispatch it to
    /// the channel tree. Returns the processed message, or `None` on veto.
    async fn receive(self: &Arc<Self>, message: Message) -> Option<Message> {
        self.diagnostics.trace_message("in", &message);
        let message = self.extensions.incoming(message).await?;

        // Remember advice before any listener can observe the reply, so a
        // follow-up connect computes its delays against the new values.
        if (message.is_connect() || message.is_handshake()) && message.is_successful() {
            if let Some(advice) = &message.advice {
                *self.advice.lock() = advice.clone();
            }
        }

        self.registry.dispatch(&message).await;
        Some(message)
    }

    async fn do_handshake(self: &Arc<Self>) -> ClientResult<Message> {
        if !self.transport.accept(BAYEUX_VERSION) {
            return Err(ClientError::illegal_state(
                "the transport does not accept this Bayeux version",
            ));
        }
        self.set_state(SessionState::Handshaking);
        self.transport.init();
        *self.client_id.lock() = None;

        let mut message = Message::new(META_HANDSHAKE);
        message.version = Some(BAYEUX_VERSION.to_string());
        message.supported_connection_types = Some(vec![self.transport.name().to_string()]);
        message.ext = self.handshake_ext.lock().clone();

        match self.send(message).await {
            Ok(reply) if reply.is_successful() => {
                *self.client_id.lock() = reply.client_id.clone();
                self.backoff.reset();
                info!(client_id = ?reply.client_id, "handshake successful");
                self.set_state(SessionState::Connecting);
                self.spawn_connect_loop();
                Ok(reply)
            }
            Ok(reply) => {
                warn!(error = ?reply.error, "handshake rejected");
                self.handle_handshake_failure(reply.advice.clone()).await;
                Ok(reply)
            }
            Err(error) => {
                warn!(%error, "handshake failed");
                self.handle_handshake_failure(None).await;
                Err(error)
            }
        }
    }

    async fn handle_handshake_failure(self: &Arc<Self>, advice: Option<Advice>) {
        if self.is_ending() {
            return;
        }
        let advice = advice.unwrap_or_else(|| self.advice.lock().clone());
        match advice.reconnect_or_default() {
            ReconnectPolicy::None => {
                self.set_state(SessionState::Disconnected);
                self.transport.terminate().await;
            }
            ReconnectPolicy::Retry | ReconnectPolicy::Handshake => {
                let delay = advice.interval() + self.backoff.next_delay();
                self.set_state(SessionState::Unconnected);
                self.schedule_rehandshake(delay);
            }
        }
    }

    fn schedule_rehandshake(self: &Arc<Self>, delay: Duration) {
        debug!(?delay, "scheduling re-handshake");
        let core = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if core.is_ending() {
                return;
            }
            let _ = core.do_handshake().await;
        });
    }

    fn spawn_connect_loop(self: &Arc<Self>) {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            core.connect_loop().await;
        });
    }

    /// The meta-connect loop: keep one long poll outstanding until advice,
    /// disconnect, or an unrecoverable failure ends it.
    async fn connect_loop(self: &Arc<Self>) {
        loop {
            if self.is_ending() {
                return;
            }

            let mut message = Message::new(META_CONNECT);
            message.connection_type = Some(self.transport.name().to_string());

            match self.send(message).await {
                Ok(reply) if reply.is_successful() => {
                    if self.is_ending() {
                        return;
                    }
                    self.backoff.reset();
                    let advice = self.advice.lock().clone();
                    match advice.reconnect_or_default() {
                        ReconnectPolicy::None => {
                            info!("server advised to stop reconnecting");
                            self.set_state(SessionState::Disconnected);
                            self.transport.terminate().await;
                            return;
                        }
                        ReconnectPolicy::Handshake => {
                            *self.client_id.lock() = None;
                            self.set_state(SessionState::Unconnected);
                            self.schedule_rehandshake(advice.interval());
                            return;
                        }
                        ReconnectPolicy::Retry => {
                            self.set_state(SessionState::Connected);
                            let interval = advice.interval();
                            if !interval.is_zero() {
                                tokio::time::sleep(interval).await;
                            }
                        }
                    }
                }
                Ok(reply) => {
                    debug!(error = ?reply.error, "meta-connect rejected");
                    if let ControlFlow::Break(()) =
                        self.recover_connect(reply.advice.clone()).await
                    {
                        return;
                    }
                }
                Err(error) => {
                    debug!(%error, "meta-connect failed");
                    if let ControlFlow::Break(()) = self.recover_connect(None).await {
                        return;
                    }
                }
            }
        }
    }

    /// Advice-driven recovery after a failed meta-connect. `Continue` means
    /// the loop should try the next connect.
    async fn recover_connect(self: &Arc<Self>, advice: Option<Advice>) -> ControlFlow<()> {
        if self.is_ending() {
            return ControlFlow::Break(());
        }
        let advice = advice.unwrap_or_else(|| self.advice.lock().clone());
        let delay = advice.interval() + self.backoff.next_delay();
        match advice.reconnect_or_default() {
            ReconnectPolicy::None => {
                self.set_state(SessionState::Disconnected);
                self.transport.terminate().await;
                ControlFlow::Break(())
            }
            ReconnectPolicy::Handshake => {
                *self.client_id.lock() = None;
                self.set_state(SessionState::Unconnected);
                self.schedule_rehandshake(delay);
                ControlFlow::Break(())
            }
            ReconnectPolicy::Retry => {
                self.set_state(SessionState::Unconnected);
                tokio::time::sleep(delay).await;
                ControlFlow::Continue(())
            }
        }
    }
}

/// Delivers a single exchange's outcome into the waiting `send` call after
/// running the incoming pipeline.
struct ReplyListener {
    core: Weak<SessionCore>,
    reply: Mutex<Option<oneshot::Sender<ClientResult<Message>>>>,
}

#[async_trait]
impl TransportListener for ReplyListener {
    async fn on_messages(&self, messages: Vec<Message>) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        for message in messages {
            let outcome = core.receive(message).await;
            if let Some(tx) = self.reply.lock().take() {
                let _ = tx.send(outcome.ok_or(ClientError::Vetoed));
            }
        }
    }

    async fn on_failure(&self, failure: TransportError, _messages: &[Message]) {
        if let Some(tx) = self.reply.lock().take() {
            let _ = tx.send(Err(ClientError::Transport(failure)));
        }
    }
}

/// Routes server-pushed broadcasts through the incoming pipeline and into
/// the channel tree.
struct PushListener {
    core: Weak<SessionCore>,
}

#[async_trait]
impl TransportListener for PushListener {
    async fn on_messages(&self, messages: Vec<Message>) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        for message in messages {
            core.receive(message).await;
        }
    }

    async fn on_failure(&self, failure: TransportError, _messages: &[Message]) {
        debug!(%failure, "push channel failure");
    }
}
