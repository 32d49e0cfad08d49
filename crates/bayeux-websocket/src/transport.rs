//! The WebSocket transport.
//!
//! One socket carries every in-flight message; batches are serialized as a
//! single JSON-array text frame and replies correlate back by message id. A
//! single reader task routes replies to their exchanges and everything else
//! to the session's push listener.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bayeux_protocol::{generate_json, parse_messages, Advice, Message};
use bayeux_transport::{
    ClientTransport, Scheduler, TransportError, TransportListener, TransportOptions,
};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsFrame};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::exchange::{Exchange, ExchangeTable};

/// The connection-type name this transport advertises.
pub const TRANSPORT_NAME: &str = "websocket";

/// The WebSocket close code reported for rejected protocol upgrades.
pub const PROTOCOL_ERROR_CLOSE_CODE: u16 = 1002;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsFrame>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// A Bayeux transport over a single WebSocket session.
///
/// The session is opened lazily on the first send. Connect refusals and
/// timeouts fail only the batch that triggered them; a rejected upgrade
/// marks the transport permanently unsupported so the session can fall back
/// to another transport.
pub struct WebSocketTransport {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    options: TransportOptions,
    exchanges: ExchangeTable,
    writer: tokio::sync::Mutex<Option<WsSink>>,
    scheduler: Mutex<Option<Scheduler>>,
    injected_scheduler: Option<Scheduler>,
    owns_scheduler: AtomicBool,
    /// A `/meta/connect` is outstanding.
    connected: AtomicBool,
    /// A `/meta/disconnect` has completed.
    disconnected: AtomicBool,
    aborted: AtomicBool,
    /// Gates expiry notifications: an expiry that fires while the transport
    /// is shut down stays silent.
    running: AtomicBool,
    web_socket_supported: AtomicBool,
    /// Advice from the last successful `/meta/connect` reply that carried a
    /// timeout; feeds the expiry budget of the next connect.
    advice: Mutex<Option<Advice>>,
    push_listener: Mutex<Option<Arc<dyn TransportListener>>>,
}

impl WebSocketTransport {
    /// Create a transport for `url` (an `http(s)://` or `ws(s)://` server
    /// URL) owning its own scheduler.
    pub fn new(url: impl Into<String>, options: TransportOptions) -> Self {
        Self::build(url.into(), options, None)
    }

    /// Create a transport using an externally owned scheduler. The
    /// transport will not shut the scheduler down on `reset`.
    pub fn with_scheduler(
        url: impl Into<String>,
        options: TransportOptions,
        scheduler: Scheduler,
    ) -> Self {
        Self::build(url.into(), options, Some(scheduler))
    }

    fn build(url: String, options: TransportOptions, scheduler: Option<Scheduler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                url,
                options,
                exchanges: ExchangeTable::new(),
                writer: tokio::sync::Mutex::new(None),
                scheduler: Mutex::new(None),
                injected_scheduler: scheduler,
                owns_scheduler: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                disconnected: AtomicBool::new(false),
                aborted: AtomicBool::new(false),
                running: AtomicBool::new(false),
                web_socket_supported: AtomicBool::new(true),
                advice: Mutex::new(None),
                push_listener: Mutex::new(None),
            }),
        }
    }

    /// Number of exchanges currently awaiting a reply.
    pub fn pending_exchanges(&self) -> usize {
        self.inner.exchanges.len()
    }
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.inner.url)
            .field("pending", &self.inner.exchanges.len())
            .field(
                "supported",
                &self.inner.web_socket_supported.load(Ordering::SeqCst),
            )
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ClientTransport for WebSocketTransport {
    fn name(&self) -> &str {
        TRANSPORT_NAME
    }

    fn accept(&self, _bayeux_version: &str) -> bool {
        self.inner.web_socket_supported.load(Ordering::SeqCst)
    }

    fn init(&self) {
        // Anything a previous run left behind is dropped silently.
        drop(self.inner.exchanges.drain());
        self.inner.aborted.store(false, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.disconnected.store(false, Ordering::SeqCst);
        self.inner.running.store(true, Ordering::SeqCst);

        let mut scheduler = self.inner.scheduler.lock();
        if scheduler.is_none() {
            match &self.inner.injected_scheduler {
                Some(injected) => *scheduler = Some(injected.clone()),
                None => {
                    *scheduler = Some(Scheduler::new());
                    self.inner.owns_scheduler.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    async fn send(&self, listener: Arc<dyn TransportListener>, messages: Vec<Message>) {
        self.inner.send(listener, messages).await;
    }

    async fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.fail_all(TransportError::Aborted).await;
        self.inner.close_session("Aborted").await;
        self.reset();
    }

    fn reset(&self) {
        let mut scheduler = self.inner.scheduler.lock();
        if self.inner.owns_scheduler.swap(false, Ordering::SeqCst) {
            if let Some(owned) = scheduler.take() {
                owned.shutdown();
            }
        } else {
            // Injected: drop the reference, the owner shuts it down.
            *scheduler = None;
        }
    }

    async fn terminate(&self) {
        self.inner.close_session("Terminated").await;
    }

    fn set_push_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.inner.push_listener.lock() = Some(listener);
    }
}

impl Inner {
    async fn send(self: &Arc<Self>, listener: Arc<dyn TransportListener>, messages: Vec<Message>) {
        if self.aborted.load(Ordering::SeqCst) {
            listener
                .on_failure(
                    TransportError::IllegalState("transport is aborted".to_string()),
                    &messages,
                )
                .await;
            return;
        }

        if !self.connect(&listener, &messages).await {
            return;
        }

        for message in &messages {
            self.register(message, &listener);
        }

        let result = async {
            let frame = generate_json(&messages).map_err(TransportError::from)?;
            trace!(%frame, "sending batch");

            // The sending notification must precede the write: a reply can
            // arrive faster than the caller observes on_sending otherwise.
            listener.on_sending(&messages).await;

            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(sink) => sink
                    .send(WsFrame::Text(frame))
                    .await
                    .map_err(|e| TransportError::SendFailed(e.to_string())),
                None => Err(TransportError::SendFailed(
                    "websocket session is closed".to_string(),
                )),
            }
        }
        .await;

        if let Err(failure) = result {
            for message in &messages {
                if let Some(id) = &message.id {
                    self.deregister(id, &message.channel);
                }
            }
            self.close_session("Exception").await;
            listener.on_failure(failure, &messages).await;
        }
    }

    /// Ensure a WebSocket session exists, opening one if needed. Returns
    /// `false` after notifying the listener when the batch cannot proceed.
    async fn connect(
        self: &Arc<Self>,
        listener: &Arc<dyn TransportListener>,
        messages: &[Message],
    ) -> bool {
        if self.writer.lock().await.is_some() {
            return true;
        }

        let ws_url = mangle_url(&self.url);
        debug!(url = %ws_url, "opening websocket session");

        let request = match build_request(&ws_url, &self.options) {
            Ok(request) => request,
            Err(failure) => {
                self.web_socket_supported.store(false, Ordering::SeqCst);
                listener.on_failure(failure, messages).await;
                return false;
            }
        };

        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.options.max_message_size);
        config.max_frame_size = Some(self.options.max_message_size);

        let connecting = connect_async_with_config(request, Some(config), false);
        match tokio::time::timeout(self.options.connect_timeout, connecting).await {
            Err(_elapsed) => {
                let timeout = self.options.connect_timeout;
                warn!(?timeout, "websocket connect timed out");
                listener
                    .on_failure(TransportError::ConnectTimeout { timeout }, messages)
                    .await;
                false
            }
            Ok(Err(WsError::Http(response))) => {
                // The server spoke HTTP but refused the upgrade: WebSocket
                // is not available at this URL, permanently.
                self.web_socket_supported.store(false, Ordering::SeqCst);
                let http_code = response.status().as_u16();
                warn!(http_code, "websocket upgrade rejected");
                listener
                    .on_failure(
                        TransportError::UpgradeRejected {
                            http_code,
                            websocket_code: PROTOCOL_ERROR_CLOSE_CODE,
                        },
                        messages,
                    )
                    .await;
                false
            }
            Ok(Err(WsError::Io(error))) => {
                // Cannot reach the server; assume it supports WebSocket
                // until proved otherwise.
                debug!(error = %error, "websocket connect failed");
                listener
                    .on_failure(TransportError::ConnectFailed(error.to_string()), messages)
                    .await;
                false
            }
            Ok(Err(error)) => {
                self.web_socket_supported.store(false, Ordering::SeqCst);
                warn!(error = %error, "websocket handshake failed");
                listener
                    .on_failure(TransportError::ConnectFailed(error.to_string()), messages)
                    .await;
                false
            }
            Ok(Ok((stream, _response))) => {
                if self.aborted.load(Ordering::SeqCst) {
                    listener.on_failure(TransportError::Aborted, messages).await;
                    return false;
                }
                let (sink, source) = stream.split();
                *self.writer.lock().await = Some(sink);
                self.spawn_reader(source);
                debug!("websocket session open");
                true
            }
        }
    }

    /// Track `message` and arm its expiry.
    fn register(self: &Arc<Self>, message: &Message, listener: &Arc<dyn TransportListener>) {
        let mut delay = self.options.max_network_delay;
        if message.is_connect() {
            // A meta-connect may be held by the server for the advised
            // timeout on top of the network delay.
            let advice = message.advice.clone().or_else(|| self.advice.lock().clone());
            if let Some(timeout) = advice.as_ref().and_then(Advice::timeout) {
                delay += timeout;
            }
            self.connected.store(true, Ordering::SeqCst);
        }

        let id = message
            .id
            .clone()
            .expect("messages must carry an id before they are sent");
        let channel = message.channel.clone();
        let expiration = Instant::now() + delay;

        let scheduler = self
            .scheduler
            .lock()
            .clone()
            .expect("transport not initialized");
        let inner = Arc::clone(self);
        let expired_id = id.clone();
        let task = scheduler.schedule(delay, async move {
            let lag = Instant::now().saturating_duration_since(expiration);
            if lag > Duration::from_secs(5) {
                debug!(message = %expired_id, ?lag, "expiry fired late, the scheduler is lagging");
            }
            // Notify only if we won the race to remove the exchange.
            if let Some(exchange) = inner.deregister(&expired_id, &channel) {
                if inner.running.load(Ordering::SeqCst) {
                    exchange
                        .listener
                        .on_failure(TransportError::Timeout, std::slice::from_ref(&exchange.message))
                        .await;
                }
            }
        });

        trace!(message = %id, ?delay, "registering exchange");
        self.exchanges.register(Exchange {
            message: message.clone(),
            listener: Arc::clone(listener),
            task,
        });
    }

    /// Remove the exchange for `id`, updating the connect/disconnect
    /// bookkeeping for `channel`.
    fn deregister(&self, id: &str, channel: &str) -> Option<Exchange> {
        if channel == bayeux_protocol::META_CONNECT {
            self.connected.store(false, Ordering::SeqCst);
        } else if channel == bayeux_protocol::META_DISCONNECT {
            self.disconnected.store(true, Ordering::SeqCst);
        }
        self.exchanges.complete(id)
    }

    fn spawn_reader(self: &Arc<Self>, mut source: WsSource) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsFrame::Text(text)) => {
                        trace!(%text, "received frame");
                        match parse_messages(&text) {
                            Ok(messages) => inner.on_frame(messages).await,
                            Err(error) => {
                                warn!(error = %error, "malformed incoming frame");
                                inner
                                    .fail_all(TransportError::ParseFailed(error.to_string()))
                                    .await;
                                inner.close_session("Exception").await;
                                break;
                            }
                        }
                    }
                    Ok(WsFrame::Close(frame)) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1005, String::new()));
                        debug!(code, %reason, "websocket closed by peer");
                        inner.drop_session().await;
                        inner.fail_all(TransportError::Closed { code, reason }).await;
                        break;
                    }
                    Ok(_) => {
                        // Ping/pong and binary frames are not part of the
                        // Bayeux exchange.
                    }
                    Err(error) => {
                        warn!(error = %error, "websocket error");
                        inner.drop_session().await;
                        inner.fail_all(TransportError::Io(error.to_string())).await;
                        break;
                    }
                }
            }
            debug!("websocket reader terminated");
        });
    }

    async fn on_frame(&self, messages: Vec<Message>) {
        for message in messages {
            if message.is_reply() {
                // Remember the advice before notifying: a listener that
                // issues the next meta-connect from its callback must see
                // the new timeout when its expiry is computed.
                if message.is_connect() && message.is_successful() {
                    if let Some(advice) = &message.advice {
                        if advice.timeout.is_some() {
                            *self.advice.lock() = Some(advice.clone());
                        }
                    }
                }

                let Some(id) = message.id.clone() else {
                    debug!(channel = %message.channel, "reply without an id, dropped");
                    continue;
                };
                match self.deregister(&id, &message.channel) {
                    Some(exchange) => exchange.listener.on_messages(vec![message]).await,
                    // The exchange expired; a late reply must not be
                    // delivered a second time.
                    None => debug!(message = %id, "no pending exchange for reply"),
                }

                if self.disconnected.load(Ordering::SeqCst)
                    && !self.connected.load(Ordering::SeqCst)
                {
                    self.close_session("Disconnect").await;
                }
            } else {
                let push = self.push_listener.lock().clone();
                match push {
                    Some(listener) => listener.on_messages(vec![message]).await,
                    None => {
                        debug!(channel = %message.channel, "pushed message dropped, no push listener");
                    }
                }
            }
        }
    }

    /// Fail every pending exchange with `cause`.
    async fn fail_all(&self, cause: TransportError) {
        let pending = self.exchanges.drain();
        if pending.is_empty() {
            return;
        }
        debug!(count = pending.len(), %cause, "failing pending exchanges");
        for exchange in pending {
            if exchange.message.is_connect() {
                self.connected.store(false, Ordering::SeqCst);
            } else if exchange.message.is_disconnect() {
                self.disconnected.store(true, Ordering::SeqCst);
            }
            exchange
                .listener
                .on_failure(cause.clone(), std::slice::from_ref(&exchange.message))
                .await;
        }
    }

    /// Close the WebSocket session with a normal close frame.
    async fn close_session(&self, reason: &str) {
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            debug!(reason, "closing websocket session");
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: reason.to_string().into(),
            };
            let _ = sink.send(WsFrame::Close(Some(frame))).await;
            let _ = sink.close().await;
        }
    }

    /// Drop the session reference without a close handshake (the peer is
    /// already gone).
    async fn drop_session(&self) {
        self.writer.lock().await.take();
    }
}

/// Rewrite an HTTP URL into its WebSocket equivalent; other schemes pass
/// through unchanged.
fn mangle_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

fn build_request(url: &str, options: &TransportOptions) -> Result<Request, TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    let protocol = HeaderValue::from_str(&options.protocol)
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", protocol);
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangles_http_schemes() {
        assert_eq!(mangle_url("http://host:8080/cometd"), "ws://host:8080/cometd");
        assert_eq!(mangle_url("https://host/cometd"), "wss://host/cometd");
        assert_eq!(mangle_url("ws://host/cometd"), "ws://host/cometd");
        assert_eq!(mangle_url("wss://host/cometd"), "wss://host/cometd");
        assert_eq!(mangle_url("unix:///tmp/sock"), "unix:///tmp/sock");
    }

    #[test]
    fn request_carries_subprotocol() {
        let options = TransportOptions::default();
        let request = build_request("ws://localhost:1/cometd", &options).unwrap();
        assert_eq!(
            request
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok()),
            Some("cometd")
        );
    }
}
