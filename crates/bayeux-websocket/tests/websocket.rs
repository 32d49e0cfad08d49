//! Integration tests against in-process WebSocket servers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bayeux_protocol::{
    generate_json, parse_messages, Advice, Message, ReconnectPolicy, META_CONNECT, META_DISCONNECT,
};
use bayeux_transport::{ClientTransport, TransportError, TransportListener, TransportOptions};
use bayeux_websocket::WebSocketTransport;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::WebSocketStream;

#[derive(Debug)]
enum Event {
    Sending(Vec<String>),
    Messages(Vec<Message>),
    Failure(TransportError),
}

struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl TransportListener for Recorder {
    async fn on_sending(&self, messages: &[Message]) {
        let ids = messages.iter().filter_map(|m| m.id.clone()).collect();
        let _ = self.tx.send(Event::Sending(ids));
    }

    async fn on_messages(&self, messages: Vec<Message>) {
        let _ = self.tx.send(Event::Messages(messages));
    }

    async fn on_failure(&self, failure: TransportError, _messages: &[Message]) {
        let _ = self.tx.send(Event::Failure(failure));
    }
}

fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { tx }), rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a listener event")
        .expect("listener channel closed")
}

async fn accept_ws(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_hdr_async(stream, |request: &Request, mut response: Response| {
        // Negotiate whatever subprotocol the client offered.
        if let Some(protocol) = request.headers().get("Sec-WebSocket-Protocol") {
            response
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", protocol.clone());
        }
        Ok(response)
    })
    .await
    .unwrap()
}

fn successful_reply(message: &Message) -> Message {
    let mut reply = Message::new(&message.channel);
    reply.id = message.id.clone();
    reply.successful = Some(true);
    reply
}

fn request(channel: &str, id: &str) -> Message {
    let mut message = Message::new(channel);
    message.id = Some(id.to_string());
    message
}

fn transport(addr: SocketAddr, options: TransportOptions) -> WebSocketTransport {
    let transport = WebSocketTransport::new(format!("http://{addr}/cometd"), options);
    transport.init();
    transport
}

/// Replies to every message in every batch, forever.
async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        while let Some(Ok(frame)) = ws.next().await {
            if let WsFrame::Text(text) = frame {
                let batch = parse_messages(&text).unwrap();
                let replies: Vec<Message> = batch.iter().map(successful_reply).collect();
                if ws
                    .send(WsFrame::Text(generate_json(&replies).unwrap()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    });
    addr
}

#[tokio::test]
async fn replies_correlate_and_on_sending_comes_first() {
    let addr = spawn_echo_server().await;
    let transport = transport(addr, TransportOptions::default());
    let (listener, mut rx) = recorder();

    let mut publish = request("/echo", "2");
    publish.data = Some(json!("ping"));
    transport
        .send(listener, vec![request("/meta/handshake", "1"), publish])
        .await;

    match next_event(&mut rx).await {
        Event::Sending(ids) => assert_eq!(ids, vec!["1", "2"]),
        other => panic!("expected the sending notification first, got {other:?}"),
    }

    let mut seen = Vec::new();
    while seen.len() < 2 {
        match next_event(&mut rx).await {
            Event::Messages(messages) => {
                for reply in messages {
                    assert!(reply.is_successful());
                    seen.push(reply.id.unwrap());
                }
            }
            other => panic!("expected replies, got {other:?}"),
        }
    }
    seen.sort();
    assert_eq!(seen, vec!["1", "2"]);
    assert_eq!(transport.pending_exchanges(), 0);
}

#[tokio::test]
async fn expiry_fires_once_and_a_late_reply_is_ignored() {
    // The server sits on the batch past the network-delay budget, then
    // replies anyway.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        if let Some(Ok(WsFrame::Text(text))) = ws.next().await {
            let batch = parse_messages(&text).unwrap();
            tokio::time::sleep(Duration::from_millis(600)).await;
            let replies: Vec<Message> = batch.iter().map(successful_reply).collect();
            let _ = ws
                .send(WsFrame::Text(generate_json(&replies).unwrap()))
                .await;
        }
    });

    let options = TransportOptions::default().with_max_network_delay(Duration::from_millis(200));
    let transport = transport(addr, options);
    let (recorder, mut rx) = recorder();

    transport.send(recorder, vec![request("/echo", "1")]).await;

    assert!(matches!(next_event(&mut rx).await, Event::Sending(_)));
    match next_event(&mut rx).await {
        Event::Failure(TransportError::Timeout) => {}
        other => panic!("expected a timeout failure, got {other:?}"),
    }
    assert_eq!(transport.pending_exchanges(), 0);

    // The late reply arrives around t=600ms; nothing more may be delivered.
    assert!(
        tokio::time::timeout(Duration::from_millis(700), rx.recv())
            .await
            .is_err(),
        "late reply must not be delivered after the timeout"
    );
}

#[tokio::test]
async fn connect_advice_timeout_extends_the_expiry_budget() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;

        // First connect: answered immediately, advising a long-poll timeout.
        if let Some(Ok(WsFrame::Text(text))) = ws.next().await {
            let batch = parse_messages(&text).unwrap();
            let mut reply = successful_reply(&batch[0]);
            reply.advice = Some(Advice {
                reconnect: Some(ReconnectPolicy::Retry),
                timeout: Some(1000),
                ..Advice::default()
            });
            ws.send(WsFrame::Text(generate_json(&[reply]).unwrap()))
                .await
                .unwrap();
        }

        // Second connect: held beyond the bare network delay, inside the
        // advised window.
        if let Some(Ok(WsFrame::Text(text))) = ws.next().await {
            let batch = parse_messages(&text).unwrap();
            tokio::time::sleep(Duration::from_millis(350)).await;
            let reply = successful_reply(&batch[0]);
            let _ = ws.send(WsFrame::Text(generate_json(&[reply]).unwrap())).await;
        }
    });

    let options = TransportOptions::default().with_max_network_delay(Duration::from_millis(150));
    let transport = transport(addr, options);
    let (recorder, mut rx) = recorder();

    transport
        .send(
            Arc::clone(&recorder) as Arc<dyn TransportListener>,
            vec![request(META_CONNECT, "1")],
        )
        .await;
    assert!(matches!(next_event(&mut rx).await, Event::Sending(_)));
    assert!(matches!(next_event(&mut rx).await, Event::Messages(_)));

    transport
        .send(recorder, vec![request(META_CONNECT, "2")])
        .await;
    assert!(matches!(next_event(&mut rx).await, Event::Sending(_)));
    match next_event(&mut rx).await {
        // Without the remembered advice the 150ms budget would have expired
        // long before the 350ms reply.
        Event::Messages(messages) => assert_eq!(messages[0].id.as_deref(), Some("2")),
        other => panic!("expected the held reply, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_upgrade_disables_the_transport() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buffer = [0u8; 4096];
        let _ = stream.read(&mut buffer).await;
        stream
            .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n")
            .await
            .unwrap();
        stream.flush().await.unwrap();
    });

    let transport = transport(addr, TransportOptions::default());
    let (recorder, mut rx) = recorder();

    assert!(transport.accept("1.0"));
    transport
        .send(recorder, vec![request("/meta/handshake", "1")])
        .await;

    match next_event(&mut rx).await {
        Event::Failure(TransportError::UpgradeRejected {
            http_code,
            websocket_code,
        }) => {
            assert_eq!(http_code, 404);
            assert_eq!(websocket_code, 1002);
        }
        other => panic!("expected an upgrade rejection, got {other:?}"),
    }
    // The rejection is permanent for this transport instance.
    assert!(!transport.accept("1.0"));
}

#[tokio::test]
async fn connect_refused_fails_the_batch_but_keeps_the_transport_supported() {
    // Bind then drop to get a port nobody is listening on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = transport(addr, TransportOptions::default());
    let (recorder, mut rx) = recorder();

    transport
        .send(recorder, vec![request("/meta/handshake", "1")])
        .await;

    match next_event(&mut rx).await {
        Event::Failure(TransportError::ConnectFailed(_)) => {}
        other => panic!("expected a connect failure, got {other:?}"),
    }
    assert!(transport.accept("1.0"));
    assert_eq!(transport.pending_exchanges(), 0);
}

#[tokio::test]
async fn abort_fails_pending_exchanges_and_rejects_new_sends() {
    // A server that reads but never replies.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    let transport = transport(addr, TransportOptions::default());
    let (recorder, mut rx) = recorder();

    transport
        .send(
            Arc::clone(&recorder) as Arc<dyn TransportListener>,
            vec![request("/echo", "1")],
        )
        .await;
    assert!(matches!(next_event(&mut rx).await, Event::Sending(_)));

    transport.abort().await;
    match next_event(&mut rx).await {
        Event::Failure(TransportError::Aborted) => {}
        other => panic!("expected an abort failure, got {other:?}"),
    }
    assert_eq!(transport.pending_exchanges(), 0);

    transport.send(recorder, vec![request("/echo", "2")]).await;
    match next_event(&mut rx).await {
        Event::Failure(TransportError::IllegalState(_)) => {}
        other => panic!("expected an illegal-state failure, got {other:?}"),
    }
}

#[tokio::test]
async fn peer_close_fails_pending_exchanges() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        // Read the batch, then slam the door.
        let _ = ws.next().await;
        let _ = ws.close(None).await;
    });

    let transport = transport(addr, TransportOptions::default());
    let (recorder, mut rx) = recorder();

    transport.send(recorder, vec![request("/echo", "1")]).await;
    assert!(matches!(next_event(&mut rx).await, Event::Sending(_)));

    match next_event(&mut rx).await {
        Event::Failure(TransportError::Closed { .. }) => {}
        other => panic!("expected a close failure, got {other:?}"),
    }
    assert_eq!(transport.pending_exchanges(), 0);
}

#[tokio::test]
async fn pushed_messages_reach_the_push_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        if let Some(Ok(WsFrame::Text(text))) = ws.next().await {
            let batch = parse_messages(&text).unwrap();
            // A broadcast for a channel the client observes, then the reply.
            let mut broadcast = Message::new("/news");
            broadcast.data = Some(json!({"headline": "ws"}));
            let replies: Vec<Message> = batch.iter().map(successful_reply).collect();
            ws.send(WsFrame::Text(generate_json(&[broadcast]).unwrap()))
                .await
                .unwrap();
            ws.send(WsFrame::Text(generate_json(&replies).unwrap()))
                .await
                .unwrap();
        }
    });

    let transport = transport(addr, TransportOptions::default());
    let (batch_listener, mut batch_rx) = recorder();
    let (push_listener, mut push_rx) = recorder();
    transport.set_push_listener(push_listener);

    transport
        .send(batch_listener, vec![request("/meta/handshake", "1")])
        .await;

    match next_event(&mut push_rx).await {
        Event::Messages(messages) => {
            assert_eq!(messages[0].channel, "/news");
            assert!(!messages[0].is_reply());
        }
        other => panic!("expected a pushed broadcast, got {other:?}"),
    }

    assert!(matches!(next_event(&mut batch_rx).await, Event::Sending(_)));
    assert!(matches!(next_event(&mut batch_rx).await, Event::Messages(_)));
}

#[tokio::test]
async fn disconnect_reply_closes_the_session() {
    let (close_tx, mut close_rx) = mpsc::unbounded_channel::<String>();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut ws = accept_ws(&listener).await;
        while let Some(Ok(frame)) = ws.next().await {
            match frame {
                WsFrame::Text(text) => {
                    let batch = parse_messages(&text).unwrap();
                    let replies: Vec<Message> = batch.iter().map(successful_reply).collect();
                    let _ = ws
                        .send(WsFrame::Text(generate_json(&replies).unwrap()))
                        .await;
                }
                WsFrame::Close(frame) => {
                    let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    let _ = close_tx.send(reason);
                    break;
                }
                _ => {}
            }
        }
    });

    let transport = transport(addr, TransportOptions::default());
    let (recorder, mut rx) = recorder();

    transport
        .send(recorder, vec![request(META_DISCONNECT, "1")])
        .await;
    assert!(matches!(next_event(&mut rx).await, Event::Sending(_)));
    assert!(matches!(next_event(&mut rx).await, Event::Messages(_)));

    let reason = tokio::time::timeout(Duration::from_secs(5), close_rx.recv())
        .await
        .expect("timed out waiting for the close frame")
        .expect("server channel closed");
    assert_eq!(reason, "Disconnect");
}
