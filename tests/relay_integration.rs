//! Relay Integration Tests
//!
//! Runs the relay on an ephemeral port and connects real websocket peers.

mod mock_providers;

use std::net::SocketAddr;
use std::time::Duration;

use base64::prelude::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use mock_providers::{MockRealtime, ResponseMode};
use realtime_gateway::core::realtime::{
    RealtimeError, RelayPublisher, RelayPublisherConfig, Session, SessionConfig, SessionOptions,
};
use realtime_gateway::{RelayMode, routes::relay::serve_relay, state::AppState};

type Peer = WebSocketStream<MaybeTlsStream<TcpStream>>;

const QUIET: Duration = Duration::from_millis(200);

async fn start_relay(mode: RelayMode) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(mode);
    tokio::spawn(async move {
        if let Err(e) = serve_relay(listener, state).await {
            eprintln!("Relay server error: {}", e);
        }
    });
    addr
}

/// Connect and consume the handshake frame.
async fn connect(addr: SocketAddr, path: &str) -> Peer {
    let (mut ws, _) = connect_async(format!("ws://{}{}", addr, path))
        .await
        .expect("connect to relay");
    let first = next_json(&mut ws).await;
    assert_eq!(first["type"], "connection.complete");
    ws
}

async fn next_json(ws: &mut Peer) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no frame within 5s")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("json frame");
        }
    }
}

/// Wait for the next text frame of `event_type`, skipping others.
async fn next_of_type(ws: &mut Peer, event_type: &str) -> Value {
    loop {
        let value = next_json(ws).await;
        if value["type"] == event_type {
            return value;
        }
    }
}

async fn send_json(ws: &mut Peer, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Whether nothing but pings arrives within [`QUIET`].
async fn stays_quiet(ws: &mut Peer) -> bool {
    loop {
        match timeout(QUIET, ws.next()).await {
            Err(_) => return true,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(_) => return false,
        }
    }
}

/// Whether the relay closes this peer.
async fn is_closed(ws: &mut Peer) -> bool {
    loop {
        match timeout(Duration::from_secs(5), ws.next()).await {
            Err(_) => return false,
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
            Ok(Some(Ok(_))) => continue,
        }
    }
}

#[tokio::test]
async fn test_every_peer_gets_connection_complete() {
    let addr = start_relay(RelayMode::Simple).await;
    let _model = connect(addr, "/model").await;
    let _client = connect(addr, "/client").await;
}

#[tokio::test]
async fn test_simple_mode_fans_out_model_frames() {
    let addr = start_relay(RelayMode::Simple).await;
    let mut model = connect(addr, "/model").await;
    let mut a = connect(addr, "/client").await;
    let mut b = connect(addr, "/client").await;

    send_json(&mut model, json!({"type": "response.text.delta", "delta": "hi"})).await;

    assert_eq!(next_json(&mut a).await["delta"], "hi");
    assert_eq!(next_json(&mut b).await["delta"], "hi");
}

#[tokio::test]
async fn test_simple_mode_ignores_client_frames() {
    let addr = start_relay(RelayMode::Simple).await;
    let mut model = connect(addr, "/model").await;
    let mut client = connect(addr, "/client").await;

    send_json(&mut client, json!({"type": "user.audio.input", "audio": ""})).await;

    assert!(stays_quiet(&mut model).await);
}

#[tokio::test]
async fn test_simple_mode_replaces_model() {
    let addr = start_relay(RelayMode::Simple).await;
    let mut first = connect(addr, "/model").await;
    let mut client = connect(addr, "/client").await;
    let mut second = connect(addr, "/model").await;

    assert!(is_closed(&mut first).await);

    send_json(&mut second, json!({"type": "ping", "from": "second"})).await;
    assert_eq!(next_json(&mut client).await["from"], "second");
}

#[tokio::test]
async fn test_late_client_sees_only_new_frames() {
    let addr = start_relay(RelayMode::Simple).await;
    let mut model = connect(addr, "/model").await;
    let mut early = connect(addr, "/client").await;

    send_json(&mut model, json!({"type": "e", "n": 1})).await;
    assert_eq!(next_json(&mut early).await["n"], 1);

    let mut late = connect(addr, "/client").await;
    send_json(&mut model, json!({"type": "e", "n": 2})).await;

    assert_eq!(next_json(&mut late).await["n"], 2);
    assert_eq!(next_json(&mut early).await["n"], 2);
}

#[tokio::test]
async fn test_debug_mode_is_bidirectional() {
    let addr = start_relay(RelayMode::Debug).await;
    let mut p1 = connect(addr, "/provider").await;
    let mut p2 = connect(addr, "/provider").await;
    let mut consumer = connect(addr, "/consumer").await;

    send_json(&mut consumer, json!({"type": "inject", "n": 7})).await;
    assert_eq!(next_json(&mut p1).await["n"], 7);
    assert_eq!(next_json(&mut p2).await["n"], 7);

    send_json(&mut p1, json!({"type": "event", "from": "p1"})).await;
    assert_eq!(next_json(&mut consumer).await["from"], "p1");
    assert!(stays_quiet(&mut p2).await);
}

#[tokio::test]
async fn test_unknown_path_is_closed() {
    let addr = start_relay(RelayMode::Simple).await;
    let (mut ws, _) = connect_async(format!("ws://{}/elsewhere", addr))
        .await
        .expect("unknown paths still upgrade");

    assert!(is_closed(&mut ws).await);
}

#[tokio::test]
async fn test_simple_paths_are_not_served_in_debug_mode() {
    let addr = start_relay(RelayMode::Debug).await;
    let (mut ws, _) = connect_async(format!("ws://{}/model", addr)).await.unwrap();

    assert!(is_closed(&mut ws).await);
}

#[tokio::test]
async fn test_publisher_forwards_session_events() {
    let mock = MockRealtime::start(ResponseMode::Complete).await;
    let addr = start_relay(RelayMode::Debug).await;
    let session = Session::open(SessionConfig::text("Be brief."), mock.options())
        .await
        .unwrap();

    let mut consumer = connect(addr, "/consumer").await;
    let publisher = RelayPublisher::attach(
        &session,
        RelayPublisherConfig::with_url(format!("ws://{}/provider", addr)),
    )
    .await
    .unwrap();
    assert!(publisher.is_running());

    session.respond().await.unwrap();

    let done = next_of_type(&mut consumer, "response.done").await;
    assert_eq!(done["session_id"], session.id());
    assert_eq!(done["response"]["status"], "completed");

    publisher.detach();
    session.close();
}

#[tokio::test]
async fn test_injected_audio_triggers_a_response() {
    let mock = MockRealtime::start(ResponseMode::Complete).await;
    let addr = start_relay(RelayMode::Debug).await;
    let session = Session::open(SessionConfig::default(), mock.options())
        .await
        .unwrap();
    let _publisher = RelayPublisher::attach(
        &session,
        RelayPublisherConfig::with_url(format!("ws://{}/provider", addr)),
    )
    .await
    .unwrap();

    let mut consumer = connect(addr, "/consumer").await;
    send_json(
        &mut consumer,
        json!({
            "type": "user.audio.input",
            "bytes": BASE64_STANDARD.encode([0u8; 480])
        }),
    )
    .await;

    let created = next_of_type(&mut consumer, "conversation.item.created").await;
    assert!(created["item"]["id"].as_str().unwrap().starts_with("audio-"));
    next_of_type(&mut consumer, "response.done").await;
    mock.wait_for(0, "response.create", 1).await;

    session.close();
}

#[tokio::test]
async fn test_streamed_audio_is_appended_in_order() {
    let mock = MockRealtime::start(ResponseMode::Complete).await;
    let addr = start_relay(RelayMode::Debug).await;
    let session = Session::open(SessionConfig::default(), mock.options())
        .await
        .unwrap();
    let _publisher = RelayPublisher::attach(
        &session,
        RelayPublisherConfig::with_url(format!("ws://{}/provider", addr)),
    )
    .await
    .unwrap();

    let mut consumer = connect(addr, "/consumer").await;
    let chunks = [[1u8; 960], [2u8; 960], [3u8; 960]];
    for chunk in &chunks {
        send_json(
            &mut consumer,
            json!({ "type": "user.audio.stream", "bytes": BASE64_STANDARD.encode(chunk) }),
        )
        .await;
    }

    mock.wait_for(0, "input_audio_buffer.append", 3).await;
    let appended: Vec<Value> = mock
        .received(0)
        .into_iter()
        .filter(|v| v["type"] == "input_audio_buffer.append")
        .map(|v| v["audio"].clone())
        .collect();
    let expected: Vec<Value> = chunks
        .iter()
        .map(|c| Value::String(BASE64_STANDARD.encode(c)))
        .collect();
    assert_eq!(appended, expected);
    assert_eq!(mock.count(0, "response.create"), 0);

    session.close();
}

#[tokio::test]
async fn test_streamed_audio_ignored_when_disabled() {
    let mock = MockRealtime::start(ResponseMode::Complete).await;
    let addr = start_relay(RelayMode::Debug).await;
    let session = Session::open(SessionConfig::default(), mock.options())
        .await
        .unwrap();
    let _publisher = RelayPublisher::attach(
        &session,
        RelayPublisherConfig {
            accept_audio_stream: false,
            ..RelayPublisherConfig::with_url(format!("ws://{}/provider", addr))
        },
    )
    .await
    .unwrap();

    let mut consumer = connect(addr, "/consumer").await;
    send_json(
        &mut consumer,
        json!({ "type": "user.audio.stream", "bytes": BASE64_STANDARD.encode([1u8; 960]) }),
    )
    .await;
    send_json(
        &mut consumer,
        json!({ "type": "user.audio.input", "bytes": BASE64_STANDARD.encode([0u8; 480]) }),
    )
    .await;

    next_of_type(&mut consumer, "response.done").await;
    assert_eq!(mock.count(0, "input_audio_buffer.append"), 0);

    session.close();
}

#[tokio::test]
async fn test_publisher_waits_for_relay_handshake() {
    // The model server never sends connection.complete.
    let mock = MockRealtime::start(ResponseMode::Complete).await;
    let options = SessionOptions {
        request_timeout: Duration::from_millis(300),
        ..mock.options()
    };
    let session = Session::open(SessionConfig::default(), options)
        .await
        .unwrap();

    let result = RelayPublisher::attach(&session, RelayPublisherConfig::with_url(mock.url())).await;

    assert!(matches!(result, Err(RealtimeError::Timeout(_))));
    session.close();
}
