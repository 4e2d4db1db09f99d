//! Scripted realtime model server
//!
//! Speaks enough of the realtime protocol to drive a [`Session`] end to end:
//! - `session.created` on connect, `session.updated` for every update
//! - item create/delete acknowledgments and buffer commits
//! - responses that complete, fail, call a tool, or never finish
//!
//! Every received envelope is recorded per connection so tests can check
//! what a session sent, including what it replayed after a disconnect.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use realtime_gateway::core::realtime::{ReconnectionConfig, RecoveryPolicy, SessionOptions};

/// Transcript of every completed mock response.
pub const MOCK_TRANSCRIPT: &str = "OK.";

/// How the mock answers `response.create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Stream two text deltas then `response.done` (completed)
    Complete,
    /// `response.done` with status `failed`
    Fail,
    /// `response.done` carrying a single function call
    ToolCall,
    /// `response.created` only; the response ends on `response.cancel`
    Silent,
    /// `response.done` (completed, with usage) that has no `output`
    NoOutput,
    /// `response.done` whose `output` is not a list of items
    Malformed,
}

/// Shared mock state.
pub struct MockState {
    mode: Mutex<ResponseMode>,
    /// Upcoming responses that fail before the mode applies again
    fail_next: AtomicU32,
    connections: AtomicU64,
    /// Connections not yet closed by either side
    open: AtomicU64,
    responses: AtomicU64,
    received: Mutex<Vec<Vec<Value>>>,
    drop_tx: broadcast::Sender<()>,
}

impl MockState {
    fn new(mode: ResponseMode) -> Self {
        let (drop_tx, _) = broadcast::channel(4);
        Self {
            mode: Mutex::new(mode),
            fail_next: AtomicU32::new(0),
            connections: AtomicU64::new(0),
            open: AtomicU64::new(0),
            responses: AtomicU64::new(0),
            received: Mutex::new(Vec::new()),
            drop_tx,
        }
    }
}

/// Handle to a running mock server.
pub struct MockRealtime {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockRealtime {
    /// Bind to an ephemeral port and start accepting.
    pub async fn start(mode: ResponseMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock realtime server");
        let addr = listener.local_addr().expect("mock address");
        let state = Arc::new(MockState::new(mode));

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        eprintln!("Mock realtime connection error: {}", e);
                    }
                });
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/v1/realtime", self.addr)
    }

    /// Session options pointed at this server with recovery disabled.
    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            url: Some(self.url()),
            request_timeout: Duration::from_secs(5),
            ..SessionOptions::with_api_key("sk-test")
        }
    }

    /// Session options pointed at this server with a fast-retrying policy.
    pub fn recovering_options(&self, mut policy: RecoveryPolicy) -> SessionOptions {
        policy.enabled = true;
        policy.reconnection = ReconnectionConfig {
            max_attempts: 3,
            initial_delay_ms: 20,
            max_delay_ms: 100,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        SessionOptions {
            recovery: policy,
            ..self.options()
        }
    }

    pub fn set_mode(&self, mode: ResponseMode) {
        *self.state.mode.lock() = mode;
    }

    pub fn fail_next(&self, count: u32) {
        self.state.fail_next.store(count, Ordering::SeqCst);
    }

    /// Close every open connection with a close frame.
    pub fn disconnect_all(&self) {
        let _ = self.state.drop_tx.send(());
    }

    /// Stop accepting; open connections stay up until dropped.
    pub fn stop_accepting(&self) {
        self.handle.abort();
    }

    pub fn connection_count(&self) -> usize {
        self.state.received.lock().len()
    }

    /// Connections still open.
    pub fn open_connections(&self) -> u64 {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Poll until every connection has closed.
    pub async fn wait_until_idle(&self) {
        for _ in 0..200 {
            if self.open_connections() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("mock still has {} open connections", self.open_connections());
    }

    /// Envelopes received on the `index`-th connection.
    pub fn received(&self, index: usize) -> Vec<Value> {
        self.state
            .received
            .lock()
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    /// Discriminators received on the `index`-th connection.
    pub fn received_types(&self, index: usize) -> Vec<String> {
        self.received(index)
            .iter()
            .filter_map(|v| v["type"].as_str().map(str::to_string))
            .collect()
    }

    /// How many envelopes of `event_type` arrived on the `index`-th connection.
    pub fn count(&self, index: usize, event_type: &str) -> usize {
        self.received_types(index)
            .iter()
            .filter(|t| t.as_str() == event_type)
            .count()
    }

    /// Poll until `event_type` has arrived `n` times on the `index`-th connection.
    pub async fn wait_for(&self, index: usize, event_type: &str, n: usize) {
        for _ in 0..200 {
            if self.count(index, event_type) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("mock never received {} x {}", n, event_type);
    }
}

impl Drop for MockRealtime {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let _open = OpenConnection::new(&state);
    let (mut write, mut read) = ws_stream.split();
    let mut dropped = state.drop_tx.subscribe();

    let conn_id = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let index = {
        let mut received = state.received.lock();
        received.push(Vec::new());
        received.len() - 1
    };
    let session_id = format!("sess_mock_{}", conn_id);

    let created = json!({
        "type": "session.created",
        "event_id": format!("event_{}_0", conn_id),
        "session": {
            "id": session_id,
            "object": "realtime.session",
            "model": "gpt-4o-realtime-preview-2024-12-17",
            "modalities": ["text", "audio"],
            "voice": "alloy",
            "turn_detection": null,
            "tools": []
        }
    });
    write.send(Message::Text(created.to_string().into())).await?;

    let mut pending: Vec<(String, Value)> = Vec::new();

    loop {
        tokio::select! {
            _ = dropped.recv() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = serde_json::from_str(&text)?;
                    state.received.lock()[index].push(value.clone());
                    for reply in replies(&state, &session_id, conn_id, &value, &mut pending) {
                        write.send(Message::Text(reply.to_string().into())).await?;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
    Ok(())
}

/// Counts a connection as open for as long as it lives.
struct OpenConnection(Arc<MockState>);

impl OpenConnection {
    fn new(state: &Arc<MockState>) -> Self {
        state.open.fetch_add(1, Ordering::SeqCst);
        Self(state.clone())
    }
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.0.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Server envelopes answering one client envelope.
fn replies(
    state: &MockState,
    session_id: &str,
    conn_id: u64,
    value: &Value,
    pending: &mut Vec<(String, Value)>,
) -> Vec<Value> {
    match value["type"].as_str().unwrap_or_default() {
        "session.update" => {
            let mut session = value["session"].clone();
            if let Some(obj) = session.as_object_mut() {
                obj.insert("id".into(), json!(session_id));
                obj.insert("object".into(), json!("realtime.session"));
            }
            vec![json!({ "type": "session.updated", "session": session })]
        }
        "conversation.item.create" => {
            let mut item = value["item"].clone();
            if let Some(obj) = item.as_object_mut() {
                obj.insert("status".into(), json!("completed"));
            }
            vec![json!({
                "type": "conversation.item.created",
                "previous_item_id": null,
                "item": item
            })]
        }
        "conversation.item.delete" => vec![json!({
            "type": "conversation.item.deleted",
            "item_id": value["item_id"]
        })],
        "input_audio_buffer.commit" => vec![json!({
            "type": "input_audio_buffer.committed",
            "previous_item_id": null,
            "item_id": format!("item_buffer_{}", conn_id)
        })],
        "response.create" => {
            let n = state.responses.fetch_add(1, Ordering::SeqCst) + 1;
            let response_id = format!("resp_{}_{}", conn_id, n);
            let metadata = value["response"]["metadata"].clone();
            let mut out = vec![json!({
                "type": "response.created",
                "response": {
                    "id": response_id,
                    "object": "realtime.response",
                    "status": "in_progress",
                    "output": [],
                    "metadata": metadata
                }
            })];

            let failing = state
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            let mode = if failing {
                ResponseMode::Fail
            } else {
                *state.mode.lock()
            };

            match mode {
                ResponseMode::Complete => {
                    for delta in ["O", "K."] {
                        out.push(json!({
                            "type": "response.text.delta",
                            "response_id": response_id,
                            "item_id": format!("msg_{}", n),
                            "output_index": 0,
                            "content_index": 0,
                            "delta": delta
                        }));
                    }
                    let output = json!([{
                        "id": format!("msg_{}", n),
                        "object": "realtime.item",
                        "type": "message",
                        "status": "completed",
                        "role": "assistant",
                        "content": [{ "type": "text", "text": MOCK_TRANSCRIPT }]
                    }]);
                    out.push(done(&response_id, "completed", output, &metadata));
                }
                ResponseMode::ToolCall => {
                    let output = json!([{
                        "id": format!("fc_{}", n),
                        "object": "realtime.item",
                        "type": "function_call",
                        "status": "completed",
                        "call_id": format!("call_{}", n),
                        "name": "get_weather",
                        "arguments": "{\"city\":\"Paris\"}"
                    }]);
                    out.push(done(&response_id, "completed", output, &metadata));
                }
                ResponseMode::Fail => {
                    let mut failed = done(&response_id, "failed", json!([]), &metadata);
                    failed["response"]["status_details"] = json!({
                        "type": "failed",
                        "error": { "type": "server_error", "message": "mock failure" }
                    });
                    out.push(failed);
                }
                ResponseMode::Silent => pending.push((response_id, metadata)),
                ResponseMode::NoOutput => {
                    let mut bare = done(&response_id, "completed", Value::Null, &metadata);
                    if let Some(response) = bare["response"].as_object_mut() {
                        response.remove("output");
                    }
                    out.push(bare);
                }
                ResponseMode::Malformed => {
                    out.push(done(&response_id, "completed", json!("garbled"), &metadata));
                }
            }
            out
        }
        "response.cancel" => match pending.pop() {
            Some((response_id, metadata)) => {
                vec![done(&response_id, "cancelled", json!([]), &metadata)]
            }
            None => vec![json!({
                "type": "error",
                "error": {
                    "type": "invalid_request_error",
                    "code": "response_cancel_not_active",
                    "message": "Cancellation failed: no active response found"
                }
            })],
        },
        _ => Vec::new(),
    }
}

fn done(response_id: &str, status: &str, output: Value, metadata: &Value) -> Value {
    json!({
        "type": "response.done",
        "response": {
            "id": response_id,
            "object": "realtime.response",
            "status": status,
            "output": output,
            "metadata": metadata,
            "usage": {
                "total_tokens": 30,
                "input_tokens": 20,
                "output_tokens": 10,
                "input_token_details": {
                    "cached_tokens": 0,
                    "text_tokens": 20,
                    "audio_tokens": 0,
                    "cached_tokens_details": { "text_tokens": 0, "audio_tokens": 0 }
                },
                "output_token_details": { "text_tokens": 10, "audio_tokens": 0 }
            }
        }
    })
}
