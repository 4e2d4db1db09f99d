//! Relay WebSocket handlers
//!
//! Every accepted peer is first sent `{"type":"connection.complete"}` and only
//! joins the hub once that frame is written. After that, frames it sends are
//! published to the opposite role and frames published by the opposite role
//! are forwarded to it, verbatim.

use axum::{
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use futures::{Sink, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::hub::{PeerHandle, PeerRole, RelayHub};
use crate::state::AppState;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Handshake frame sent to every accepted peer.
pub const CONNECTION_COMPLETE: &str = r#"{"type":"connection.complete"}"#;

/// `/model` or `/provider`
pub async fn upstream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    upgrade(ws, state, PeerRole::Upstream, addr)
}

/// `/client` or `/consumer`
pub async fn downstream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    upgrade(ws, state, PeerRole::Downstream, addr)
}

/// Any other path: websocket peers are accepted and closed at once.
pub async fn unknown_path_handler(
    uri: Uri,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => {
            warn!(path = %uri.path(), "Closing peer on unknown relay path");
            ws.on_upgrade(|mut socket| async move {
                let _ = socket.send(Message::Close(None)).await;
            })
        }
        Err(_) => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

/// `GET /`
pub async fn health_handler() -> &'static str {
    "ok"
}

fn upgrade(ws: WebSocketUpgrade, state: Arc<AppState>, role: PeerRole, addr: SocketAddr) -> Response {
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_peer(socket, state, role, addr))
}

/// Send the handshake frame, then subscribe the peer to the hub. Frames
/// published before the handshake is written are never forwarded to it.
async fn complete_handshake<S>(
    sender: &mut S,
    hub: &RelayHub,
    role: PeerRole,
    addr: SocketAddr,
) -> Result<PeerHandle, S::Error>
where
    S: Sink<Message> + Unpin,
{
    sender
        .send(Message::Text(CONNECTION_COMPLETE.into()))
        .await?;
    Ok(hub.join(role, Some(addr)))
}

async fn handle_peer(socket: WebSocket, state: Arc<AppState>, role: PeerRole, addr: SocketAddr) {
    let hub = &state.hub;
    let (mut sender, mut receiver) = socket.split();
    let PeerHandle {
        id,
        inbox,
        evicted,
        ..
    } = match complete_handshake(&mut sender, hub, role, addr).await {
        Ok(peer) => peer,
        Err(e) => {
            warn!(role = role.as_str(), addr = %addr, error = %e, "Failed to complete relay handshake");
            return;
        }
    };
    info!(peer_id = id, role = role.as_str(), addr = %addr, "Relay peer connected");

    // Forward task for frames published by the opposite role
    let forward_cancel = evicted.clone();
    let forward_task = tokio::spawn(async move {
        let Some(mut inbox) = inbox else {
            forward_cancel.cancelled().await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        };
        loop {
            tokio::select! {
                _ = forward_cancel.cancelled() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                frame = inbox.recv() => match frame {
                    Ok(frame) => {
                        if let Err(e) = sender.send(frame).await {
                            debug!(peer_id = id, error = %e, "Relay peer send failed");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(peer_id = id, skipped, "Relay peer lagging, frames skipped");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    loop {
        tokio::select! {
            _ = evicted.cancelled() => break,
            msg = receiver.next() => match msg {
                Some(Ok(frame @ (Message::Text(_) | Message::Binary(_)))) => {
                    let delivered = hub.publish(role, frame);
                    debug!(peer_id = id, delivered, "Relayed frame");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(peer_id = id, error = %e, "Relay peer read failed");
                    break;
                }
            },
        }
    }

    hub.leave(role, id);
    evicted.cancel();
    let _ = forward_task.await;
    info!(peer_id = id, role = role.as_str(), "Relay peer disconnected");
}
