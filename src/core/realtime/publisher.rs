//! Publishes a session's event stream to a relay.
//!
//! The publisher connects to a relay's upstream endpoint, waits for the
//! relay's `connection.complete`, then forwards every envelope from
//! [`Session::events`], tagged with the session id. Consumers on the relay may
//! inject base64 PCM16 audio:
//! - `user.audio.input` becomes a user audio item followed by a response
//! - `user.audio.stream` is appended to the input audio buffer, in order
//!
//! An attached publisher holds a session handle, so the session stays open
//! until the publisher is detached or the session is closed.

use base64::prelude::*;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::base::{RealtimeError, RealtimeResult};
use super::codec::Envelope;
use super::session::Session;

/// Environment variable naming the relay endpoint.
pub const RELAY_URL_ENV: &str = "REALTIME_RELAY_URL";

/// Relay upstream endpoint used when nothing is configured.
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:30020/provider";

/// Injected envelope type carrying a complete user utterance.
pub const USER_AUDIO_INPUT: &str = "user.audio.input";

/// Injected envelope type carrying a chunk of streamed user audio.
pub const USER_AUDIO_STREAM: &str = "user.audio.stream";

/// Handshake frame every relay peer receives first.
const CONNECTION_COMPLETE: &str = "connection.complete";

/// Where and how to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPublisherConfig {
    /// Relay upstream endpoint
    pub url: String,
    /// Turn injected `user.audio.input` envelopes into audio items
    pub accept_audio_input: bool,
    /// Append injected `user.audio.stream` chunks to the input audio buffer
    pub accept_audio_stream: bool,
}

impl Default for RelayPublisherConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RELAY_URL.to_string(),
            accept_audio_input: true,
            accept_audio_stream: true,
        }
    }
}

impl RelayPublisherConfig {
    /// Read the endpoint from `REALTIME_RELAY_URL`, falling back to the
    /// default.
    pub fn from_env() -> Self {
        let url = std::env::var(RELAY_URL_ENV)
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());
        Self {
            url,
            ..Default::default()
        }
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// A running publisher. Dropping it disconnects from the relay.
pub struct RelayPublisher {
    url: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RelayPublisher {
    /// Connect to the relay and start forwarding `session`'s events.
    pub async fn attach(session: &Session, config: RelayPublisherConfig) -> RealtimeResult<Self> {
        let timeout = session.inner.options.request_timeout;
        let handshake = async {
            let (mut ws_stream, _) = tokio_tungstenite::connect_async(config.url.as_str())
                .await
                .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
            while let Some(msg) = ws_stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match Envelope::from_text(&text) {
                        Ok(envelope) if envelope.event_type() == CONNECTION_COMPLETE => {
                            return Ok(ws_stream);
                        }
                        _ => debug!("Ignoring relay frame before connection.complete"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => return Err(RealtimeError::ConnectionFailed(e.to_string())),
                }
            }
            Err(RealtimeError::ConnectionFailed(
                "relay closed before connection.complete".to_string(),
            ))
        };
        let ws_stream = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| RealtimeError::Timeout(format!("connecting to relay {}", config.url)))??;

        info!(session_id = %session.id(), url = %config.url, "Publishing session to relay");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let mut events = session.events();
        let mut status = session.status_changes();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let session = session.clone();
        let accept_audio_input = config.accept_audio_input;

        // Chunks must reach the buffer in arrival order, so one task appends them.
        let voice_in = config.accept_audio_stream.then(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(stream_audio(session.clone(), rx));
            tx
        });

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }

                    changed = status.changed() => {
                        if changed.is_err() || status.borrow_and_update().is_terminal() {
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        }
                    }

                    event = events.recv() => match event {
                        Ok(envelope) => {
                            let tagged = envelope
                                .with_field("session_id", Value::String(session.id().to_string()));
                            if let Err(e) = ws_sink.send(tagged.to_message()).await {
                                error!("Failed to publish to relay: {}", e);
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(session_id = %session.id(), skipped, "Relay publisher lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },

                    msg = ws_stream.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let Ok(envelope) = Envelope::from_text(&text) else {
                                continue;
                            };
                            match envelope.event_type() {
                                USER_AUDIO_INPUT if accept_audio_input => {
                                    tokio::spawn(handle_audio_input(session.clone(), envelope));
                                }
                                USER_AUDIO_STREAM => {
                                    if let Some(tx) = &voice_in {
                                        let _ = tx.send(envelope);
                                    }
                                }
                                _ => {}
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!(session_id = %session.id(), "Relay closed the publisher connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(session_id = %session.id(), error = %e, "Relay connection failed");
                            break;
                        }
                    },
                }
            }
            debug!(session_id = %session.id(), "Relay publisher stopped");
        });

        Ok(Self {
            url: config.url,
            cancel,
            handle,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the forward loop is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop publishing and close the relay connection.
    pub fn detach(&self) {
        self.cancel.cancel();
    }
}

impl Drop for RelayPublisher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Decode the base64 audio of an injected envelope, read from `bytes` or,
/// failing that, `audio`.
fn injected_audio(envelope: &Envelope) -> RealtimeResult<Vec<u8>> {
    let encoded = ["bytes", "audio"]
        .iter()
        .find_map(|key| envelope.get(key).and_then(Value::as_str))
        .ok_or_else(|| {
            RealtimeError::ProtocolError(format!("{} without audio", envelope.event_type()))
        })?;
    BASE64_STANDARD
        .decode(encoded)
        .map_err(|e| RealtimeError::ProtocolError(format!("invalid injected audio: {e}")))
}

async fn handle_audio_input(session: Session, envelope: Envelope) {
    let pcm = match injected_audio(&envelope) {
        Ok(pcm) => pcm,
        Err(e) => {
            warn!(session_id = %session.id(), error = %e, "Ignoring injected audio");
            return;
        }
    };

    if let Err(e) = session.create_audio(&pcm).await {
        warn!(session_id = %session.id(), error = %e, "Failed to add injected audio");
        return;
    }
    match session.respond().await {
        Ok(outcome) => debug!(
            session_id = %session.id(),
            completed = outcome.is_completed(),
            "Responded to injected audio"
        ),
        Err(e) => warn!(session_id = %session.id(), error = %e, "Failed to respond to injected audio"),
    }
}

/// Append streamed chunks to the input audio buffer until the publisher stops.
async fn stream_audio(session: Session, mut chunks: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = chunks.recv().await {
        let pcm = match injected_audio(&envelope) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "Ignoring streamed audio");
                continue;
            }
        };
        if let Err(e) = session.append_input_audio_buffer(&pcm).await {
            warn!(session_id = %session.id(), error = %e, "Failed to append streamed audio");
            if session.status().is_terminal() {
                break;
            }
        }
    }
}
