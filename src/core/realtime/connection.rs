//! One upstream WebSocket connection.
//!
//! A connection owns a single background task that runs the socket read loop
//! and drains the outgoing queue. Every received envelope is handed to the
//! session's inbound hook (log and event stream) and then to the
//! connection's [`Correlator`]. Neither step awaits, so a slow consumer can
//! never stall the socket.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::base::{RealtimeError, RealtimeResult};
use super::codec::Envelope;
use super::correlation::Correlator;

/// Channel capacity for outgoing envelopes.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Called for every received envelope, in receipt order, before correlation.
pub type InboundHook = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Why a connection's read loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// [`Connection::close`] was called
    Intentional,
    /// The socket failed or the peer closed it
    Unexpected(String),
}

/// Handle to a running connection.
pub struct Connection {
    outgoing: mpsc::Sender<Envelope>,
    correlator: Arc<Correlator>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Connection {
    /// Open a socket to `url` and start the read loop.
    ///
    /// `correlator` should already hold any waiter that must observe the
    /// first server envelope (e.g. `session.created`).
    pub async fn open(
        url: &str,
        api_key: &str,
        correlator: Arc<Correlator>,
        hook: InboundHook,
        connect_timeout: Duration,
    ) -> RealtimeResult<(Self, oneshot::Receiver<Disconnect>)> {
        let mut request = url
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| RealtimeError::AuthenticationFailed(e.to_string()))?,
        );
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _response) =
            tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| RealtimeError::Timeout(format!("connecting to {url}")))?
                .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        debug!(url = %url, "Upstream socket connected");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<Envelope>(WS_CHANNEL_CAPACITY);
        let (closed_tx, closed_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let task_correlator = correlator.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break Disconnect::Intentional;
                    }

                    // Handle outgoing messages
                    Some(envelope) = rx.recv() => {
                        trace!(event_type = envelope.event_type(), "Sending envelope");
                        if let Err(e) = ws_sink.send(envelope.to_message()).await {
                            error!("Failed to send WebSocket message: {}", e);
                            break Disconnect::Unexpected(e.to_string());
                        }
                    }

                    // Handle incoming messages
                    msg = ws_stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => match Envelope::from_text(&text) {
                                Ok(envelope) => {
                                    hook(&envelope);
                                    task_correlator.dispatch(&envelope);
                                }
                                Err(e) => warn!("Dropping malformed envelope: {}", e),
                            },
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    error!("Failed to send pong: {}", e);
                                    break Disconnect::Unexpected(e.to_string());
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let detail = frame
                                    .map(|f| format!("{} {}", f.code, f.reason.as_str()))
                                    .unwrap_or_else(|| "no close frame".to_string());
                                break Disconnect::Unexpected(format!("closed by peer: {detail}"));
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                break Disconnect::Unexpected(e.to_string());
                            }
                            None => {
                                break Disconnect::Unexpected("stream ended".to_string());
                            }
                        }
                    }
                }
            };

            task_correlator.close();
            if let Disconnect::Unexpected(ref reason) = reason {
                warn!(reason = %reason, "Upstream connection lost");
            }
            let _ = closed_tx.send(reason);
        });

        Ok((
            Self {
                outgoing: tx,
                correlator,
                cancel,
                handle,
            },
            closed_rx,
        ))
    }

    /// Queue an envelope for transmission.
    pub async fn send(&self, envelope: Envelope) -> RealtimeResult<()> {
        self.outgoing
            .send(envelope)
            .await
            .map_err(|_| RealtimeError::ConnectionLost)
    }

    /// The correlator fed by this connection.
    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Whether the read loop is still running.
    pub fn is_open(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Close intentionally; the read loop reports [`Disconnect::Intentional`].
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
