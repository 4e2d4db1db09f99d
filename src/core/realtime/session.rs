//! Session lifecycle management.
//!
//! A [`Session`] owns exactly one upstream connection at a time and walks the
//! status machine:
//!
//! ```text
//! initializing ──► available ──► error ──► recovering ──► initializing ──► available
//!                      │            └──► closed (no recovery policy)
//!                      └──► expired (ttl)      * ──► closed (close())
//! ```
//!
//! Every outgoing envelope is logged before it is queued on the socket; every
//! incoming envelope is logged and re-emitted on [`Session::events`] in
//! receipt order. Requests wait (bounded by the request timeout) while the
//! session is initializing or recovering, and are never sent unless the
//! status is `available`.

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::base::{RealtimeError, RealtimeResult, SessionStatus};
use super::codec::Envelope;
use super::config::{ModelVariant, ResolvedOptions, SessionOptions};
use super::connection::{Connection, Disconnect, InboundHook};
use super::correlation::{Correlator, Matcher};
use super::items::ItemRecord;
use super::log::{Direction, LogEntry, MessageLog, now_millis};
use super::messages::{ClientEvent, Response, ServerEvent, SessionConfig};
use super::recovery;
use super::response::{ResponseSummary, summarize_response};
use super::usage::UsageLedger;

/// Capacity of the public event and response streams.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Handle to a realtime session. Cheap to clone.
///
/// Dropping the last handle closes the session, as [`Session::close`] does.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
    _guard: Arc<SessionGuard>,
}

/// Shared by every clone of a [`Session`]; closes the session on drop so the
/// supervisor and socket tasks do not outlive their handles.
struct SessionGuard(Arc<SessionInner>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.0.close() {
            debug!(session_id = %self.0.id, "Last session handle dropped");
        }
    }
}

pub(crate) struct SessionInner {
    pub(crate) id: String,
    pub(crate) options: ResolvedOptions,
    config: RwLock<SessionConfig>,
    remote_id: RwLock<Option<String>>,
    status: watch::Sender<SessionStatus>,
    connection: ArcSwapOption<Connection>,
    pub(crate) log: MessageLog,
    pub(crate) ledger: Mutex<UsageLedger>,
    pub(crate) items: Mutex<Vec<ItemRecord>>,
    events: broadcast::Sender<Envelope>,
    responses: broadcast::Sender<ResponseSummary>,
    send_lock: tokio::sync::Mutex<()>,
    pub(crate) generation_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    created_at: Instant,
    item_counter: AtomicU64,
}

impl Session {
    /// Connect, wait for `session.created`, apply `config` and wait for
    /// `session.updated`.
    ///
    /// Configuration faults (missing credentials, invalid parameters) are
    /// reported before any socket is opened.
    pub async fn open(config: SessionConfig, options: SessionOptions) -> RealtimeResult<Session> {
        config
            .validate()
            .map_err(RealtimeError::InvalidConfiguration)?;
        let options = options.resolve()?;

        let (status, _) = watch::channel(SessionStatus::Initializing);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (responses, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let inner = Arc::new(SessionInner {
            id: options.session_name.clone(),
            options,
            config: RwLock::new(config.clone()),
            remote_id: RwLock::new(None),
            status,
            connection: ArcSwapOption::empty(),
            log: MessageLog::new(),
            ledger: Mutex::new(UsageLedger::new()),
            items: Mutex::new(Vec::new()),
            events,
            responses,
            send_lock: tokio::sync::Mutex::new(()),
            generation_lock: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
            created_at: Instant::now(),
            item_counter: AtomicU64::new(0),
        });

        info!(
            session_id = %inner.id,
            model = %inner.options.model_id,
            "Opening realtime session"
        );

        let closed = match inner.initialize(config).await {
            Ok(closed) => closed,
            Err(e) => {
                error!(session_id = %inner.id, error = %e, "Failed to open session");
                inner.set_status(SessionStatus::Closed);
                inner.drop_connection();
                return Err(e);
            }
        };

        inner.set_status(SessionStatus::Available);
        tokio::spawn(supervise(inner.clone(), closed));

        Ok(Session {
            _guard: Arc::new(SessionGuard(inner.clone())),
            inner,
        })
    }

    /// Session name.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Server-assigned session id from the latest `session.created`.
    pub fn remote_id(&self) -> Option<String> {
        self.inner.remote_id.read().clone()
    }

    pub fn model(&self) -> ModelVariant {
        self.inner.options.model
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status()
    }

    /// Watch status transitions.
    pub fn status_changes(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Last acknowledged configuration.
    pub fn config(&self) -> SessionConfig {
        self.inner.config.read().clone()
    }

    /// Every incoming envelope, in receipt order. Slow receivers lose the
    /// oldest envelopes rather than stalling the socket.
    pub fn events(&self) -> broadcast::Receiver<Envelope> {
        self.inner.events.subscribe()
    }

    /// A summary of every `response.done` observed on the session.
    pub fn responses(&self) -> broadcast::Receiver<ResponseSummary> {
        self.inner.responses.subscribe()
    }

    /// Copy of the message log.
    pub fn log(&self) -> Vec<LogEntry> {
        self.inner.log.snapshot()
    }

    /// Copy of the accumulated usage.
    pub fn usage(&self) -> UsageLedger {
        self.inner.ledger.lock().clone()
    }

    /// Apply a new configuration and wait for `session.updated`.
    pub async fn update(&self, config: SessionConfig) -> RealtimeResult<SessionConfig> {
        config
            .validate()
            .map_err(RealtimeError::InvalidConfiguration)?;
        let envelope = Envelope::from_event(&ClientEvent::SessionUpdate {
            session: config.clone(),
        })?;
        let ack = self
            .inner
            .request(envelope, Matcher::of_type("session.updated"))
            .await?;
        let applied = self.inner.apply_session_ack(&ack, config);
        debug!(session_id = %self.inner.id, "Session configuration updated");
        Ok(applied)
    }

    /// Close the socket and stop background work. Idempotent.
    pub fn close(&self) {
        if self.inner.close() {
            info!(session_id = %self.inner.id, "Session closed");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("status", &self.inner.status())
            .field("model", &self.inner.options.model_id)
            .finish()
    }
}

impl SessionInner {
    pub(crate) fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Move to `next` unless the session already reached a terminal status.
    pub(crate) fn set_status(&self, next: SessionStatus) {
        let changed = self.status.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!(session_id = %self.id, status = %next, "Session status changed");
        }
    }

    /// Connect and wait for `session.created`. The new connection becomes
    /// the session's current connection.
    pub(crate) async fn connect(
        self: &Arc<Self>,
    ) -> RealtimeResult<(Arc<Connection>, oneshot::Receiver<Disconnect>)> {
        let correlator = Correlator::new();
        let created = correlator.await_match(Matcher::of_type("session.created"));

        let (connection, closed) = Connection::open(
            &self.options.url,
            &self.options.api_key,
            correlator,
            self.inbound_hook(),
            self.options.request_timeout,
        )
        .await?;

        let created = tokio::time::timeout(self.options.request_timeout, created)
            .await
            .map_err(|_| RealtimeError::Timeout("waiting for session.created".to_string()))??;

        match created.decode::<ServerEvent>() {
            Ok(ServerEvent::SessionCreated { session }) => {
                *self.remote_id.write() = Some(session.id);
            }
            _ => warn!(session_id = %self.id, "session.created without a session object"),
        }

        let connection = Arc::new(connection);
        self.connection.store(Some(connection.clone()));
        Ok((connection, closed))
    }

    /// Initial connect-handshake-configure sequence.
    async fn initialize(
        self: &Arc<Self>,
        config: SessionConfig,
    ) -> RealtimeResult<oneshot::Receiver<Disconnect>> {
        let (connection, closed) = self.connect().await?;
        let envelope = Envelope::from_event(&ClientEvent::SessionUpdate {
            session: config.clone(),
        })?;
        let ack = self
            .exchange(&connection, envelope, Matcher::of_type("session.updated"), true)
            .await?;
        self.apply_session_ack(&ack, config);
        Ok(closed)
    }

    fn apply_session_ack(&self, ack: &Envelope, requested: SessionConfig) -> SessionConfig {
        let applied = match ack.decode::<ServerEvent>() {
            Ok(ServerEvent::SessionUpdated { session }) => session.config,
            _ => {
                warn!(session_id = %self.id, "session.updated without a session object");
                requested
            }
        };
        *self.config.write() = applied.clone();
        applied
    }

    fn inbound_hook(self: &Arc<Self>) -> InboundHook {
        let weak = Arc::downgrade(self);
        Arc::new(move |envelope: &Envelope| {
            if let Some(inner) = weak.upgrade() {
                inner.on_incoming(envelope);
            }
        })
    }

    fn on_incoming(&self, envelope: &Envelope) {
        self.log.append(Direction::Incoming, envelope.clone());
        match envelope.event_type() {
            "error" => warn!(session_id = %self.id, event = %envelope, "Upstream reported an error"),
            "response.done" => {
                let response = match envelope.decode::<ServerEvent>() {
                    Ok(ServerEvent::ResponseDone { response }) => response,
                    _ => {
                        warn!(session_id = %self.id, "Malformed response.done");
                        let id = envelope.response_id().unwrap_or_default().to_string();
                        Response::salvage(envelope.get("response"), &id)
                    }
                };
                let _ = self
                    .responses
                    .send(summarize_response(&response, self.options.model));
            }
            _ => {}
        }
        let _ = self.events.send(envelope.clone());
    }

    /// Wait until the session is available and return its connection.
    pub(crate) async fn ready(&self) -> RealtimeResult<Arc<Connection>> {
        let mut rx = self.status.subscribe();
        let wait = async {
            loop {
                let status = *rx.borrow_and_update();
                if status.is_terminal() {
                    return Err(status.as_error());
                }
                if status == SessionStatus::Available
                    && let Some(connection) = self.connection.load_full()
                {
                    return Ok(connection);
                }
                rx.changed()
                    .await
                    .map_err(|_| RealtimeError::SessionClosed)?;
            }
        };
        match tokio::time::timeout(self.options.request_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(RealtimeError::NotAvailable(self.status())),
        }
    }

    /// Log (when `record`) and queue an envelope on `connection`.
    pub(crate) async fn transmit(
        &self,
        connection: &Connection,
        envelope: Envelope,
        record: bool,
    ) -> RealtimeResult<()> {
        let _guard = self.send_lock.lock().await;
        if record {
            self.log.append(Direction::Outgoing, envelope.clone());
        }
        connection.send(envelope).await
    }

    /// Send and wait for the acknowledgment matching `ack`.
    pub(crate) async fn exchange(
        &self,
        connection: &Connection,
        envelope: Envelope,
        ack: Matcher,
        record: bool,
    ) -> RealtimeResult<Envelope> {
        let description = format!("{ack:?}");
        let waiter = connection.correlator().await_match(ack);
        self.transmit(connection, envelope, record).await?;
        match tokio::time::timeout(self.options.request_timeout, waiter).await {
            Ok(result) => result.map_err(|e| self.explain(e)),
            Err(_) => Err(RealtimeError::Timeout(format!("waiting for {description}"))),
        }
    }

    /// Send on the current connection once available, without waiting.
    pub(crate) async fn send(&self, envelope: Envelope) -> RealtimeResult<()> {
        let connection = self.ready().await?;
        self.transmit(&connection, envelope, true).await
    }

    /// Send on the current connection once available and wait for `ack`.
    pub(crate) async fn request(&self, envelope: Envelope, ack: Matcher) -> RealtimeResult<Envelope> {
        let connection = self.ready().await?;
        self.exchange(&connection, envelope, ack, true).await
    }

    /// Replace a connection-level error with the session's terminal status
    /// when the session ended while the caller was waiting.
    pub(crate) fn explain(&self, error: RealtimeError) -> RealtimeError {
        match (&error, self.status()) {
            (RealtimeError::ConnectionLost, status) if status.is_terminal() => status.as_error(),
            _ => error,
        }
    }

    pub(crate) fn next_item_id(&self, prefix: &str) -> String {
        let n = self.item_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{n}-{}", now_millis())
    }

    pub(crate) fn drop_connection(&self) {
        if let Some(connection) = self.connection.swap(None) {
            connection.close();
        }
    }

    /// Move to `closed` and stop background work. Returns false when the
    /// session had already ended.
    fn close(&self) -> bool {
        if self.status().is_terminal() {
            return false;
        }
        self.set_status(SessionStatus::Closed);
        self.shutdown.cancel();
        self.drop_connection();
        true
    }

    fn expire(&self) {
        if self.status().is_terminal() {
            return;
        }
        self.set_status(SessionStatus::Expired);
        self.shutdown.cancel();
        self.drop_connection();
        warn!(session_id = %self.id, "Session expired");
    }
}

/// Background task: enforces the ttl and reacts to disconnects.
async fn supervise(inner: Arc<SessionInner>, mut closed: oneshot::Receiver<Disconnect>) {
    let deadline = inner.options.ttl.map(|ttl| inner.created_at + ttl);
    let expiry = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(expiry);

    loop {
        let reason = tokio::select! {
            _ = inner.shutdown.cancelled() => return,
            _ = &mut expiry => {
                inner.expire();
                return;
            }
            reason = &mut closed => reason
                .unwrap_or_else(|_| Disconnect::Unexpected("read loop aborted".to_string())),
        };

        let Disconnect::Unexpected(cause) = reason else {
            return;
        };
        if inner.status().is_terminal() {
            return;
        }

        inner.drop_connection();
        inner.set_status(SessionStatus::Error);
        warn!(session_id = %inner.id, cause = %cause, "Session lost its upstream connection");

        if !inner.options.recovery.enabled {
            error!(
                session_id = %inner.id,
                "No recovery policy configured, closing session"
            );
            inner.set_status(SessionStatus::Closed);
            inner.shutdown.cancel();
            return;
        }

        let recovered = tokio::select! {
            _ = inner.shutdown.cancelled() => {
                inner.drop_connection();
                return;
            }
            _ = &mut expiry => {
                inner.expire();
                return;
            }
            result = recovery::recover(&inner) => result,
        };

        match recovered {
            Ok(next) => closed = next,
            Err(e) => {
                error!(session_id = %inner.id, error = %e, "Session recovery failed");
                inner.set_status(SessionStatus::Closed);
                inner.shutdown.cancel();
                inner.drop_connection();
                return;
            }
        }
    }
}
