//! Disconnect recovery by replaying the outgoing log.
//!
//! After an unexpected close the session reconnects (with backoff), waits for
//! `session.created`, and replays its outgoing log in order:
//!
//! - `session.update` entries are always replayed and awaited.
//! - `conversation.item.create` entries are replayed only when
//!   `replay_messages` is set, skipping items deleted since.
//! - `response.create` entries are regenerated only when `replay_messages`
//!   is set, and at most `max_regenerate_response_count` of them; the rest
//!   are skipped with a warning. Usage of regenerated responses is merged.
//!
//! Every step waits for its acknowledgment before the next one is sent.
//! Replayed envelopes are not appended to the log a second time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::base::{RealtimeError, RealtimeResult, SessionStatus};
use super::codec::Envelope;
use super::connection::{Connection, Disconnect};
use super::correlation::Matcher;
use super::messages::{Response, ServerEvent};
use super::response::{DEFAULT_MAX_TIME_TO_RESPOND, TERMINAL_TYPES, belongs_to, binding_matcher};
use super::session::SessionInner;
use super::usage::compute_usage;

/// Counts reported once a replay finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Configuration and item envelopes re-sent
    pub recreated: usize,
    /// Responses regenerated
    pub regenerated: usize,
    /// Responses skipped because of the regeneration cap
    pub skipped_responses: usize,
}

/// Reconnect and replay; on success the session is available again.
pub(crate) async fn recover(
    inner: &Arc<SessionInner>,
) -> RealtimeResult<oneshot::Receiver<Disconnect>> {
    let started = Instant::now();
    let reconnection = &inner.options.recovery.reconnection;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let delay = reconnection.calculate_delay(attempt);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        inner.set_status(SessionStatus::Recovering);
        info!(session_id = %inner.id, attempt, "Reconnecting session");

        match replay_on_new_connection(inner).await {
            Ok((closed, report)) => {
                if inner.status().is_terminal() {
                    inner.drop_connection();
                    return Err(inner.status().as_error());
                }
                inner.set_status(SessionStatus::Available);
                info!(
                    session_id = %inner.id,
                    "Recovered session {} in {} ms. Recreated {} outgoing messages and regenerated {} responses.",
                    inner.id,
                    started.elapsed().as_millis(),
                    report.recreated,
                    report.regenerated
                );
                return Ok(closed);
            }
            Err(e) => {
                inner.drop_connection();
                warn!(session_id = %inner.id, attempt, error = %e, "Recovery attempt failed");
                if !reconnection.should_retry(attempt) {
                    return Err(RealtimeError::ConnectionFailed(format!(
                        "recovery gave up after {attempt} attempts: {e}"
                    )));
                }
            }
        }
    }
}

async fn replay_on_new_connection(
    inner: &Arc<SessionInner>,
) -> RealtimeResult<(oneshot::Receiver<Disconnect>, ReplayReport)> {
    let (connection, closed) = inner.connect().await?;
    inner.set_status(SessionStatus::Initializing);
    let report = replay(inner, &connection).await?;
    Ok((closed, report))
}

/// Replay the outgoing log against `connection`.
pub(crate) async fn replay(
    inner: &SessionInner,
    connection: &Connection,
) -> RealtimeResult<ReplayReport> {
    let policy = &inner.options.recovery;
    let deleted: HashSet<String> = inner
        .items
        .lock()
        .iter()
        .filter(|item| item.deleted)
        .map(|item| item.id.clone())
        .collect();

    let mut report = ReplayReport::default();
    for envelope in inner.log.outgoing() {
        match envelope.event_type() {
            "session.update" => {
                inner
                    .exchange(connection, envelope, Matcher::of_type("session.updated"), false)
                    .await?;
                report.recreated += 1;
            }
            "conversation.item.create" if policy.replay_messages => {
                let Some(id) = envelope.correlation_id().map(str::to_string) else {
                    warn!(session_id = %inner.id, "Skipping logged item without id");
                    continue;
                };
                if deleted.contains(&id) {
                    debug!(session_id = %inner.id, item_id = %id, "Skipping deleted item");
                    continue;
                }
                inner
                    .exchange(
                        connection,
                        envelope,
                        Matcher::correlated("conversation.item.created", id),
                        false,
                    )
                    .await?;
                report.recreated += 1;
            }
            "response.create" if policy.replay_messages => {
                if report.regenerated < policy.max_regenerate_response_count as usize {
                    regenerate(inner, connection, envelope).await?;
                    report.regenerated += 1;
                } else {
                    report.skipped_responses += 1;
                    warn!(
                        session_id = %inner.id,
                        cap = policy.max_regenerate_response_count,
                        "Skipping response regeneration beyond the configured cap"
                    );
                }
            }
            _ => {}
        }
    }
    Ok(report)
}

/// Re-dispatch one logged `response.create` and wait for its terminal event.
async fn regenerate(
    inner: &SessionInner,
    connection: &Connection,
    envelope: Envelope,
) -> RealtimeResult<()> {
    let correlation = envelope
        .get("response")
        .and_then(|r| r.get("metadata"))
        .and_then(|m| m.get("correlation_id"))
        .and_then(|c| c.as_str())
        .map(str::to_string);

    let correlator = connection.correlator();
    let binding = correlator.await_match(binding_matcher(correlation));
    let mut terminals = correlator.subscribe(Matcher::any_of(&TERMINAL_TYPES));
    inner.transmit(connection, envelope, false).await?;

    let wait = async {
        let created = binding.await?;
        let response_id = created
            .response_id()
            .ok_or_else(|| RealtimeError::ProtocolError("response.created without id".to_string()))?
            .to_string();
        while let Some(terminal) = terminals.recv().await {
            if belongs_to(&terminal, &response_id) {
                return Ok(terminal);
            }
        }
        Err(RealtimeError::ConnectionLost)
    };

    let terminal = tokio::time::timeout(DEFAULT_MAX_TIME_TO_RESPOND, wait)
        .await
        .map_err(|_| RealtimeError::Timeout("waiting for regenerated response".to_string()))??;

    let response = match terminal.decode::<ServerEvent>() {
        Ok(ServerEvent::ResponseDone { response }) => Some(response),
        _ if terminal.event_type() == "response.done" => {
            let id = terminal.response_id().unwrap_or_default().to_string();
            Some(Response::salvage(terminal.get("response"), &id))
        }
        _ => None,
    };
    if let Some(response) = response
        && response.status == "completed"
        && let Some(usage) = &response.usage
    {
        let fragment = compute_usage(usage, inner.options.model);
        inner.ledger.lock().merge(&fragment);
    }
    Ok(())
}
