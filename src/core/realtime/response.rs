//! Response generation.
//!
//! A generation sends `response.create` tagged with a fresh correlation id,
//! binds to the matching `response.created`, then follows that response's
//! deltas until `response.done` or `response.cancelled`, racing a per-attempt
//! timer. Failed responses are retried up to `max_tries`.
//!
//! Generations under the default conversation are serialized per session;
//! out-of-band generations (`conversation: "none"`) run concurrently.

use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::base::{RealtimeError, RealtimeResult};
use super::codec::Envelope;
use super::config::ModelVariant;
use super::correlation::Matcher;
use super::messages::{
    ClientEvent, ConversationItem, Response, ResponseOptions, ServerEvent, decoded_audio_len,
};
use super::session::Session;
use super::usage::{UsageLedger, compute_usage};

/// Default number of attempts per generation.
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// Default per-attempt deadline.
pub const DEFAULT_MAX_TIME_TO_RESPOND: Duration = Duration::from_secs(60);

/// Events that end a response.
pub(crate) const TERMINAL_TYPES: [&str; 2] = ["response.done", "response.cancelled"];

/// Events followed while a response streams, terminals included.
const STREAM_TYPES: [&str; 5] = [
    "response.audio.delta",
    "response.text.delta",
    "response.audio_transcript.delta",
    "response.done",
    "response.cancelled",
];

/// Bound on waiting for the terminal event after `response.cancel`.
const CANCEL_WAIT: Duration = Duration::from_secs(5);

/// PCM16 mono at 24 kHz.
const PCM16_BYTES_PER_SECOND: f64 = 48_000.0;

// =============================================================================
// Types
// =============================================================================

/// Retry and deadline settings for one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationLimits {
    /// Attempts before giving up
    pub max_tries: u32,
    /// Deadline for each attempt
    pub max_time_to_respond: Duration,
}

impl Default for GenerationLimits {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            max_time_to_respond: DEFAULT_MAX_TIME_TO_RESPOND,
        }
    }
}

/// Tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionCall {
    pub call_id: String,
    pub name: String,
    /// JSON-encoded arguments, as sent by the model
    pub arguments: String,
}

/// What a completed response mainly produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Message,
    ToolCall,
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseResult {
    pub response_id: String,
    pub status: String,
    /// Text of the message, or the transcript of its audio
    pub transcript: Option<String>,
    pub function_call: Option<FunctionCall>,
    /// Usage of this response alone
    pub usage: UsageLedger,
    /// Time from dispatch to the first audio delta
    pub first_audio_delta_latency: Option<Duration>,
    /// Time from dispatch to the first text or transcript delta
    pub first_text_delta_latency: Option<Duration>,
    /// Playback length of the streamed audio
    pub total_audio_duration: Duration,
    /// Base64 audio deltas in arrival order
    pub audio_deltas: Vec<String>,
    pub attempts: u32,
    /// Time since the first dispatch, across attempts
    pub compute_time: Duration,
}

impl ResponseResult {
    pub fn kind(&self) -> ResponseKind {
        if self.function_call.is_some() {
            ResponseKind::ToolCall
        } else {
            ResponseKind::Message
        }
    }

    /// Decode and concatenate the streamed audio.
    pub fn audio(&self) -> RealtimeResult<Vec<u8>> {
        let mut pcm = Vec::new();
        for delta in &self.audio_deltas {
            let chunk = ServerEvent::decode_audio_delta(delta)
                .map_err(|e| RealtimeError::ProtocolError(format!("invalid audio delta: {e}")))?;
            pcm.extend_from_slice(&chunk);
        }
        Ok(pcm)
    }
}

/// How a generation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Completed(ResponseResult),
    /// The response was cancelled; nothing is merged into the ledger
    Cancelled,
    /// An attempt ran past its deadline
    TimedOut { elapsed: Duration },
    /// Every attempt failed
    Exhausted { attempts: u32 },
}

impl ResponseOutcome {
    /// The result, `None` for cancelled or exhausted generations, or a
    /// timeout error.
    pub fn into_result(self) -> RealtimeResult<Option<ResponseResult>> {
        match self {
            ResponseOutcome::Completed(result) => Ok(Some(result)),
            ResponseOutcome::Cancelled | ResponseOutcome::Exhausted { .. } => Ok(None),
            ResponseOutcome::TimedOut { elapsed } => Err(RealtimeError::Timeout(format!(
                "response not completed after {} ms",
                elapsed.as_millis()
            ))),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ResponseOutcome::Completed(_))
    }
}

/// Digest of any `response.done` observed on a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSummary {
    pub response_id: String,
    pub status: String,
    pub transcript: Option<String>,
    pub function_call: Option<FunctionCall>,
    pub usage: Option<UsageLedger>,
}

pub(crate) fn summarize_response(response: &Response, model: ModelVariant) -> ResponseSummary {
    let (transcript, function_call) = response
        .output
        .as_deref()
        .map(extract_output)
        .unwrap_or_default();
    ResponseSummary {
        response_id: response.id.clone(),
        status: response.status.clone(),
        transcript,
        function_call,
        usage: response.usage.as_ref().map(|u| compute_usage(u, model)),
    }
}

/// Pull the transcript and tool call out of a response's output items.
///
/// Output order is not meaningful: the first message supplies the
/// transcript and the last tool call seen is kept.
pub fn extract_output(output: &[ConversationItem]) -> (Option<String>, Option<FunctionCall>) {
    let mut transcript = None;
    let mut function_call = None;

    for item in output {
        match item.item_type.as_str() {
            "function_call" => {
                function_call = Some(FunctionCall {
                    call_id: item.call_id.clone().unwrap_or_default(),
                    name: item.name.clone().unwrap_or_default(),
                    arguments: item.arguments.clone().unwrap_or_default(),
                });
            }
            "message" if transcript.is_none() => {
                transcript = item.content.iter().flatten().find_map(|part| {
                    match part.content_type.as_str() {
                        "audio" => part.transcript.clone(),
                        "text" => part.text.clone(),
                        _ => None,
                    }
                });
            }
            _ => {}
        }
    }
    (transcript, function_call)
}

/// Matches the `response.created` that acknowledges a request carrying
/// `correlation_id`. Servers that do not echo metadata are matched by the
/// first `response.created` without one.
pub(crate) fn binding_matcher(correlation_id: Option<String>) -> Matcher {
    Matcher::predicate(move |envelope| {
        envelope.event_type() == "response.created"
            && match envelope.response_correlation() {
                Some(echoed) => correlation_id.as_deref() == Some(echoed),
                None => true,
            }
    })
}

/// Whether a streamed event belongs to `response_id`.
pub(crate) fn belongs_to(envelope: &Envelope, response_id: &str) -> bool {
    match envelope.response_id() {
        Some(id) => id == response_id,
        None => envelope.event_type() == "response.cancelled",
    }
}

// =============================================================================
// Generation
// =============================================================================

struct Deltas {
    dispatched: Instant,
    audio: Vec<String>,
    audio_bytes: usize,
    first_audio: Option<Duration>,
    first_text: Option<Duration>,
}

impl Deltas {
    fn new(dispatched: Instant) -> Self {
        Self {
            dispatched,
            audio: Vec::new(),
            audio_bytes: 0,
            first_audio: None,
            first_text: None,
        }
    }

    fn observe(&mut self, envelope: &Envelope) {
        let delta = envelope.get("delta").and_then(Value::as_str);
        let at = self.dispatched.elapsed();
        match envelope.event_type() {
            "response.audio.delta" => {
                self.first_audio.get_or_insert(at);
                if let Some(delta) = delta {
                    self.audio_bytes += decoded_audio_len(delta);
                    self.audio.push(delta.to_string());
                }
            }
            "response.text.delta" | "response.audio_transcript.delta" => {
                self.first_text.get_or_insert(at);
            }
            _ => {}
        }
    }

    fn audio_duration(&self) -> Duration {
        Duration::from_secs_f64(self.audio_bytes as f64 / PCM16_BYTES_PER_SECOND)
    }
}

enum Attempt {
    Done(Response, Deltas),
    Failed(String),
    Cancelled,
    TimedOut,
}

impl Session {
    /// Generate a response.
    ///
    /// Only transport and session faults are errors; cancellation, timeout
    /// and exhaustion are reported through [`ResponseOutcome`].
    pub async fn response(
        &self,
        options: ResponseOptions,
        limits: GenerationLimits,
    ) -> RealtimeResult<ResponseOutcome> {
        let _serialized = if options.is_out_of_band() {
            None
        } else {
            Some(self.inner.generation_lock.lock().await)
        };

        let started = Instant::now();
        let max_tries = limits.max_tries.max(1);

        for attempt in 1..=max_tries {
            match self.attempt(&options, limits.max_time_to_respond).await? {
                Attempt::Done(response, deltas) => {
                    let result = self.complete(response, deltas, attempt, started.elapsed());
                    return Ok(ResponseOutcome::Completed(result));
                }
                Attempt::Cancelled => {
                    info!(session_id = %self.inner.id, attempt, "Response cancelled");
                    return Ok(ResponseOutcome::Cancelled);
                }
                Attempt::TimedOut => {
                    let elapsed = started.elapsed();
                    warn!(
                        session_id = %self.inner.id,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Response timed out"
                    );
                    return Ok(ResponseOutcome::TimedOut { elapsed });
                }
                Attempt::Failed(status) => {
                    warn!(
                        session_id = %self.inner.id,
                        attempt,
                        max_tries,
                        status = %status,
                        "Response failed"
                    );
                }
            }
        }

        warn!(
            session_id = %self.inner.id,
            attempts = max_tries,
            "Giving up on response after {} attempts",
            max_tries
        );
        Ok(ResponseOutcome::Exhausted {
            attempts: max_tries,
        })
    }

    /// Generate with default options and limits.
    pub async fn respond(&self) -> RealtimeResult<ResponseOutcome> {
        self.response(ResponseOptions::default(), GenerationLimits::default())
            .await
    }

    async fn attempt(
        &self,
        options: &ResponseOptions,
        deadline: Duration,
    ) -> RealtimeResult<Attempt> {
        let connection = self.inner.ready().await?;

        let correlation_id = Uuid::new_v4().to_string();
        let mut options = options.clone();
        options
            .metadata
            .get_or_insert_with(Map::new)
            .insert("correlation_id".to_string(), Value::String(correlation_id.clone()));
        let envelope = Envelope::from_event(&ClientEvent::ResponseCreate { response: options })?;

        let correlator = connection.correlator();
        let binding = correlator.await_match(binding_matcher(Some(correlation_id.clone())));
        let mut stream = correlator.subscribe(Matcher::any_of(&STREAM_TYPES));

        let dispatched = Instant::now();
        self.inner.transmit(&connection, envelope, true).await?;

        let follow = async {
            let created = binding.await?;
            let response_id = created
                .response_id()
                .ok_or_else(|| {
                    RealtimeError::ProtocolError("response.created without id".to_string())
                })?
                .to_string();
            debug!(
                session_id = %self.inner.id,
                response_id = %response_id,
                correlation_id = %correlation_id,
                "Response bound"
            );

            let mut deltas = Deltas::new(dispatched);
            while let Some(envelope) = stream.recv().await {
                if !belongs_to(&envelope, &response_id) {
                    continue;
                }
                match envelope.event_type() {
                    "response.cancelled" => return Ok(Attempt::Cancelled),
                    "response.done" => {
                        let response = match envelope.decode::<ServerEvent>() {
                            Ok(ServerEvent::ResponseDone { response }) => response,
                            _ => {
                                warn!(
                                    session_id = %self.inner.id,
                                    response_id = %response_id,
                                    "Malformed response.done, keeping the fields that parse"
                                );
                                Response::salvage(envelope.get("response"), &response_id)
                            }
                        };
                        return Ok(match response.status.as_str() {
                            "completed" => Attempt::Done(response, deltas),
                            "cancelled" => Attempt::Cancelled,
                            other => Attempt::Failed(other.to_string()),
                        });
                    }
                    _ => deltas.observe(&envelope),
                }
            }
            Err(RealtimeError::ConnectionLost)
        };

        match tokio::time::timeout(deadline, follow).await {
            Ok(Ok(attempt)) => Ok(attempt),
            Ok(Err(e)) => Err(self.inner.explain(e)),
            Err(_) => Ok(Attempt::TimedOut),
        }
    }

    fn complete(
        &self,
        response: Response,
        deltas: Deltas,
        attempts: u32,
        compute_time: Duration,
    ) -> ResponseResult {
        if response.output.is_none() {
            warn!(
                session_id = %self.inner.id,
                response_id = %response.id,
                "Completed response carried no output"
            );
        }
        let (transcript, function_call) = response
            .output
            .as_deref()
            .map(extract_output)
            .unwrap_or_default();

        let mut usage = response
            .usage
            .as_ref()
            .map(|u| compute_usage(u, self.inner.options.model))
            .unwrap_or_default();
        usage.record_compute_time(compute_time);
        self.inner.ledger.lock().merge(&usage);

        debug!(
            session_id = %self.inner.id,
            response_id = %response.id,
            attempts,
            compute_ms = compute_time.as_millis() as u64,
            cost = usage.total_cost,
            "Response completed"
        );

        ResponseResult {
            total_audio_duration: deltas.audio_duration(),
            first_audio_delta_latency: deltas.first_audio,
            first_text_delta_latency: deltas.first_text,
            audio_deltas: deltas.audio,
            response_id: response.id,
            status: response.status,
            transcript,
            function_call,
            usage,
            attempts,
            compute_time,
        }
    }

    /// Cancel the in-flight response.
    ///
    /// Returns whether a terminal event followed within a short bound.
    pub async fn cancel_response(&self) -> RealtimeResult<bool> {
        let connection = self.inner.ready().await?;
        let terminal = connection
            .correlator()
            .await_match(Matcher::any_of(&TERMINAL_TYPES));
        let envelope = Envelope::from_event(&ClientEvent::ResponseCancel)?;
        self.inner.transmit(&connection, envelope, true).await?;

        match tokio::time::timeout(CANCEL_WAIT, terminal).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => Err(self.inner.explain(e)),
            Err(_) => {
                debug!(session_id = %self.inner.id, "No response ended after cancel");
                Ok(false)
            }
        }
    }
}
