//! Realtime model session client.
//!
//! This module keeps a persistent, bidirectional session with a realtime
//! conversational model over a WebSocket. It correlates the interleaved
//! inbound stream with outbound requests, retries failed generations, and
//! recovers a session after an unexpected disconnect by replaying its
//! outgoing log against a fresh connection.
//!
//! # Architecture
//!
//! - [`Envelope`] - JSON frames with a `type` discriminator
//! - [`Correlator`] - one-shot waiters and subscriptions over inbound frames
//! - [`Session`] - status machine, message log, ttl and recovery supervision
//! - Conversation items, response generation and the usage ledger are
//!   operations on [`Session`]
//! - [`RelayPublisher`] - forwards a session's events to a relay
//! - [`agents`] - preset transcriber, repeater and translator sessions
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, 24kHz mono, base64 on the wire.
//!
//! # Example
//!
//! ```rust,ignore
//! use realtime_gateway::core::realtime::{
//!     GenerationLimits, ResponseOptions, Session, SessionConfig, SessionOptions,
//! };
//!
//! #[tokio::main]
//! async fn main() -> realtime_gateway::core::realtime::RealtimeResult<()> {
//!     let session = Session::open(
//!         SessionConfig::text("Always reply: OK."),
//!         SessionOptions::with_api_key("sk-..."),
//!     )
//!     .await?;
//!
//!     session.user("Hello").await?;
//!     let outcome = session
//!         .response(ResponseOptions::default(), GenerationLimits::default())
//!         .await?;
//!     if let Some(result) = outcome.into_result()? {
//!         println!("{:?}", result.transcript);
//!     }
//!     println!("cost so far: ${:.6}", session.usage().total_cost);
//!
//!     session.close();
//!     Ok(())
//! }
//! ```

pub mod agents;
mod base;
pub mod codec;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod items;
pub mod log;
pub mod messages;
pub mod publisher;
pub mod recovery;
pub mod response;
pub mod session;
pub mod usage;

pub use agents::{
    RepeaterSettings, TranscriberSettings, TranslatorSettings, create_transcriber,
    create_transcriber_repeater, create_translator, tutorial,
};
pub use base::{
    RealtimeError, RealtimeResult, ReconnectionConfig, RecoveryPolicy, SessionStatus,
};
pub use codec::Envelope;
pub use config::{
    API_KEY_ENV, DEFAULT_MODEL_VERSION, DEFAULT_REQUEST_TIMEOUT, DEFAULT_TTL, ModelVariant,
    OPENAI_REALTIME_URL, SessionOptions,
};
pub use correlation::{Correlator, Matcher, Subscription, Waiter};
pub use items::{ContentType, ItemRecord, Role};
pub use log::{Direction, LogEntry, MessageLog};
pub use messages::{
    ClientEvent, ContentPart, ConversationItem, ConversationScope, InputAudioTranscription,
    MaxTokens, ResponseOptions, ServerEvent, SessionConfig, ToolDef, TurnDetection,
};
pub use publisher::{
    DEFAULT_RELAY_URL, RELAY_URL_ENV, RelayPublisher, RelayPublisherConfig, USER_AUDIO_INPUT,
    USER_AUDIO_STREAM,
};
pub use recovery::ReplayReport;
pub use response::{
    DEFAULT_MAX_TIME_TO_RESPOND, DEFAULT_MAX_TRIES, FunctionCall, GenerationLimits, ResponseKind,
    ResponseOutcome, ResponseResult, ResponseSummary,
};
pub use session::Session;
pub use usage::{ComputeTimeStats, UsageEntry, UsageLedger, compute_usage};
