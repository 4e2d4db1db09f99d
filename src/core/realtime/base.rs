//! Base types shared by every part of a realtime session.
//!
//! This module defines the error taxonomy, the session status machine and the
//! reconnection/recovery policies used when the upstream socket drops.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime session operations.
///
/// Generation and timeout faults are not represented here: they are reported
/// through [`ResponseOutcome`](super::ResponseOutcome) so callers can tell
/// "no answer this time" apart from "the session is broken".
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the upstream model failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Missing or rejected credentials
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A request argument was rejected before anything was sent
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Malformed envelope or missing required field
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// An acknowledgment did not arrive in time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The session is not accepting requests in its current state
    #[error("Session not available (status: {0})")]
    NotAvailable(SessionStatus),

    /// The session was closed explicitly or after a fatal disconnect
    #[error("Session closed")]
    SessionClosed,

    /// The session outlived its time-to-live
    #[error("Session expired")]
    SessionExpired,

    /// The connection was torn down while an operation was waiting on it
    #[error("Connection lost")]
    ConnectionLost,

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<serde_json::Error> for RealtimeError {
    fn from(e: serde_json::Error) -> Self {
        RealtimeError::SerializationError(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RealtimeError::WebSocketError(e.to_string())
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Session Status
// =============================================================================

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Connecting and applying the initial configuration
    #[default]
    Initializing,
    /// Ready for requests
    Available,
    /// Reconnecting and replaying the outgoing log
    Recovering,
    /// The socket failed; waiting for the recovery decision
    Error,
    /// Torn down explicitly or after an unrecoverable fault
    Closed,
    /// Torn down because the time-to-live elapsed
    Expired,
}

impl SessionStatus {
    /// Whether the session can never become available again.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Closed | SessionStatus::Expired)
    }

    /// Whether the session may still become available without caller action.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionStatus::Initializing | SessionStatus::Recovering | SessionStatus::Error
        )
    }

    /// The error reported to callers that hit this status.
    pub(crate) fn as_error(&self) -> RealtimeError {
        match self {
            SessionStatus::Closed => RealtimeError::SessionClosed,
            SessionStatus::Expired => RealtimeError::SessionExpired,
            other => RealtimeError::NotAvailable(*other),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Initializing => write!(f, "initializing"),
            SessionStatus::Available => write!(f, "available"),
            SessionStatus::Recovering => write!(f, "recovering"),
            SessionStatus::Error => write!(f, "error"),
            SessionStatus::Closed => write!(f, "closed"),
            SessionStatus::Expired => write!(f, "expired"),
        }
    }
}

// =============================================================================
// Reconnection and Recovery
// =============================================================================

/// Backoff settings for reconnect attempts made during recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    /// Maximum number of reconnection attempts before giving up.
    /// Set to 0 for unlimited attempts.
    /// Default: 5
    pub max_attempts: u32,

    /// Initial delay between reconnection attempts (milliseconds).
    /// Default: 250ms
    pub initial_delay_ms: u64,

    /// Maximum delay between reconnection attempts (milliseconds).
    /// Default: 30000ms (30 seconds)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    /// Default: 2.0
    pub backoff_multiplier: f32,

    /// Whether to add jitter to the delay to prevent thundering herd.
    /// Default: true
    pub jitter: bool,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 250,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectionConfig {
    /// Calculate the delay for a given attempt number using exponential backoff.
    /// Returns the delay in milliseconds. Attempt 1 is made immediately.
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        if attempt <= 1 {
            return 0;
        }
        let base_delay = self.initial_delay_ms as f64;
        let multiplier = self.backoff_multiplier as f64;

        // Exponential backoff: base_delay * multiplier^(attempt-2)
        let delay = base_delay * multiplier.powi(attempt.saturating_sub(2) as i32);
        let delay = delay.min(self.max_delay_ms as f64);

        if self.jitter {
            // Add up to 25% jitter
            let jitter_range = delay * 0.25;
            let jitter = rand_jitter(jitter_range);
            (delay + jitter).max(0.0) as u64
        } else {
            delay as u64
        }
    }

    /// Check if another reconnection attempt is allowed after `attempt` tries.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }
}

/// Generate a pseudo-random jitter value using a simple LCG.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    let normalized = random / (1u64 << 31) as f64;
    (normalized - 0.5) * 2.0 * range
}

/// What to restore after an unexpected disconnect.
///
/// Without an enabled policy a disconnect is fatal and the session closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryPolicy {
    /// Recover at all.
    /// Default: false
    pub enabled: bool,

    /// Replay conversation items (and regenerate responses) after reconnecting.
    /// Default: true
    pub replay_messages: bool,

    /// How many logged responses may be regenerated during one replay.
    /// Default: 0
    pub max_regenerate_response_count: u32,

    /// Backoff between reconnect attempts.
    pub reconnection: ReconnectionConfig,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            replay_messages: true,
            max_regenerate_response_count: 0,
            reconnection: ReconnectionConfig::default(),
        }
    }
}

impl RecoveryPolicy {
    /// A policy that never recovers.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A policy that replays items and regenerates up to `max_regenerate` responses.
    pub fn replaying(max_regenerate: u32) -> Self {
        Self {
            enabled: true,
            replay_messages: true,
            max_regenerate_response_count: max_regenerate,
            ..Default::default()
        }
    }

    /// A policy that restores configuration only.
    pub fn config_only() -> Self {
        Self {
            enabled: true,
            replay_messages: false,
            ..Default::default()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
