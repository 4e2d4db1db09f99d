//! Session options: credentials, model selection and lifetime settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use zeroize::Zeroizing;

use super::base::{RealtimeError, RealtimeResult, RecoveryPolicy};
use super::log::now_millis;

/// Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default model version suffix.
pub const DEFAULT_MODEL_VERSION: &str = "2024-12-17";

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Default session time-to-live (30 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Default bound on connect and acknowledgment waits.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

// =============================================================================
// Models
// =============================================================================

/// Supported realtime model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelVariant {
    /// gpt-4o-realtime
    #[default]
    #[serde(rename = "4o")]
    Gpt4o,
    /// gpt-4o-mini-realtime
    #[serde(rename = "4o-mini")]
    Gpt4oMini,
}

impl ModelVariant {
    /// Short variant name.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4o => "4o",
            Self::Gpt4oMini => "4o-mini",
        }
    }

    /// Model family without version suffix.
    #[inline]
    pub fn model_family(&self) -> &'static str {
        match self {
            Self::Gpt4o => "gpt-4o-realtime-preview",
            Self::Gpt4oMini => "gpt-4o-mini-realtime-preview",
        }
    }

    /// Prefix used for pricing keys and ledger categories.
    #[inline]
    pub fn price_prefix(&self) -> &'static str {
        match self {
            Self::Gpt4o => "realtime",
            Self::Gpt4oMini => "realtime_mini",
        }
    }

    /// Full model id for a version; the mini model only exists at 2024-12-17.
    pub fn model_id(&self, version: &str) -> String {
        let version = match self {
            Self::Gpt4o => version,
            Self::Gpt4oMini => DEFAULT_MODEL_VERSION,
        };
        format!("{}-{}", self.model_family(), version)
    }

    /// Parse a variant name.
    pub fn parse(s: &str) -> RealtimeResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "4o" | "gpt-4o" => Ok(Self::Gpt4o),
            "4o-mini" | "gpt-4o-mini" => Ok(Self::Gpt4oMini),
            other => Err(RealtimeError::InvalidConfiguration(format!(
                "unknown model variant '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Session Options
// =============================================================================

/// Options controlling how a session connects and how long it lives.
#[derive(Clone)]
pub struct SessionOptions {
    /// API key; falls back to `OPENAI_API_KEY`
    pub api_key: Option<Zeroizing<String>>,
    /// Model family
    pub model: ModelVariant,
    /// Model version suffix
    pub model_version: String,
    /// Session name; generated when absent
    pub session_name: Option<String>,
    /// Time-to-live; `None` disables expiry
    pub ttl: Option<Duration>,
    /// Disconnect recovery
    pub recovery: RecoveryPolicy,
    /// Endpoint override (proxies, tests)
    pub url: Option<String>,
    /// Bound on connect, handshake and acknowledgment waits
    pub request_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            model: ModelVariant::default(),
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            session_name: None,
            ttl: Some(DEFAULT_TTL),
            recovery: RecoveryPolicy::default(),
            url: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("model_version", &self.model_version)
            .field("session_name", &self.session_name)
            .field("ttl", &self.ttl)
            .field("recovery", &self.recovery)
            .field("url", &self.url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl SessionOptions {
    /// Options with an explicit API key.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(Zeroizing::new(api_key.into())),
            ..Default::default()
        }
    }

    /// Validate and fill in derived values; no socket is opened here.
    pub(crate) fn resolve(&self) -> RealtimeResult<ResolvedOptions> {
        let api_key = match &self.api_key {
            Some(key) if !key.trim().is_empty() => key.clone(),
            _ => std::env::var(API_KEY_ENV)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .map(Zeroizing::new)
                .ok_or_else(|| {
                    RealtimeError::AuthenticationFailed(format!(
                        "API key is required (set {API_KEY_ENV})"
                    ))
                })?,
        };

        if self.model_version.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "model_version must not be empty".to_string(),
            ));
        }
        if self.ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(RealtimeError::InvalidConfiguration(
                "ttl must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(RealtimeError::InvalidConfiguration(
                "request_timeout must be greater than zero".to_string(),
            ));
        }

        let base = self.url.as_deref().unwrap_or(OPENAI_REALTIME_URL);
        let mut url = url::Url::parse(base)
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("invalid url '{base}': {e}")))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "url scheme must be ws or wss, got '{}'",
                url.scheme()
            )));
        }
        let model_id = self.model.model_id(&self.model_version);
        url.query_pairs_mut().append_pair("model", &model_id);

        let session_name = self.session_name.clone().unwrap_or_else(|| {
            let n = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
            format!("realtime-session-{n}-{}", now_millis())
        });

        Ok(ResolvedOptions {
            api_key,
            model: self.model,
            model_id,
            url: url.to_string(),
            session_name,
            ttl: self.ttl,
            recovery: self.recovery.clone(),
            request_timeout: self.request_timeout,
        })
    }
}

/// Validated options held by a live session.
#[derive(Clone)]
pub(crate) struct ResolvedOptions {
    pub api_key: Zeroizing<String>,
    pub model: ModelVariant,
    pub model_id: String,
    pub url: String,
    pub session_name: String,
    pub ttl: Option<Duration>,
    pub recovery: RecoveryPolicy,
    pub request_timeout: Duration,
}
