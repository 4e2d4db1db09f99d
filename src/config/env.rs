use std::env;

use super::{RelayMode, ServerConfig, SessionDefaults};
use crate::core::realtime::{ModelVariant, RELAY_URL_ENV};

/// Read an optional, non-empty environment variable.
fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid {name} value '{raw}': {e}").into()),
        None => Ok(None),
    }
}

/// Build the configuration from environment variables and defaults.
pub(super) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mode = match var("RELAY_MODE") {
        Some(raw) => RelayMode::parse(&raw)?,
        None => RelayMode::default(),
    };
    let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
    let port = parse_var::<u16>("PORT")?.unwrap_or_else(|| mode.default_port());

    let mut session = SessionDefaults::default();
    if let Some(model) = var("REALTIME_MODEL") {
        session.model = ModelVariant::parse(&model).map_err(|e| e.to_string())?;
    }
    if let Some(version) = var("REALTIME_MODEL_VERSION") {
        session.model_version = version;
    }
    if let Some(ttl) = parse_var::<u64>("REALTIME_SESSION_TTL_SECS")? {
        session.ttl_secs = (ttl > 0).then_some(ttl);
    }
    if let Some(timeout) = parse_var::<u64>("REALTIME_REQUEST_TIMEOUT_SECS")? {
        session.request_timeout_secs = timeout;
    }
    if let Some(enabled) = parse_var::<bool>("REALTIME_RECOVERY_ENABLED")? {
        session.recovery.enabled = enabled;
    }
    if let Some(replay) = parse_var::<bool>("REALTIME_REPLAY_MESSAGES")? {
        session.recovery.replay_messages = replay;
    }
    if let Some(max) = parse_var::<u32>("REALTIME_MAX_REGENERATE_RESPONSES")? {
        session.recovery.max_regenerate_response_count = max;
    }

    Ok(ServerConfig {
        host,
        port,
        mode,
        openai_api_key: var("OPENAI_API_KEY"),
        session,
        relay_publish_url: var(RELAY_URL_ENV),
    })
}
