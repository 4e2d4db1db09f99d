use super::ServerConfig;

/// Validate a merged configuration.
pub(super) fn validate(config: &ServerConfig) -> Result<(), String> {
    validate_host(&config.host)?;
    validate_session(config)?;
    validate_relay_url(config.relay_publish_url.as_deref())?;
    Ok(())
}

fn validate_host(host: &str) -> Result<(), String> {
    if host.trim().is_empty() {
        return Err("HOST must not be empty".to_string());
    }
    Ok(())
}

fn validate_session(config: &ServerConfig) -> Result<(), String> {
    if config.session.model_version.trim().is_empty() {
        return Err("Session model_version must not be empty".to_string());
    }
    if config.session.request_timeout_secs == 0 {
        return Err("Session request_timeout_secs must be greater than zero".to_string());
    }
    Ok(())
}

fn validate_relay_url(url: Option<&str>) -> Result<(), String> {
    let Some(url) = url else {
        return Ok(());
    };
    let parsed = url::Url::parse(url).map_err(|e| format!("Invalid relay URL '{url}': {e}"))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(format!(
            "Relay URL must use ws or wss, got '{other}' in '{url}'"
        )),
    }
}
