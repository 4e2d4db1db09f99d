use super::yaml::YamlConfig;
use super::{RelayMode, ServerConfig};
use crate::core::realtime::ModelVariant;

/// Apply YAML values on top of an environment-derived configuration.
///
/// A mode set in YAML without an explicit port also moves the port to that
/// mode's default, unless `PORT` was set in the environment.
pub(super) fn apply_yaml(
    config: &mut ServerConfig,
    yaml: YamlConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(mode) = server.mode {
            let mode = RelayMode::parse(&mode)?;
            if server.port.is_none() && config.port == config.mode.default_port() {
                config.port = mode.default_port();
            }
            config.mode = mode;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
    }

    if let Some(providers) = yaml.providers
        && let Some(key) = providers.openai_api_key
    {
        config.openai_api_key = Some(key);
    }

    if let Some(session) = yaml.session {
        if let Some(model) = session.model {
            config.session.model = ModelVariant::parse(&model).map_err(|e| e.to_string())?;
        }
        if let Some(version) = session.model_version {
            config.session.model_version = version;
        }
        if let Some(ttl) = session.ttl_secs {
            config.session.ttl_secs = (ttl > 0).then_some(ttl);
        }
        if let Some(timeout) = session.request_timeout_secs {
            config.session.request_timeout_secs = timeout;
        }
    }

    if let Some(recovery) = yaml.recovery {
        let policy = &mut config.session.recovery;
        if let Some(enabled) = recovery.enabled {
            policy.enabled = enabled;
        }
        if let Some(replay) = recovery.replay_messages {
            policy.replay_messages = replay;
        }
        if let Some(max) = recovery.max_regenerate_response_count {
            policy.max_regenerate_response_count = max;
        }
        if let Some(attempts) = recovery.max_reconnect_attempts {
            policy.reconnection.max_attempts = attempts;
        }
    }

    if let Some(relay) = yaml.relay
        && let Some(url) = relay.publish_url
    {
        config.relay_publish_url = Some(url);
    }

    Ok(())
}
