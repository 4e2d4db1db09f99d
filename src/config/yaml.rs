use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All sections are optional. Values present here override environment
/// variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 30033
///   mode: "simple"
///
/// providers:
///   openai_api_key: "sk-..."
///
/// session:
///   model: "4o-mini"
///   model_version: "2024-12-17"
///   ttl_secs: 1800
///   request_timeout_secs: 15
///
/// recovery:
///   enabled: true
///   replay_messages: true
///   max_regenerate_response_count: 1
///   max_reconnect_attempts: 5
///
/// relay:
///   publish_url: "ws://localhost:30020/provider"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub providers: Option<ProvidersYaml>,
    pub session: Option<SessionYaml>,
    pub recovery: Option<RecoveryYaml>,
    pub relay: Option<RelayYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// "simple" or "debug"
    pub mode: Option<String>,
}

/// Provider credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersYaml {
    /// OpenAI API key for the Realtime API
    pub openai_api_key: Option<String>,
}

/// Session defaults from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    /// "4o" or "4o-mini"
    pub model: Option<String>,
    pub model_version: Option<String>,
    /// 0 disables expiry
    pub ttl_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

/// Recovery policy from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RecoveryYaml {
    pub enabled: Option<bool>,
    pub replay_messages: Option<bool>,
    pub max_regenerate_response_count: Option<u32>,
    pub max_reconnect_attempts: Option<u32>,
}

/// Relay publishing from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayYaml {
    pub publish_url: Option<String>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 30020
  mode: "debug"
providers:
  openai_api_key: "sk-yaml"
session:
  model: "4o-mini"
  ttl_secs: 600
recovery:
  enabled: true
  max_regenerate_response_count: 2
relay:
  publish_url: "ws://relay:30020/provider"
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(server.port, Some(30020));
        assert_eq!(server.mode.as_deref(), Some("debug"));
        assert_eq!(
            config.providers.unwrap().openai_api_key.as_deref(),
            Some("sk-yaml")
        );
        let session = config.session.unwrap();
        assert_eq!(session.model.as_deref(), Some("4o-mini"));
        assert_eq!(session.ttl_secs, Some(600));
        assert!(session.model_version.is_none());
        let recovery = config.recovery.unwrap();
        assert_eq!(recovery.enabled, Some(true));
        assert_eq!(recovery.max_regenerate_response_count, Some(2));
        assert!(recovery.replay_messages.is_none());
        assert_eq!(
            config.relay.unwrap().publish_url.as_deref(),
            Some("ws://relay:30020/provider")
        );
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.session.is_none());
        assert!(config.recovery.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        fs::write(&config_path, "server:\n  host: \"localhost\"\n  port: 3000\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert_eq!(
            config.server.as_ref().unwrap().host,
            Some("localhost".to_string())
        );
        assert_eq!(config.server.as_ref().unwrap().port, Some(3000));
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
