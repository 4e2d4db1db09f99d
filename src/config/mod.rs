//! Configuration module for the realtime gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Applying YAML overrides on top of the environment
//! - `validation`: Configuration validation logic
//! - `pricing`: Token price table used by the usage ledger
//!
//! # Example
//! ```rust,no_run
//! use realtime_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Relay listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::core::realtime::{
    DEFAULT_RELAY_URL, ModelVariant, RecoveryPolicy, RelayPublisherConfig, SessionOptions,
};

mod env;
mod merge;
pub mod pricing;
mod validation;
mod yaml;

pub use pricing::{
    TokenPricing, estimate_token_cost, get_token_price, get_token_pricing, list_price_keys,
};

/// Relay server variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayMode {
    /// `/model` upstream (at most one) fanned out to `/client` peers
    #[default]
    Simple,
    /// `/provider` and `/consumer` peers with bidirectional fan-out
    Debug,
}

impl RelayMode {
    /// Port used when none is configured.
    pub fn default_port(&self) -> u16 {
        match self {
            RelayMode::Simple => 30033,
            RelayMode::Debug => 30020,
        }
    }

    /// Parse a mode name.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(RelayMode::Simple),
            "debug" => Ok(RelayMode::Debug),
            other => Err(format!(
                "Invalid relay mode '{other}'. Must be 'simple' or 'debug'"
            )),
        }
    }

    /// Path of the upstream endpoint.
    pub fn upstream_path(&self) -> &'static str {
        match self {
            RelayMode::Simple => "/model",
            RelayMode::Debug => "/provider",
        }
    }

    /// Path of the downstream endpoint.
    pub fn downstream_path(&self) -> &'static str {
        match self {
            RelayMode::Simple => "/client",
            RelayMode::Debug => "/consumer",
        }
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayMode::Simple => write!(f, "simple"),
            RelayMode::Debug => write!(f, "debug"),
        }
    }
}

/// Defaults applied to sessions opened from this configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDefaults {
    pub model: ModelVariant,
    pub model_version: String,
    /// `None` disables expiry
    pub ttl_secs: Option<u64>,
    pub request_timeout_secs: u64,
    pub recovery: RecoveryPolicy,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            model: ModelVariant::default(),
            model_version: crate::core::realtime::DEFAULT_MODEL_VERSION.to_string(),
            ttl_secs: Some(crate::core::realtime::DEFAULT_TTL.as_secs()),
            request_timeout_secs: crate::core::realtime::DEFAULT_REQUEST_TIMEOUT.as_secs(),
            recovery: RecoveryPolicy::default(),
        }
    }
}

/// Server configuration
///
/// Contains all configuration needed to run the relay and to open sessions:
/// - Server settings (host, port, relay mode)
/// - OpenAI API key
/// - Session defaults (model, ttl, recovery)
/// - Relay publishing target
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    pub mode: RelayMode,

    /// OpenAI API key for the Realtime API
    pub openai_api_key: Option<String>,

    // Session defaults
    pub session: SessionDefaults,

    /// Relay endpoint sessions publish to
    pub relay_publish_url: Option<String>,
}

/// Implement Drop to zeroize all secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Reads `HOST`, `PORT`, `RELAY_MODE`, `OPENAI_API_KEY`, the `REALTIME_*`
    /// session variables and `REALTIME_RELAY_URL`. Missing values use
    /// defaults; the port defaults to the mode's port.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = env::load_from_env()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // Note: .env file is loaded in main.rs at application startup
        let yaml_config = yaml::YamlConfig::from_file(path)?;

        let mut config = env::load_from_env()?;
        merge::apply_yaml(&mut config, yaml_config)?;

        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Session options carrying this configuration's credentials and
    /// defaults.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            api_key: self.openai_api_key.clone().map(Zeroizing::new),
            model: self.session.model,
            model_version: self.session.model_version.clone(),
            ttl: self.session.ttl_secs.map(Duration::from_secs),
            recovery: self.session.recovery.clone(),
            request_timeout: Duration::from_secs(self.session.request_timeout_secs),
            ..Default::default()
        }
    }

    /// Where `publish` sends session events; the debug relay's provider
    /// endpoint unless `relay_publish_url` is set.
    pub fn publisher_config(&self) -> RelayPublisherConfig {
        RelayPublisherConfig::with_url(
            self.relay_publish_url
                .clone()
                .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string()),
        )
    }
}
