//! Configuration Module
//!
//! Provides TOML-based configuration for firebridge with support for:
//! - Upstream broker connection (`[mqtt]`)
//! - Document store location and credential (`[store]`)
//! - Delivery timeout, retry and dry-run settings (`[delivery]`)
//! - Topic routes (`[routing]`, `[[route]]`)
//! - Environment variable overrides (FIREBRIDGE__* prefix)

use std::path::Path;
use std::str::FromStr;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use delivery::{BackoffKind, DeliveryConfig};
pub use feed::{FeedConfig, DEFAULT_MQTT_PORT};
pub use store::StoreConfig;

mod delivery;
mod feed;
mod store;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = match Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Upstream broker connection
    pub mqtt: FeedConfig,
    /// Document store
    pub store: StoreConfig,
    /// Delivery worker
    pub delivery: DeliveryConfig,
    /// Route matching options
    pub routing: RoutingConfig,
    /// Routes, in match priority order
    pub route: Vec<RouteConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// How route patterns are compared with topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Pattern minus its trailing `#` is a plain string prefix of the topic
    #[default]
    Prefix,
    /// MQTT filter semantics: `+` matches one level, trailing `#` the rest
    Segment,
}

impl std::fmt::Display for MatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchMode::Prefix => write!(f, "prefix"),
            MatchMode::Segment => write!(f, "segment"),
        }
    }
}

/// The `[routing]` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub match_mode: MatchMode,
}

/// A single `[[route]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteConfig {
    /// Topic pattern, e.g. `sensors/#`
    #[serde(alias = "pattern")]
    pub topic: String,
    /// Destination path; a trailing `/#` appends the last topic level
    #[serde(alias = "destination")]
    pub path: String,
}

impl FromStr for RouteConfig {
    type Err = ConfigError;

    /// Parse the `pattern:path` form used on the command line
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (topic, path) = s.split_once(':').ok_or_else(|| {
            ConfigError::Validation(format!("route '{}' must have the form PATTERN:PATH", s))
        })?;
        let route = RouteConfig {
            topic: topic.trim().to_string(),
            path: path.trim().to_string(),
        };
        route.validate()?;
        Ok(route)
    }
}

impl RouteConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.is_empty() {
            return Err(ConfigError::Validation(
                "route topic pattern cannot be empty".to_string(),
            ));
        }
        if self.path.is_empty() {
            return Err(ConfigError::Validation(format!(
                "route '{}' has an empty destination path",
                self.topic
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `FIREBRIDGE__` prefix with double underscores for nesting:
    ///    - `FIREBRIDGE__MQTT__ADDRESS=broker:1883` overrides `mqtt.address`
    ///    - `FIREBRIDGE__DELIVERY__TIMEOUT=10s` overrides `delivery.timeout`
    ///    - `FIREBRIDGE__STORE__APP_NAME=demo` overrides `store.app_name`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("mqtt.keepalive", 60)?
            .set_default("mqtt.qos", 0)?
            .set_default("delivery.timeout", "7s")?
            .set_default("delivery.max_retries", 2)?
            .set_default("delivery.retry_delay", "5s")?
            .set_default("delivery.idle_timeout", "5s")?
            .set_default("delivery.dry_run", false)?
            .set_default("routing.match_mode", "prefix")?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("FIREBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check each value on its own
    ///
    /// Settings that may still arrive from the command line, such as routes
    /// and the credential, are checked by [`Config::validate_startup`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.subscribe_qos().is_none() {
            return Err(ConfigError::Validation(
                "mqtt.qos must be 0 or 1".to_string(),
            ));
        }

        if self.mqtt.protocol().is_none() {
            return Err(ConfigError::Validation(format!(
                "mqtt.protocol_version must be 4 (v3.1.1) or 5 (v5.0), got {}",
                self.mqtt.protocol_version
            )));
        }

        if self.mqtt.client_id.is_empty() {
            return Err(ConfigError::Validation(
                "mqtt.client_id cannot be empty".to_string(),
            ));
        }

        for topic in [&self.mqtt.notify_topic, &self.mqtt.error_topic]
            .into_iter()
            .flatten()
        {
            if topic.is_empty() || topic.contains(['+', '#']) {
                return Err(ConfigError::Validation(format!(
                    "'{}' is not a valid publish topic",
                    topic
                )));
            }
        }

        if self.delivery.timeout.is_zero() {
            return Err(ConfigError::Validation(
                "delivery.timeout must be greater than zero".to_string(),
            ));
        }

        if self.delivery.idle_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "delivery.idle_timeout must be greater than zero".to_string(),
            ));
        }

        for route in &self.route {
            route.validate()?;
        }

        Ok(())
    }

    /// Check that everything needed to start the bridge is present
    ///
    /// Runs after command-line overrides have been merged in.
    pub fn validate_startup(&self) -> Result<(), ConfigError> {
        self.validate()?;

        if self.route.is_empty() {
            return Err(ConfigError::Validation(
                "at least one route is required".to_string(),
            ));
        }

        let Some(base_url) = self.store.resolve_base_url() else {
            return Err(ConfigError::Validation(
                "store.app_name or store.base_url is required".to_string(),
            ));
        };
        match reqwest::Url::parse(&base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "store base URL '{}' is not an http(s) URL",
                    base_url
                )));
            }
        }

        if !self.delivery.dry_run
            && self
                .store
                .credential
                .as_deref()
                .map_or(true, |c| c.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "store.credential is required unless dry_run is set".to_string(),
            ));
        }

        Ok(())
    }
}
