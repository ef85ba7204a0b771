use crate::cache::EvictionConfig;
use crate::sender::SenderConfig;
use crate::session::WatchdogConfig;
use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// serde adapter storing `Duration` fields as integral milliseconds.
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Complete configuration of one agent instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub collector_url: String,
    pub application_id: String,
    pub server_id: i32,
    /// Client IP reported with beacons; empty lets the collector derive it.
    pub client_ip: String,
    #[serde(with = "duration_millis")]
    pub http_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub http_connection_timeout: Duration,
    /// Beacon payloads above this many bytes are gzip-compressed.
    pub compression_threshold: usize,
    /// Per-worker bound on graceful shutdown.
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
    pub cache: EvictionConfig,
    pub sender: SenderConfig,
    pub watchdog: WatchdogConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            collector_url: transport.collector_url,
            application_id: String::new(),
            server_id: transport.server_id,
            client_ip: String::new(),
            http_timeout: transport.timeout,
            http_connection_timeout: transport.connection_timeout,
            compression_threshold: transport.compression_threshold,
            shutdown_timeout: Duration::from_secs(10),
            cache: EvictionConfig::default(),
            sender: SenderConfig::default(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Loads and validates a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.collector_url).map_err(|e| {
            ConfigError::InvalidUrl(format!(
                "Invalid collector URL '{}': {e}",
                self.collector_url
            ))
        })?;

        if self.application_id.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Application id must not be empty".to_string(),
            ));
        }

        // Both bounds positive means space eviction is active and the bounds
        // must be ordered; otherwise the strategy is deliberately disabled.
        if self.cache.cache_size_lower_bound > 0
            && self.cache.cache_size_upper_bound > 0
            && self.cache.cache_size_upper_bound < self.cache.cache_size_lower_bound
        {
            return Err(ConfigError::InvalidConfig(format!(
                "Cache upper bound ({}) must not be below the lower bound ({})",
                self.cache.cache_size_upper_bound, self.cache.cache_size_lower_bound
            )));
        }

        if self.sender.time_sync_probe_count == 0 {
            return Err(ConfigError::InvalidConfig(
                "Time sync probe count must be greater than 0".to_string(),
            ));
        }

        if self.http_timeout.is_zero() || self.http_connection_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "HTTP timeouts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            collector_url: self.collector_url.clone(),
            application_id: self.application_id.clone(),
            server_id: self.server_id,
            timeout: self.http_timeout,
            connection_timeout: self.http_connection_timeout,
            compression_threshold: self.compression_threshold,
            ..TransportConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AgentConfig {
        AgentConfig {
            application_id: "app-17".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn default_config_with_application_id_validates() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn empty_application_id_is_rejected() {
        let config = AgentConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn bad_collector_url_is_rejected() {
        let config = AgentConfig {
            collector_url: "not a url".to_string(),
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn inverted_cache_bounds_are_rejected() {
        let mut config = valid_config();
        config.cache.cache_size_lower_bound = 100;
        config.cache.cache_size_upper_bound = 50;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }
}
