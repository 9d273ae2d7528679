//! Main application configuration
//!
//! This module defines the primary configuration structures for the
//! matchmaking service, including environment variable loading, TOML file
//! loading and validation.

use crate::config::rating::{EngineConfig, EngineKind};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub matchmaking: MatchmakingSettings,
    pub rating: RatingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for health check and metrics endpoints
    pub health_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
    /// JSON snapshot of players, seasons, matches and ratings. Loaded at
    /// startup when present and written back on shutdown.
    pub data_file: Option<PathBuf>,
}

/// Queue and pending-match settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Time players have to accept a pending match
    pub acceptance_window_seconds: u64,
    /// Sweep delay while pending matches exist
    pub busy_poll_interval_ms: u64,
    /// Sweep delay when nothing is pending
    pub idle_poll_interval_ms: u64,
}

/// Rating pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingSettings {
    /// Rating engine implementation
    pub engine: EngineKind,
    /// Base URL of the remote rating service
    pub base_url: String,
    /// Remote request timeout in seconds
    pub request_timeout_seconds: u64,
    /// Matches per recalculation batch
    pub batch_size: usize,
    /// Window in which an identical submission is rejected
    pub duplicate_window_seconds: u64,
    /// In-process engine parameters
    pub weng_lin: EngineConfig,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "mmr-matchmaker".to_string(),
            log_level: "info".to_string(),
            health_port: 8080,
            shutdown_timeout_seconds: 30,
            data_file: None,
        }
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            acceptance_window_seconds: 30,
            busy_poll_interval_ms: 1_000,
            idle_poll_interval_ms: 20_000,
        }
    }
}

impl Default for RatingSettings {
    fn default() -> Self {
        Self {
            engine: EngineKind::Local,
            base_url: "http://localhost:8081".to_string(),
            request_timeout_seconds: 10,
            batch_size: 200,
            duplicate_window_seconds: 600, // 10 minutes
            weng_lin: EngineConfig::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("Invalid {} value: {}", name, value)),
        Err(_) => Ok(None),
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env_overrides()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Some(port) = parse_env("HEALTH_PORT")? {
            self.service.health_port = port;
        }
        if let Some(timeout) = parse_env("SHUTDOWN_TIMEOUT_SECONDS")? {
            self.service.shutdown_timeout_seconds = timeout;
        }
        if let Ok(path) = env::var("DATA_FILE") {
            self.service.data_file = Some(PathBuf::from(path));
        }

        // Matchmaking settings
        if let Some(window) = parse_env("ACCEPTANCE_WINDOW_SECONDS")? {
            self.matchmaking.acceptance_window_seconds = window;
        }
        if let Some(interval) = parse_env("BUSY_POLL_INTERVAL_MS")? {
            self.matchmaking.busy_poll_interval_ms = interval;
        }
        if let Some(interval) = parse_env("IDLE_POLL_INTERVAL_MS")? {
            self.matchmaking.idle_poll_interval_ms = interval;
        }

        // Rating settings
        if let Ok(engine) = env::var("RATING_ENGINE") {
            self.rating.engine = engine
                .parse()
                .map_err(|_| anyhow!("Invalid RATING_ENGINE value: {}", engine))?;
        }
        if let Ok(url) = env::var("RATING_ENGINE_URL") {
            self.rating.base_url = url;
        }
        if let Some(timeout) = parse_env("RATING_REQUEST_TIMEOUT_SECONDS")? {
            self.rating.request_timeout_seconds = timeout;
        }
        if let Some(batch_size) = parse_env("RATING_BATCH_SIZE")? {
            self.rating.batch_size = batch_size;
        }
        if let Some(window) = parse_env("DUPLICATE_MATCH_WINDOW_SECONDS")? {
            self.rating.duplicate_window_seconds = window;
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get the pending match acceptance window as Duration
    pub fn acceptance_window(&self) -> Duration {
        Duration::from_secs(self.matchmaking.acceptance_window_seconds)
    }

    pub fn busy_poll_interval(&self) -> Duration {
        Duration::from_millis(self.matchmaking.busy_poll_interval_ms)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.matchmaking.idle_poll_interval_ms)
    }

    /// Get rating engine request timeout as Duration
    pub fn rating_request_timeout(&self) -> Duration {
        Duration::from_secs(self.rating.request_timeout_seconds)
    }

    /// Get duplicate submission window as Duration
    pub fn duplicate_window(&self) -> Duration {
        Duration::from_secs(self.rating.duplicate_window_seconds)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    if config.service.health_port == 0 {
        return Err(anyhow!("Health port cannot be 0"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }

    // Validate matchmaking settings
    if config.matchmaking.acceptance_window_seconds == 0 {
        return Err(anyhow!("Acceptance window must be greater than 0"));
    }
    if config.matchmaking.busy_poll_interval_ms == 0 || config.matchmaking.idle_poll_interval_ms == 0
    {
        return Err(anyhow!("Poll intervals must be greater than 0"));
    }
    if config.matchmaking.busy_poll_interval_ms > config.matchmaking.idle_poll_interval_ms {
        return Err(anyhow!("Busy poll interval cannot exceed the idle poll interval"));
    }

    // Validate rating settings
    if config.rating.batch_size == 0 {
        return Err(anyhow!("Rating batch size must be greater than 0"));
    }
    if config.rating.request_timeout_seconds == 0 {
        return Err(anyhow!("Rating request timeout must be greater than 0"));
    }
    if config.rating.engine == EngineKind::Http && config.rating.base_url.is_empty() {
        return Err(anyhow!("Rating engine URL cannot be empty"));
    }
    config.rating.weng_lin.validate()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.acceptance_window(), Duration::from_secs(30));
        assert_eq!(config.busy_poll_interval(), Duration::from_secs(1));
        assert_eq!(config.idle_poll_interval(), Duration::from_secs(20));
        assert_eq!(config.rating.batch_size, 200);
        assert_eq!(config.duplicate_window(), Duration::from_secs(600));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.service.log_level = "verbose".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.rating.batch_size = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.matchmaking.busy_poll_interval_ms = 30_000;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.rating.engine = EngineKind::Http;
        config.rating.base_url = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [service]
            health_port = 9100
            data_file = "/var/lib/mmr/store.json"

            [rating]
            engine = "http"
            base_url = "http://ratings:8080"
            "#,
        )
        .unwrap();

        assert_eq!(config.service.health_port, 9100);
        assert_eq!(config.service.name, "mmr-matchmaker");
        assert_eq!(
            config.service.data_file,
            Some(PathBuf::from("/var/lib/mmr/store.json"))
        );
        assert_eq!(config.rating.engine, EngineKind::Http);
        assert_eq!(config.rating.batch_size, 200);
        assert_eq!(config.matchmaking.acceptance_window_seconds, 30);
        assert!(validate_config(&config).is_ok());
    }
}
