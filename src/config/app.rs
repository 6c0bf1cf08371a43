//! Main application configuration
//!
//! This module defines the primary configuration structures for the
//! leaderboard service, including environment variable loading, TOML files
//! and validation.

use crate::competition::scheduler::{DEFAULT_BATCH_SIZE, DEFAULT_INTERVAL};
use crate::utils::parse_duration;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Longest accepted competition duration (one year)
pub const MAX_COMPETITION_DURATION_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub database: DatabaseSettings,
    pub matchmaking: MatchmakingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for the leaderboard API, health and metrics endpoints
    pub http_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Postgres connection URL; the in-memory store is used when unset
    pub url: Option<String>,
    /// Maximum pool size
    pub max_connections: u32,
    /// Extra connection attempts at startup, 2 seconds apart
    pub connect_retries: u32,
}

/// Matchmaking-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Time between matchmaking cycles in milliseconds
    pub interval_ms: u64,
    /// Lifetime of a competition in milliseconds
    pub competition_duration_ms: u64,
    /// Waiting players considered per cycle
    pub batch_size: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "leaderboard-service".to_string(),
            log_level: "info".to_string(),
            http_port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 20,
            connect_retries: 9,
        }
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL.as_millis() as u64, // 30 seconds
            competition_duration_ms: 60_000,                  // 1 minute
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load a TOML file, then let environment variables override it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Ok(port) = env::var("HTTP_PORT") {
            self.service.http_port = port
                .parse()
                .map_err(|_| anyhow!("Invalid HTTP_PORT value: {}", port))?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            self.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // Database settings
        if let Ok(url) = env::var("DATABASE_URL") {
            self.database.url = Some(url);
        } else if let Some(url) = database_url_from_parts() {
            self.database.url = Some(url);
        }
        if let Ok(max) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = max
                .parse()
                .map_err(|_| anyhow!("Invalid DATABASE_MAX_CONNECTIONS value: {}", max))?;
        }
        if let Ok(retries) = env::var("DATABASE_CONNECT_RETRIES") {
            self.database.connect_retries = retries
                .parse()
                .map_err(|_| anyhow!("Invalid DATABASE_CONNECT_RETRIES value: {}", retries))?;
        }

        // Matchmaking settings
        if let Ok(interval) = env::var("MATCHMAKING_INTERVAL") {
            self.matchmaking.interval_ms = parse_duration_ms(&interval)
                .ok_or_else(|| anyhow!("Invalid MATCHMAKING_INTERVAL value: {}", interval))?;
        }
        if let Ok(duration) = env::var("COMPETITION_DURATION") {
            self.matchmaking.competition_duration_ms = parse_duration_ms(&duration)
                .ok_or_else(|| anyhow!("Invalid COMPETITION_DURATION value: {}", duration))?;
        }
        if let Ok(batch) = env::var("MATCHMAKING_BATCH_SIZE") {
            self.matchmaking.batch_size = batch
                .parse()
                .map_err(|_| anyhow!("Invalid MATCHMAKING_BATCH_SIZE value: {}", batch))?;
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get matchmaking interval as Duration
    pub fn matchmaking_interval(&self) -> Duration {
        Duration::from_millis(self.matchmaking.interval_ms)
    }

    /// Get competition lifetime as a chrono Duration, clamped to
    /// `chrono::Duration::MAX`
    pub fn competition_duration(&self) -> chrono::Duration {
        i64::try_from(self.matchmaking.competition_duration_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

fn parse_duration_ms(value: &str) -> Option<u64> {
    parse_duration(value).and_then(|d| u64::try_from(d.as_millis()).ok())
}

/// `DB_HOST`/`DB_PORT`/`DB_USER`/`DB_PASSWORD`/`DB_NAME`, when `DB_HOST` is set
fn database_url_from_parts() -> Option<String> {
    let host = env::var("DB_HOST").ok()?;
    let port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
    let user = env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("DB_PASSWORD").unwrap_or_default();
    let name = env::var("DB_NAME").unwrap_or_else(|_| "postgres".to_string());
    Some(format!(
        "postgres://{}:{}@{}:{}/{}?sslmode=disable",
        user, password, host, port, name
    ))
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate ports
    if config.service.http_port == 0 {
        return Err(anyhow!("HTTP port cannot be 0"));
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }

    // Validate database settings
    if let Some(url) = &config.database.url {
        if url.is_empty() {
            return Err(anyhow!("Database URL cannot be empty"));
        }
    }
    if config.database.max_connections == 0 {
        return Err(anyhow!("Database pool needs at least one connection"));
    }

    // Validate matchmaking settings
    if config.matchmaking.interval_ms == 0 {
        return Err(anyhow!("Matchmaking interval must be greater than 0"));
    }
    if config.matchmaking.competition_duration_ms == 0 {
        return Err(anyhow!("Competition duration must be greater than 0"));
    }
    if config.matchmaking.competition_duration_ms > MAX_COMPETITION_DURATION_MS {
        return Err(anyhow!(
            "Competition duration {}ms exceeds the maximum of {}ms",
            config.matchmaking.competition_duration_ms,
            MAX_COMPETITION_DURATION_MS
        ));
    }
    if config.matchmaking.batch_size < 2 {
        return Err(anyhow!("Matchmaking batch size must be at least 2"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.matchmaking_interval(), Duration::from_secs(30));
        assert_eq!(config.competition_duration(), chrono::Duration::seconds(60));
        assert_eq!(config.matchmaking.batch_size, 10);
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.service.log_level = "loud".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.matchmaking.interval_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.matchmaking.batch_size = 1;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_oversized_competition_duration_is_rejected() {
        let mut config = AppConfig::default();
        config.matchmaking.competition_duration_ms =
            parse_duration_ms("3000000000h").unwrap();
        assert!(validate_config(&config).is_err());

        config.matchmaking.competition_duration_ms = u64::MAX;
        assert!(validate_config(&config).is_err());
        assert_eq!(config.competition_duration(), chrono::Duration::MAX);

        config.matchmaking.competition_duration_ms = MAX_COMPETITION_DURATION_MS;
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.competition_duration(), chrono::Duration::days(365));
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [service]
            http_port = 9000

            [matchmaking]
            interval_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.service.http_port, 9000);
        assert_eq!(config.service.name, "leaderboard-service");
        assert_eq!(config.matchmaking_interval(), Duration::from_millis(500));
        assert_eq!(config.matchmaking.competition_duration_ms, 60_000);
    }

    #[test]
    fn test_duration_values() {
        assert_eq!(parse_duration_ms("1m"), Some(60_000));
        assert_eq!(parse_duration_ms("250ms"), Some(250));
        assert_eq!(parse_duration_ms("soon"), None);
    }
}
