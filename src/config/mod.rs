//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::{MatchConfig, RegistryConfig};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Defaults for matches created by the server
    pub match_defaults: MatchConfig,

    /// How long an ENDING match is kept for result display
    pub end_grace: Duration,
    /// How long an empty WAITING match may sit before it is reclaimed
    pub idle_timeout: Duration,
    /// Period of the reclamation task
    pub reclaim_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let defaults = MatchConfig::default();
        let match_defaults = MatchConfig {
            min_players: parse_or("MIN_PLAYERS", defaults.min_players)?,
            max_players: parse_or("MAX_PLAYERS", defaults.max_players)?,
            match_duration_limit: secs_or(
                "MATCH_DURATION_LIMIT_SECS",
                defaults.match_duration_limit,
            )?,
            countdown_secs: parse_or("COUNTDOWN_SECS", defaults.countdown_secs)?,
            final_phase_enabled: parse_or("FINAL_PHASE_ENABLED", defaults.final_phase_enabled)?,
            combat_window: secs_or("COMBAT_WINDOW_SECS", defaults.combat_window)?,
        };
        match_defaults.validate()?;

        let registry_defaults = RegistryConfig::default();

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            match_defaults,

            end_grace: secs_or("END_GRACE_SECS", registry_defaults.end_grace)?,
            idle_timeout: secs_or("IDLE_TIMEOUT_SECS", registry_defaults.idle_timeout)?,
            reclaim_interval: secs_or("RECLAIM_INTERVAL_SECS", registry_defaults.reclaim_interval)?,
        })
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            match_defaults: self.match_defaults.clone(),
            end_grace: self.end_grace,
            idle_timeout: self.idle_timeout,
            reclaim_interval: self.reclaim_interval,
        }
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

fn secs_or(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    parse_or(key, default.as_secs()).map(Duration::from_secs)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid match configuration: {0}")]
    InvalidMatchConfig(String),
}
