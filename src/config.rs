use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use tracing::{info, warn};

use crate::{log_system_event, log_validation};

/// Ten years of daily activity.
const MAX_ACTIVITY_WINDOW_DAYS: i64 = 3650;

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub review: ReviewConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Logging system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

/// Reporting knobs. Scheduling constants are fixed and not configurable.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewConfig {
    /// Reviews needed before a card counts as mastered in progress reports
    pub mastery_threshold: i64,
    pub activity_window_days: i64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            mastery_threshold: 5,
            activity_window_days: 7,
        }
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        log_system_event!(config, "Loading application configuration from environment variables");

        let config = Config {
            database: DatabaseConfig::from_env()?,
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            review: ReviewConfig::from_env()?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    /// Log a summary of loaded configuration (without sensitive data)
    fn log_configuration_summary(&self) {
        info!(
            database_url_masked = %mask_sensitive_data(&self.database.url),
            max_connections = self.database.max_connections,
            server_address = %format!("{}:{}", self.server.host, self.server.port),
            log_level = %self.logging.level,
            mastery_threshold = self.review.mastery_threshold,
            "Configuration summary"
        );
    }

    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            let error = anyhow!("DATABASE_URL must start with 'sqlite:'");
            log_validation!(failure, "configuration", error = error);
            return Err(error);
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        if self.review.mastery_threshold < 1 {
            return Err(anyhow!("MASTERY_THRESHOLD must be at least 1"));
        }

        if !(1..=MAX_ACTIVITY_WINDOW_DAYS).contains(&self.review.activity_window_days) {
            return Err(anyhow!(
                "ACTIVITY_WINDOW_DAYS must be between 1 and {}",
                MAX_ACTIVITY_WINDOW_DAYS
            ));
        }

        if !self.logging.console_enabled && !self.logging.file_enabled {
            warn!("Both console and file logging are disabled - no log output will be produced");
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl DatabaseConfig {
    /// Pool defaults: 20 connections, 10s acquire timeout, 30s idle timeout.
    pub fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            max_connections: 20,
            acquire_timeout_secs: 10,
            idle_timeout_secs: 30,
        }
    }

    fn from_env() -> Result<Self> {
        let url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:study_scheduler.db".to_string());
        let defaults = Self::with_url(&url);

        Ok(DatabaseConfig {
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            acquire_timeout_secs: parse_env(
                "DATABASE_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout_secs,
            )?,
            idle_timeout_secs: parse_env("DATABASE_IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs)?,
            url,
        })
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let port_str = env::var("PORT").unwrap_or_else(|_| "3000".to_string());

        let port = port_str.parse::<u16>().map_err(|_| {
            anyhow!("Invalid PORT value: '{}'. Must be a number between 1-65535", port_str)
        })?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        Ok(ServerConfig { port, host })
    }
}

impl LoggingConfig {
    fn from_env() -> Result<Self> {
        let level = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info,study_scheduler=debug".to_string());

        let file_enabled = env::var("LOG_FILE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let console_enabled = env::var("LOG_CONSOLE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let log_directory = env::var("LOG_DIRECTORY").unwrap_or_else(|_| "logs".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

impl ReviewConfig {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(ReviewConfig {
            mastery_threshold: parse_env("MASTERY_THRESHOLD", defaults.mastery_threshold)?,
            activity_window_days: parse_env("ACTIVITY_WINDOW_DAYS", defaults.activity_window_days)?,
        })
    }
}

fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("Invalid {} value: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

/// Mask sensitive data in configuration for safe logging
fn mask_sensitive_data(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}
