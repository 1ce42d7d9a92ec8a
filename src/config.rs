use std::env;
use std::time::Duration;

use crate::application::services::message_inconsistencies_service::{RetryPolicy, RunningOptions};

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub scan_page_size: i64,
    pub messages_per_second: Option<u32>,
    pub concurrency: u32,
    pub write_max_attempts: u32,
    pub write_retry_backoff_ms: u64,
    pub metrics_port: Option<u16>,
    pub service_name: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://message_inconsistencies.db?mode=rwc".to_string());
        validate_database_url(&database_url)?;

        let scan_page_size = parse_var("SCAN_PAGE_SIZE", 500)?;
        if scan_page_size <= 0 {
            return Err(ConfigError::Invalid("SCAN_PAGE_SIZE"));
        }

        let messages_per_second = match env::var("MESSAGES_PER_SECOND") {
            Ok(value) => Some(
                value
                    .parse::<u32>()
                    .ok()
                    .filter(|rate| *rate > 0)
                    .ok_or(ConfigError::Invalid("MESSAGES_PER_SECOND"))?,
            ),
            Err(_) => None,
        };

        let concurrency = parse_var("RECONCILE_CONCURRENCY", 1)?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid("RECONCILE_CONCURRENCY"));
        }

        let write_max_attempts = parse_var("WRITE_MAX_ATTEMPTS", 3)?;
        if write_max_attempts == 0 {
            return Err(ConfigError::Invalid("WRITE_MAX_ATTEMPTS"));
        }

        let write_retry_backoff_ms = parse_var("WRITE_RETRY_BACKOFF_MS", 100)?;

        let metrics_port = match env::var("METRICS_PORT") {
            Ok(value) => Some(
                value
                    .parse()
                    .map_err(|_| ConfigError::Invalid("METRICS_PORT"))?,
            ),
            Err(_) => None,
        };

        let service_name =
            env::var("SERVICE_NAME").unwrap_or_else(|_| "message-inconsistencies".to_string());

        Ok(Config {
            database_url,
            scan_page_size,
            messages_per_second,
            concurrency,
            write_max_attempts,
            write_retry_backoff_ms,
            metrics_port,
            service_name,
        })
    }

    pub fn running_options(&self) -> RunningOptions {
        RunningOptions {
            messages_per_second: self.messages_per_second,
            concurrency: self.concurrency,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.write_max_attempts,
            initial_backoff: Duration::from_millis(self.write_retry_backoff_ms),
        }
    }
}

/// Only SQLite URLs are accepted; the schema and queries target SQLite.
pub fn validate_database_url(database_url: &str) -> Result<(), ConfigError> {
    if database_url.starts_with("sqlite:") {
        Ok(())
    } else {
        Err(ConfigError::Invalid("DATABASE_URL"))
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    Invalid(&'static str),
}
