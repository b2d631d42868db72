use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::utils::retry::RetryPolicy;

pub const MAX_HISTORY_PAGE: i64 = 200;

/// Server settings, read once at startup from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_addr: String,
    pub secret_key: String,
    pub history_page_limit: i64,
    pub read_retry_attempts: u32,
    pub read_retry_base_ms: u64,
    pub cors_allow_any: bool,
}

fn env_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let secret_key = std::env::var("SECRET_KEY").context("SECRET_KEY not set")?;

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://shram-messaging.db?mode=rwc".to_string()),
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5)?,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            secret_key,
            history_page_limit: env_or("HISTORY_PAGE_LIMIT", 50i64)?.clamp(1, MAX_HISTORY_PAGE),
            read_retry_attempts: env_or("READ_RETRY_ATTEMPTS", 3)?,
            read_retry_base_ms: env_or("READ_RETRY_BASE_MS", 50)?,
            cors_allow_any: env_or("CORS_ALLOW_ANY", true)?,
        })
    }

    /// Settings for tests and embedding: in-memory store, no retry delay.
    pub fn for_tests(secret_key: &str) -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            database_max_connections: 1,
            bind_addr: "127.0.0.1:0".to_string(),
            secret_key: secret_key.to_string(),
            history_page_limit: 50,
            read_retry_attempts: 1,
            read_retry_base_ms: 0,
            cors_allow_any: true,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.read_retry_attempts.max(1),
            base_delay: Duration::from_millis(self.read_retry_base_ms),
        }
    }
}
