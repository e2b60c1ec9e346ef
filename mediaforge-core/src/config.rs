//! Environment-driven configuration for the task engine.
//!
//! Mirrors the aggregate-of-sub-configs shape common across this stack's
//! services: one top-level struct composed of per-component configs, each
//! with sane defaults, validated once at startup.

use crate::errors::{ConfigurationError, ConfigurationResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the task engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEngineConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
}

impl TaskEngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset. Fails fast on malformed values so a
    /// bad env var is a startup error, not a silently wrong interval.
    pub fn from_env() -> ConfigurationResult<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            scheduler: SchedulerConfig::from_env()?,
        })
    }
}

impl Default for TaskEngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    fn from_env() -> ConfigurationResult<Self> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigurationError::MissingEnv("DATABASE_URL".to_string()))?;
        Ok(Self {
            url,
            max_connections: parse_env_or("DATABASE_MAX_CONNECTIONS", 10)?,
        })
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/mediaforge".to_string(),
            max_connections: 10,
        }
    }
}

/// Scheduler timing and batching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// `TASK_SCHEDULER_ENABLED`
    pub enabled: bool,
    /// `TASK_SCHEDULER_INTERVAL`, main claim loop period.
    pub main_interval: Duration,
    /// `TASK_ASYNC_POLL_INTERVAL`, async poll loop period.
    pub poll_interval: Duration,
    /// `TASK_BATCH_SIZE`, rows claimed per tick.
    pub batch_size: u32,
    /// `TASK_MAX_RETRIES`.
    pub max_retries: i32,
    /// `TASK_TIMEOUT_MINUTES`, sync-mode liveness threshold.
    pub sync_timeout: Duration,
    /// `TASK_ASYNC_TIMEOUT_MINUTES`, async-mode liveness threshold.
    pub async_timeout: Duration,
    /// `TASK_MAX_CONCURRENCY`, in-process executor concurrency bound.
    pub max_concurrency: usize,
    /// Base and max delay for exponential backoff; not
    /// environment-configurable, fixed by design.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl SchedulerConfig {
    fn from_env() -> ConfigurationResult<Self> {
        Ok(Self {
            enabled: parse_env_or("TASK_SCHEDULER_ENABLED", true)?,
            main_interval: Duration::from_secs(parse_env_or("TASK_SCHEDULER_INTERVAL", 5)?),
            poll_interval: Duration::from_secs(parse_env_or("TASK_ASYNC_POLL_INTERVAL", 10)?),
            batch_size: parse_env_or("TASK_BATCH_SIZE", 20)?,
            max_retries: parse_env_or("TASK_MAX_RETRIES", 3)?,
            sync_timeout: Duration::from_secs(60 * parse_env_or::<u64>("TASK_TIMEOUT_MINUTES", 5)?),
            async_timeout: Duration::from_secs(
                60 * parse_env_or::<u64>("TASK_ASYNC_TIMEOUT_MINUTES", 30)?,
            ),
            max_concurrency: parse_env_or("TASK_MAX_CONCURRENCY", 8)?,
            backoff_base: Duration::from_secs(60),
            backoff_max: Duration::from_secs(600),
        })
    }

    /// `delay(retryCount) = min(baseDelay * 2^retryCount, maxDelay)`.
    pub fn backoff(&self, retry_count: i32) -> Duration {
        let shift = retry_count.max(0).min(16) as u32;
        let scaled = self.backoff_base.saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
        scaled.min(self.backoff_max)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            main_interval: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
            batch_size: 20,
            max_retries: 3,
            sync_timeout: Duration::from_secs(60 * 5),
            async_timeout: Duration::from_secs(60 * 30),
            max_concurrency: 8,
            backoff_base: Duration::from_secs(60),
            backoff_max: Duration::from_secs(600),
        }
    }
}

fn parse_env_or<T>(key: &str, default: T) -> ConfigurationResult<T>
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(value) => value.parse().map_err(|_| ConfigurationError::InvalidValue {
            key: key.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.backoff(0), Duration::from_secs(60));
        assert_eq!(cfg.backoff(1), Duration::from_secs(120));
        assert_eq!(cfg.backoff(2), Duration::from_secs(240));
        assert_eq!(cfg.backoff(3), Duration::from_secs(480));
        assert_eq!(cfg.backoff(4), Duration::from_secs(600));
        assert_eq!(cfg.backoff(20), Duration::from_secs(600));
    }

    #[test]
    fn parse_env_or_falls_back_to_default_when_unset() {
        std::env::remove_var("MEDIAFORGE_TEST_KEY_UNUSED");
        let value: u32 = parse_env_or("MEDIAFORGE_TEST_KEY_UNUSED", 42).unwrap();
        assert_eq!(value, 42);
    }
}
