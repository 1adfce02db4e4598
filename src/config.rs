use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Runtime configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub http_host: String,
    pub http_port: u16,
    /// Port for the dedicated Prometheus scrape listener.
    pub metrics_port: u16,
    /// Number of background task worker threads.
    pub task_workers: usize,
    /// Retry cap for retryable tasks (attempts = retries + 1).
    pub task_max_retries: u32,
    /// Base delay for exponential retry backoff.
    pub task_retry_base_delay: Duration,
    /// Look-ahead window for the due sweep.
    pub due_window: chrono::Duration,
    /// How often the due sweep is submitted to the queue.
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        Ok(Self {
            database_url,
            http_host: env_or("HTTP_HOST", "127.0.0.1"),
            http_port: parse_env("HTTP_PORT", 8080)?,
            metrics_port: parse_env("METRICS_PORT", 9091)?,
            task_workers: parse_env("TASK_WORKERS", 4)?,
            task_max_retries: parse_env("TASK_MAX_RETRIES", 3)?,
            task_retry_base_delay: Duration::from_millis(parse_env("TASK_RETRY_BASE_MS", 1000)?),
            due_window: chrono::Duration::minutes(parse_env("DUE_WINDOW_MINUTES", 15)?),
            sweep_interval: Duration::from_secs(parse_env("DUE_SWEEP_INTERVAL_SECS", 60)?),
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {name}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test so the DATABASE_URL mutations cannot race each other
    // under the parallel test runner.
    #[test]
    fn env_parsing() {
        env::remove_var("DATABASE_URL");
        assert!(Config::from_env().is_err());

        env::set_var("DATABASE_URL", "config-test.db");
        let config = Config::from_env().expect("config");
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.task_max_retries, 3);
        assert_eq!(config.due_window, chrono::Duration::minutes(15));
        env::remove_var("DATABASE_URL");
    }
}
