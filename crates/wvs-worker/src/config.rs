// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker configuration from environment variables.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Queue storage endpoint.
    pub db_dsn: String,
    /// Executor addresses the worker dials (comma-separated host:port).
    pub executor_addrs: Vec<String>,
    /// Minimum gap between dequeues after a processed task.
    pub poll_interval: Duration,
    /// Sleep when the queue is empty.
    pub idle_backoff: Duration,
    /// Grace period for the in-flight task on shutdown.
    pub shutdown_timeout: Duration,
    /// How often to sweep expired leases.
    pub lease_sweep_interval: Duration,
    /// Extra slack on top of a task's timeout before its lease counts as
    /// expired.
    pub lease_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `DB_DSN`: queue storage endpoint
    /// - `EXECUTOR_ADDRS`: comma-separated executor addresses
    ///
    /// Optional (seconds, with defaults):
    /// - `POLL_INTERVAL` (1), `IDLE_BACKOFF` (5), `SHUTDOWN_TIMEOUT` (120),
    ///   `LEASE_SWEEP_INTERVAL` (60)
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_dsn = std::env::var("DB_DSN").map_err(|_| ConfigError::Missing("DB_DSN"))?;

        let executor_addrs: Vec<String> = std::env::var("EXECUTOR_ADDRS")
            .map_err(|_| ConfigError::Missing("EXECUTOR_ADDRS"))?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if executor_addrs.is_empty() {
            return Err(ConfigError::Invalid(
                "EXECUTOR_ADDRS",
                "must contain at least one address",
            ));
        }

        Ok(Self {
            db_dsn,
            executor_addrs,
            poll_interval: duration_secs("POLL_INTERVAL", Duration::from_secs(1))?,
            idle_backoff: duration_secs("IDLE_BACKOFF", Duration::from_secs(5))?,
            shutdown_timeout: duration_secs("SHUTDOWN_TIMEOUT", Duration::from_secs(120))?,
            lease_sweep_interval: duration_secs("LEASE_SWEEP_INTERVAL", Duration::from_secs(60))?,
            lease_grace: Duration::from_secs(30),
        })
    }

    /// Configuration for tests and embedded use, pointing at nothing.
    pub fn for_tests() -> Self {
        Self {
            db_dsn: String::new(),
            executor_addrs: Vec::new(),
            poll_interval: Duration::from_millis(0),
            idle_backoff: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(5),
            lease_sweep_interval: Duration::from_secs(60),
            lease_grace: Duration::from_secs(30),
        }
    }
}

fn duration_secs(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(v) => {
            let secs: u64 = v
                .parse()
                .map_err(|_| ConfigError::Invalid(name, "must be a whole number of seconds"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
