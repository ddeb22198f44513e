// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor configuration from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::clone::CloneMode;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// The executor's view of the shared filesystem.
    pub mount_path: PathBuf,
    /// Address the QUIC server binds to.
    pub bind_addr: SocketAddr,
    /// How long to wait for the agent's FROZEN ack.
    pub quiesce_timeout: Duration,
    /// Per-op deadline.
    pub task_timeout: Duration,
    /// Grace period for in-flight ops on shutdown.
    pub shutdown_timeout: Duration,
    /// How trees are cloned.
    pub clone_mode: CloneMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mount_path: PathBuf::from("/ws"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7070)),
            quiesce_timeout: Duration::from_secs(30),
            task_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(120),
            clone_mode: CloneMode::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `MOUNT_PATH`: shared filesystem mount (default: `/ws`)
    /// - `EXECUTOR_BIND_ADDR`: QUIC bind address (default: `0.0.0.0:7070`)
    /// - `QUIESCE_TIMEOUT`: FROZEN-ack deadline in seconds (default: 30)
    /// - `TASK_TIMEOUT`: per-op deadline in seconds (default: 300)
    /// - `SHUTDOWN_TIMEOUT`: shutdown grace in seconds (default: 120)
    /// - `CLONE_MODE`: clone command name, or `copy` for an in-process
    ///   recursive copy (default: `juicefs`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();

        let mount_path = std::env::var("MOUNT_PATH")
            .map(PathBuf::from)
            .unwrap_or(default.mount_path);

        let bind_addr = match std::env::var("EXECUTOR_BIND_ADDR") {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid("EXECUTOR_BIND_ADDR", "must be host:port"))?,
            Err(_) => default.bind_addr,
        };

        Ok(Self {
            mount_path,
            bind_addr,
            quiesce_timeout: duration_secs("QUIESCE_TIMEOUT", default.quiesce_timeout)?,
            task_timeout: duration_secs("TASK_TIMEOUT", default.task_timeout)?,
            shutdown_timeout: duration_secs("SHUTDOWN_TIMEOUT", default.shutdown_timeout)?,
            clone_mode: std::env::var("CLONE_MODE")
                .map(|v| CloneMode::parse(&v))
                .unwrap_or(default.clone_mode),
        })
    }

    /// Root directory of a workspace on the mount.
    pub fn workspace_root(&self, wsid: &str) -> PathBuf {
        self.mount_path.join(wsid)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.mount_path, PathBuf::from("/ws"));
        assert_eq!(config.bind_addr.port(), 7070);
        assert_eq!(config.quiesce_timeout, Duration::from_secs(30));
        assert_eq!(config.task_timeout, Duration::from_secs(300));
    }

    #[test]
    fn workspace_root_joins_wsid() {
        let config = Config::default();
        assert_eq!(config.workspace_root("w1"), PathBuf::from("/ws/w1"));
    }
}
