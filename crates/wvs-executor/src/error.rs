// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor errors and their wire code mapping.

use std::path::PathBuf;
use std::time::Duration;

/// Result type using ExecutorError.
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Failures an op can report.
///
/// Every variant maps onto the two wire codes the worker understands:
/// `QUIESCE_TIMEOUT` for a missed FROZEN ack, `EXECUTOR_ERROR` for
/// everything else. `UNKNOWN_OP` is produced by the dispatcher, not here.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// The agent did not ack FROZEN within the deadline.
    #[error("quiesce timeout after {waited:?} for workspace '{wsid}'")]
    QuiesceTimeout {
        /// Workspace whose agent went silent.
        wsid: String,
        /// How long the executor waited.
        waited: Duration,
    },

    /// A required op parameter was not supplied.
    #[error("missing required param: {0}")]
    MissingParam(&'static str),

    /// The source snapshot directory does not exist.
    #[error("snapshot dir not found: {}", path.display())]
    SnapshotMissing {
        /// Path that was expected to exist.
        path: PathBuf,
    },

    /// The clone primitive failed.
    #[error("clone failed: {detail}")]
    CloneFailed {
        /// Combined output or IO detail.
        detail: String,
    },

    /// The op exceeded its deadline.
    #[error("op deadline exceeded after {0:?}")]
    Deadline(Duration),

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Control file or metadata marker could not be (de)serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExecutorError {
    /// The wire error code for this failure.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::QuiesceTimeout { .. } => "QUIESCE_TIMEOUT",
            _ => "EXECUTOR_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiesce_timeout_has_its_own_code() {
        let err = ExecutorError::QuiesceTimeout {
            wsid: "w1".into(),
            waited: Duration::from_secs(30),
        };
        assert_eq!(err.error_code(), "QUIESCE_TIMEOUT");
    }

    #[test]
    fn other_failures_map_to_executor_error() {
        let err = ExecutorError::MissingParam("snapshot_id");
        assert_eq!(err.error_code(), "EXECUTOR_ERROR");

        let err = ExecutorError::CloneFailed {
            detail: "exit status 1".into(),
        };
        assert_eq!(err.error_code(), "EXECUTOR_ERROR");
    }
}
