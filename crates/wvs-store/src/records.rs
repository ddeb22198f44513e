// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Record structs mirroring table rows.
//!
//! Enum-like columns are stored as their string form and exposed raw plus
//! through typed accessors; params/result/error are JSON text so the same
//! structs decode from both backends.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use wvs_core::{TaskOp, TaskStatus, WorkspaceState};

/// A workspace row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkspaceRecord {
    /// Stable workspace identifier.
    pub wsid: String,
    /// Absolute root path on the shared filesystem.
    pub root_path: String,
    /// Owner principal.
    pub owner: String,
    /// Lifecycle state string.
    pub state: String,
    /// Snapshot `current` was last switched to, if any.
    pub current_snapshot_id: Option<String>,
    /// Absolute path `current` resolves to.
    pub current_path: String,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl WorkspaceRecord {
    /// Typed lifecycle state.
    pub fn workspace_state(&self) -> Result<WorkspaceState, wvs_core::workspace::UnknownState> {
        self.state.parse()
    }
}

/// A snapshot row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRecord {
    /// Time-ordered snapshot identifier.
    pub snapshot_id: String,
    /// Owning workspace.
    pub wsid: String,
    /// Absolute path of the materialized directory.
    pub fs_path: String,
    /// Optional operator-supplied description.
    pub message: Option<String>,
    /// Row creation time (after filesystem materialization).
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker; rows are never hard-deleted.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A task row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRecord {
    /// Time-ordered task identifier.
    pub task_id: String,
    /// Workspace the task targets.
    pub wsid: String,
    /// Operation string.
    pub op: String,
    /// Lifecycle status string.
    pub status: String,
    /// Client-supplied idempotency key.
    pub idempotency_key: String,
    /// Fingerprint of the originating submission.
    pub request_hash: String,
    /// Operation parameters as a JSON object of strings.
    pub params: String,
    /// Executor result map as JSON, set on success.
    pub result: Option<String>,
    /// Error document as JSON, set on failure.
    pub error: Option<String>,
    /// Attempts started so far.
    pub attempt: i32,
    /// Attempts allowed before dead-lettering.
    pub max_attempts: i32,
    /// Earliest time the row is schedulable (DB clock).
    pub next_run_at: DateTime<Utc>,
    /// Deadline applied to each executor call.
    pub timeout_seconds: i32,
    /// Cooperative cancellation flag.
    pub cancel_requested: bool,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// When the current/last attempt was leased.
    pub started_at: Option<DateTime<Utc>>,
    /// When the row reached a resting status.
    pub ended_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Typed operation.
    pub fn task_op(&self) -> Result<TaskOp, wvs_core::task::UnknownOp> {
        self.op.parse()
    }

    /// Typed status.
    pub fn task_status(&self) -> Result<TaskStatus, wvs_core::task::UnknownStatus> {
        self.status.parse()
    }

    /// Parse the params column into a string map.
    pub fn params_map(&self) -> Result<HashMap<String, String>, serde_json::Error> {
        serde_json::from_str(&self.params)
    }

    /// True once no further transition can occur.
    pub fn is_terminal(&self) -> bool {
        self.task_status().map(|s| s.is_terminal()).unwrap_or(false)
    }
}

/// An audit log row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditRecord {
    /// Monotonic event id.
    pub event_id: i64,
    /// When the action was received.
    pub ts: DateTime<Utc>,
    /// Workspace the action targeted, if any.
    pub wsid: Option<String>,
    /// Actor JSON.
    pub actor: String,
    /// Action name.
    pub action: String,
    /// Task enqueued by the action, if any.
    pub task_id: Option<String>,
    /// Opaque payload JSON.
    pub payload: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> TaskRecord {
        TaskRecord {
            task_id: "t1".into(),
            wsid: "w1".into(),
            op: "snapshot_create".into(),
            status: "PENDING".into(),
            idempotency_key: "k1".into(),
            request_hash: "h1".into(),
            params: r#"{"snapshot_id":"s1","message":"m"}"#.into(),
            result: None,
            error: None,
            attempt: 0,
            max_attempts: 5,
            next_run_at: Utc::now(),
            timeout_seconds: 300,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    #[test]
    fn typed_accessors() {
        let task = sample_task();
        assert_eq!(task.task_op().unwrap(), TaskOp::SnapshotCreate);
        assert_eq!(task.task_status().unwrap(), TaskStatus::Pending);
        assert!(!task.is_terminal());

        let params = task.params_map().unwrap();
        assert_eq!(params.get("snapshot_id").map(String::as_str), Some("s1"));
    }

    #[test]
    fn terminal_detection() {
        let mut task = sample_task();
        task.status = "DEAD".into();
        assert!(task.is_terminal());
    }
}
