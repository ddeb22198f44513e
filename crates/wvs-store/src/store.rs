// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The queue-layer contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use wvs_core::{TaskOp, TaskStatus, audit::AuditEvent};

use crate::error::StoreError;
use crate::records::{SnapshotRecord, TaskRecord, WorkspaceRecord};

/// A task submission.
#[derive(Debug, Clone)]
pub struct SubmitTask {
    /// Workspace the task targets.
    pub wsid: String,
    /// Operation to run.
    pub op: TaskOp,
    /// Client-supplied idempotency key.
    pub idempotency_key: String,
    /// Fingerprint of the canonicalized request.
    pub request_hash: String,
    /// Operation parameters (a JSON object of strings).
    pub params: Value,
    /// Attempts allowed before dead-lettering.
    pub max_attempts: i32,
    /// Per-attempt executor deadline in seconds.
    pub timeout_seconds: i32,
}

impl SubmitTask {
    /// A submission with the default retry and timeout budget.
    pub fn new(
        wsid: impl Into<String>,
        op: TaskOp,
        idempotency_key: impl Into<String>,
        request_hash: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            wsid: wsid.into(),
            op,
            idempotency_key: idempotency_key.into(),
            request_hash: request_hash.into(),
            params,
            max_attempts: 5,
            timeout_seconds: 300,
        }
    }
}

/// Outcome of a submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// The task row: freshly inserted, or the earlier duplicate.
    pub task: TaskRecord,
    /// True when an existing row was returned instead of inserting.
    pub deduplicated: bool,
}

/// Filters for task listing.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to one workspace.
    pub wsid: Option<String>,
    /// Restrict to one status.
    pub status: Option<TaskStatus>,
    /// Restrict to one operation.
    pub op: Option<TaskOp>,
}

/// Durable queue, locks, and workspace state.
///
/// Both backends implement the same contract; every state transition is
/// guarded in SQL on the source status so concurrent workers cannot take
/// an illegal edge.
#[async_trait]
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Task queue
    // ------------------------------------------------------------------

    /// Submit a task idempotently.
    ///
    /// If a row with the same (wsid, op, idempotency_key) exists and its
    /// request hash matches, that row is returned with `deduplicated`
    /// set. A differing hash is [`StoreError::IdempotencyMismatch`].
    /// Uniqueness is enforced by the storage constraint, not
    /// read-then-insert.
    async fn submit_task(&self, submit: &SubmitTask) -> Result<SubmitOutcome, StoreError>;

    /// Fetch a task by ID.
    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError>;

    /// Idempotency lookup by (wsid, op, key).
    async fn get_task_by_idempotency_key(
        &self,
        wsid: &str,
        op: TaskOp,
        idempotency_key: &str,
    ) -> Result<Option<TaskRecord>, StoreError>;

    /// List tasks newest-first with a created-at cursor.
    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        limit: i64,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    /// Atomically claim one due task, transitioning it to RUNNING with
    /// `attempt` incremented. Returns `None` when nothing qualifies.
    async fn dequeue_task(&self) -> Result<Option<TaskRecord>, StoreError>;

    /// Move a RUNNING task to SUCCEEDED or CANCELED with its result or
    /// error document.
    async fn complete_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Move a RUNNING task to FAILED and schedule the retry
    /// `retry_delay_secs` from now on the database clock.
    async fn fail_task(
        &self,
        task_id: &str,
        error: &str,
        retry_delay_secs: f64,
    ) -> Result<(), StoreError>;

    /// Move a RUNNING or FAILED task to DEAD.
    async fn mark_task_dead(&self, task_id: &str, error: &str) -> Result<(), StoreError>;

    /// Cancel a task: PENDING transitions to CANCELED directly, RUNNING
    /// and retryable FAILED rows only get `cancel_requested` set, and
    /// terminal rows are untouched. Returns the row after the attempt.
    async fn cancel_task(&self, task_id: &str) -> Result<TaskRecord, StoreError>;

    /// Promote non-RUNNING rows whose cancel was requested to CANCELED.
    /// Returns the number of rows reaped.
    async fn reap_cancel_requested(&self) -> Result<u64, StoreError>;

    /// Re-fail RUNNING rows whose lease (`started_at + timeout_seconds`
    /// plus `grace_secs`) has expired; rows with no attempts remaining go
    /// straight to DEAD. Returns the number of rows swept.
    async fn sweep_expired_leases(&self, grace_secs: i64) -> Result<u64, StoreError>;

    /// Count schedulable rows (PENDING plus retryable FAILED, due now).
    async fn queue_depth(&self) -> Result<i64, StoreError>;

    // ------------------------------------------------------------------
    // Per-workspace advisory lock
    // ------------------------------------------------------------------

    /// Acquire and immediately release the workspace's advisory lock,
    /// blocking until any prior holder's transaction ends. This is the
    /// guard window for ops with no pre-flight mutations.
    async fn acquire_workspace_guard(&self, wsid: &str) -> Result<(), StoreError>;

    /// Drop pre-flight: under the workspace lock, verify the snapshot is
    /// neither the workspace's current snapshot nor referenced by another
    /// non-terminal task, then mark it deleted, all in one transaction.
    async fn prepare_snapshot_drop(
        &self,
        wsid: &str,
        snapshot_id: &str,
        task_id: &str,
    ) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Workspaces
    // ------------------------------------------------------------------

    /// Insert a workspace in PROVISIONING.
    async fn create_workspace(
        &self,
        wsid: &str,
        root_path: &str,
        owner: &str,
        current_path: &str,
    ) -> Result<WorkspaceRecord, StoreError>;

    /// Fetch a workspace.
    async fn get_workspace(&self, wsid: &str) -> Result<Option<WorkspaceRecord>, StoreError>;

    /// List workspaces newest-first with a created-at cursor.
    async fn list_workspaces(
        &self,
        limit: i64,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<WorkspaceRecord>, StoreError>;

    /// Set the workspace state. DISABLED rows are never updated.
    async fn update_workspace_state(
        &self,
        wsid: &str,
        state: wvs_core::WorkspaceState,
    ) -> Result<(), StoreError>;

    /// Atomically set `current_snapshot_id` and `current_path`.
    async fn update_workspace_current(
        &self,
        wsid: &str,
        snapshot_id: Option<&str>,
        current_path: &str,
    ) -> Result<(), StoreError>;

    /// Disable a workspace. Fails with [`StoreError::WorkspaceBusy`] when
    /// non-terminal tasks exist; already-disabled is an idempotent
    /// success.
    async fn disable_workspace(&self, wsid: &str) -> Result<WorkspaceRecord, StoreError>;

    /// Count non-terminal tasks for a workspace.
    async fn count_active_tasks(&self, wsid: &str) -> Result<i64, StoreError>;

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Insert a snapshot row (after its filesystem materialization).
    async fn create_snapshot(
        &self,
        snapshot_id: &str,
        wsid: &str,
        fs_path: &str,
        message: Option<&str>,
    ) -> Result<SnapshotRecord, StoreError>;

    /// Fetch a snapshot, deleted or not.
    async fn get_snapshot(&self, snapshot_id: &str) -> Result<Option<SnapshotRecord>, StoreError>;

    /// List live snapshots newest-first with a created-at cursor.
    async fn list_snapshots(
        &self,
        wsid: &str,
        limit: i64,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<SnapshotRecord>, StoreError>;

    /// Soft-delete a snapshot.
    async fn mark_snapshot_deleted(&self, snapshot_id: &str) -> Result<(), StoreError>;

    /// Whether any non-terminal task other than `exclude_task_id` on this
    /// workspace references the snapshot in its params.
    async fn is_snapshot_referenced(
        &self,
        wsid: &str,
        snapshot_id: &str,
        exclude_task_id: &str,
    ) -> Result<bool, StoreError>;

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    /// Append an audit event. Never read back by the core.
    async fn append_audit(&self, event: &AuditEvent) -> Result<(), StoreError>;

    /// Cheap liveness probe against the backend.
    async fn health_check(&self) -> Result<(), StoreError>;
}
