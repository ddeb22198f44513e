// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The lease/dispatch loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use wvs_core::{TaskOp, TaskStatus, WorkspaceState, backoff};
use wvs_protocol::executor_proto::{self, ExecuteTaskRequest};
use wvs_store::{Store, StoreError, TaskRecord};

use crate::config::Config;
use crate::executor_client::TaskExecutor;

/// A single sequential worker over one queue.
///
/// Run several processes for throughput; within a process the worker
/// handles one task at a time.
pub struct Worker {
    store: Arc<dyn Store>,
    executor: Arc<dyn TaskExecutor>,
    config: Config,
}

impl Worker {
    /// Create a worker over the given store and executor seam.
    pub fn new(store: Arc<dyn Store>, executor: Arc<dyn TaskExecutor>, config: Config) -> Self {
        Self {
            store,
            executor,
            config,
        }
    }

    /// Run until `shutdown` flips to true. The in-flight task always
    /// completes its attempt; shutdown is only honored between
    /// iterations.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("worker started");
        let mut last_sweep = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            if last_sweep.elapsed() >= self.config.lease_sweep_interval {
                last_sweep = Instant::now();
                match self
                    .store
                    .sweep_expired_leases(self.config.lease_grace.as_secs() as i64)
                    .await
                {
                    Ok(0) => {}
                    Ok(swept) => warn!(swept, "re-queued tasks with expired leases"),
                    Err(e) => error!("lease sweep failed: {}", e),
                }
            }

            let pause = match self.tick().await {
                // Rate-limit consecutive dequeues.
                Ok(true) => self.config.poll_interval,
                Ok(false) => self.config.idle_backoff,
                Err(e) => {
                    error!("worker iteration failed: {}", e);
                    self.config.idle_backoff
                }
            };

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("worker stopping");
    }

    /// One iteration: reap cancel-flagged rows, lease at most one task,
    /// and process it. Returns whether a task was processed.
    pub async fn tick(&self) -> Result<bool, StoreError> {
        match self.store.reap_cancel_requested().await {
            Ok(0) => {}
            Ok(reaped) => info!(reaped, "canceled flagged tasks"),
            Err(e) => warn!("cancel reap failed: {}", e),
        }

        let Some(task) = self.store.dequeue_task().await? else {
            return Ok(false);
        };

        info!(
            task_id = %task.task_id,
            wsid = %task.wsid,
            op = %task.op,
            attempt = task.attempt,
            "task dequeued"
        );

        // The flag may have been set while the row sat PENDING; honor it
        // before doing any work.
        if task.cancel_requested {
            if let Err(e) = self
                .store
                .complete_task(
                    &task.task_id,
                    TaskStatus::Canceled,
                    None,
                    Some(&error_json("canceled")),
                )
                .await
            {
                warn!(task_id = %task.task_id, "failed to cancel task: {}", e);
            } else {
                info!(task_id = %task.task_id, "task canceled");
            }
            return Ok(true);
        }

        self.execute_with_lock(&task).await;

        match self.store.queue_depth().await {
            Ok(depth) => debug!(depth, "queue depth"),
            Err(e) => warn!("queue depth probe failed: {}", e),
        }

        Ok(true)
    }

    /// Take the per-workspace guard, run the op-specific pre-flight, and
    /// dispatch.
    ///
    /// The guard transaction commits before the executor call: the lock's
    /// job is to protect the pre-execution invariant check, and holding a
    /// database connection across a minutes-long RPC would starve
    /// unrelated workers. Mutual exclusion during execution comes from
    /// the RUNNING status and the executor's replay guards.
    async fn execute_with_lock(&self, task: &TaskRecord) {
        let op = match task.task_op() {
            Ok(op) => op,
            Err(e) => {
                self.fail_task(task, e.to_string()).await;
                return;
            }
        };

        let lock_start = Instant::now();

        if op == TaskOp::SnapshotDrop {
            let params = task.params_map().unwrap_or_default();
            let Some(snapshot_id) = params.get("snapshot_id") else {
                self.fail_task(task, "missing required param: snapshot_id".to_string())
                    .await;
                return;
            };
            // Re-check references and mark deleted_at inside the lock
            // transaction; the filesystem removal runs outside it.
            if let Err(e) = self
                .store
                .prepare_snapshot_drop(&task.wsid, snapshot_id, &task.task_id)
                .await
            {
                self.fail_task(task, e.to_string()).await;
                return;
            }
        } else if let Err(e) = self.store.acquire_workspace_guard(&task.wsid).await {
            self.fail_task(task, e.to_string()).await;
            return;
        }

        debug!(
            task_id = %task.task_id,
            lock_wait = ?lock_start.elapsed(),
            "workspace guard passed"
        );

        self.dispatch(task, op).await;
    }

    async fn dispatch(&self, task: &TaskRecord, op: TaskOp) {
        let start = Instant::now();

        let mut params = task.params_map().unwrap_or_default();
        params.insert("task_id".to_string(), task.task_id.clone());

        if op == TaskOp::SetCurrent {
            match self.set_current_noop(task, &params).await {
                Ok(true) => return,
                Ok(false) => {}
                // Not fatal; the executor replay guard covers the race.
                Err(e) => warn!(task_id = %task.task_id, "noop pre-check failed: {}", e),
            }
        }

        let request = ExecuteTaskRequest {
            task_id: task.task_id.clone(),
            wsid: task.wsid.clone(),
            op: proto_op(op).into(),
            params,
        };
        let deadline = Duration::from_secs(task.timeout_seconds.max(1) as u64);

        let response = match self.executor.execute(request, deadline).await {
            Ok(response) => response,
            Err(e) => {
                self.fail_task(task, format!("executor call: {e}")).await;
                return;
            }
        };

        if !response.success {
            self.fail_task(
                task,
                format!("{}: {}", response.error_code, response.error_message),
            )
            .await;
            return;
        }

        debug!(task_id = %task.task_id, duration = ?start.elapsed(), "executor call finished");
        self.on_success(task, op, response.results).await;
    }

    /// Skip the RPC when `current_snapshot_id` already matches.
    async fn set_current_noop(
        &self,
        task: &TaskRecord,
        params: &HashMap<String, String>,
    ) -> Result<bool, StoreError> {
        let workspace = self
            .store
            .get_workspace(&task.wsid)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "workspace",
                id: task.wsid.clone(),
            })?;

        if workspace.current_snapshot_id.as_deref() == params.get("snapshot_id").map(String::as_str)
        {
            self.store
                .complete_task(
                    &task.task_id,
                    TaskStatus::Succeeded,
                    Some(r#"{"noop":true}"#),
                    None,
                )
                .await?;
            info!(task_id = %task.task_id, "set_current: already current, noop");
            return Ok(true);
        }
        Ok(false)
    }

    /// Post-execution row updates, then mark the task SUCCEEDED.
    ///
    /// Store failures here are logged and swallowed: the filesystem
    /// effect is already durable, and re-running the idempotent op on a
    /// re-leased attempt is the recovery path.
    async fn on_success(&self, task: &TaskRecord, op: TaskOp, results: HashMap<String, String>) {
        let params = task.params_map().unwrap_or_default();

        match op {
            TaskOp::InitWorkspace => {
                if let Err(e) = self
                    .store
                    .update_workspace_state(&task.wsid, WorkspaceState::Active)
                    .await
                {
                    warn!(wsid = %task.wsid, "failed to activate workspace: {}", e);
                } else {
                    info!(wsid = %task.wsid, from = "PROVISIONING", to = "ACTIVE", "workspace state changed");
                }
            }

            TaskOp::SnapshotCreate => {
                let snapshot_id = params.get("snapshot_id").map(String::as_str).unwrap_or("");
                let fs_path = results.get("fs_path").map(String::as_str).unwrap_or("");
                let message = params.get("message").filter(|m| !m.is_empty());
                if let Err(e) = self
                    .store
                    .create_snapshot(snapshot_id, &task.wsid, fs_path, message.map(String::as_str))
                    .await
                {
                    warn!(snapshot_id, "failed to insert snapshot row: {}", e);
                }
            }

            TaskOp::SetCurrent => {
                let snapshot_id = params.get("snapshot_id").map(String::as_str);
                let current_path = results.get("current_path").map(String::as_str).unwrap_or("");
                if let Err(e) = self
                    .store
                    .update_workspace_current(&task.wsid, snapshot_id, current_path)
                    .await
                {
                    warn!(wsid = %task.wsid, "failed to update workspace current: {}", e);
                }
            }

            // deleted_at was already written in the lock transaction.
            TaskOp::SnapshotDrop => {}
        }

        let result_json =
            serde_json::to_string(&results).unwrap_or_else(|_| "{}".to_string());
        if let Err(e) = self
            .store
            .complete_task(&task.task_id, TaskStatus::Succeeded, Some(&result_json), None)
            .await
        {
            warn!(task_id = %task.task_id, "failed to mark task succeeded: {}", e);
        }
        info!(task_id = %task.task_id, op = %task.op, "task succeeded");
    }

    /// Dead-letter or reschedule a failed attempt.
    async fn fail_task(&self, task: &TaskRecord, message: String) {
        let error = error_json(&message);

        if task.attempt >= task.max_attempts {
            if let Err(e) = self.store.mark_task_dead(&task.task_id, &error).await {
                warn!(task_id = %task.task_id, "failed to mark task dead: {}", e);
            }
            if task.task_op() == Ok(TaskOp::InitWorkspace) {
                if let Err(e) = self
                    .store
                    .update_workspace_state(&task.wsid, WorkspaceState::InitFailed)
                    .await
                {
                    warn!(wsid = %task.wsid, "failed to mark workspace INIT_FAILED: {}", e);
                } else {
                    info!(wsid = %task.wsid, from = "PROVISIONING", to = "INIT_FAILED", "workspace state changed");
                }
            }
            error!(task_id = %task.task_id, attempt = task.attempt, "task dead: {}", message);
        } else {
            // attempt is 1-indexed after the lease; the first retry draws
            // from [0, 1).
            let delay = backoff::retry_delay_secs((task.attempt - 1).max(0));
            if let Err(e) = self.store.fail_task(&task.task_id, &error, delay).await {
                warn!(task_id = %task.task_id, "failed to reschedule task: {}", e);
            }
            warn!(
                task_id = %task.task_id,
                attempt = task.attempt,
                retry_in_secs = delay,
                "task failed, will retry: {}",
                message
            );
        }
    }
}

fn proto_op(op: TaskOp) -> executor_proto::TaskOp {
    match op {
        TaskOp::InitWorkspace => executor_proto::TaskOp::InitWorkspace,
        TaskOp::SnapshotCreate => executor_proto::TaskOp::SnapshotCreate,
        TaskOp::SnapshotDrop => executor_proto::TaskOp::SnapshotDrop,
        TaskOp::SetCurrent => executor_proto::TaskOp::SetCurrent,
    }
}

fn error_json(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}
