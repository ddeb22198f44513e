// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for worker tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use wvs_core::TaskOp;
use wvs_protocol::executor_proto::{ExecuteTaskRequest, ExecuteTaskResponse};
use wvs_store::{SqliteStore, Store, SubmitTask, TaskRecord};
use wvs_worker::{Config, ExecutorCallError, TaskExecutor, Worker};

/// What the mock does for every call.
#[derive(Clone)]
pub enum MockBehavior {
    /// Return success with these results.
    Succeed(HashMap<String, String>),
    /// Return an op-level failure.
    Fail { code: String, message: String },
    /// Fail the call itself (transport).
    Transport,
}

/// Scripted executor that records every request.
pub struct MockExecutor {
    behavior: MockBehavior,
    calls: Mutex<Vec<ExecuteTaskRequest>>,
}

impl MockExecutor {
    pub fn succeed_with(results: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            behavior: MockBehavior::Succeed(
                results
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_with(code: &str, message: &str) -> Arc<Self> {
        Arc::new(Self {
            behavior: MockBehavior::Fail {
                code: code.to_string(),
                message: message.to_string(),
            },
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn transport_error() -> Arc<Self> {
        Arc::new(Self {
            behavior: MockBehavior::Transport,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<ExecuteTaskRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskExecutor for MockExecutor {
    async fn execute(
        &self,
        request: ExecuteTaskRequest,
        _deadline: Duration,
    ) -> Result<ExecuteTaskResponse, ExecutorCallError> {
        self.calls.lock().unwrap().push(request);
        match &self.behavior {
            MockBehavior::Succeed(results) => Ok(ExecuteTaskResponse {
                success: true,
                results: results.clone(),
                error_code: String::new(),
                error_message: String::new(),
            }),
            MockBehavior::Fail { code, message } => Ok(ExecuteTaskResponse {
                success: false,
                results: HashMap::new(),
                error_code: code.clone(),
                error_message: message.clone(),
            }),
            MockBehavior::Transport => Err(ExecutorCallError::Deadline(Duration::from_secs(1))),
        }
    }
}

/// In-memory store with one PROVISIONING workspace.
pub async fn store_with_workspace(wsid: &str) -> Arc<SqliteStore> {
    let store = SqliteStore::in_memory().await.unwrap();
    store
        .create_workspace(wsid, &format!("/ws/{wsid}"), "alice", &format!("/ws/{wsid}"))
        .await
        .unwrap();
    Arc::new(store)
}

/// Worker over the given store and executor with test pacing.
pub fn worker(store: Arc<SqliteStore>, executor: Arc<dyn TaskExecutor>) -> Worker {
    Worker::new(store, executor, Config::for_tests())
}

/// Submit a task with the given params and default budgets.
pub async fn submit(
    store: &SqliteStore,
    wsid: &str,
    op: TaskOp,
    key: &str,
    params: Value,
) -> TaskRecord {
    store
        .submit_task(&SubmitTask::new(wsid, op, key, format!("hash-{key}"), params))
        .await
        .unwrap()
        .task
}

/// Submit with a non-default attempt budget.
pub async fn submit_with_attempts(
    store: &SqliteStore,
    wsid: &str,
    op: TaskOp,
    key: &str,
    params: Value,
    max_attempts: i32,
) -> TaskRecord {
    let mut task = SubmitTask::new(wsid, op, key, format!("hash-{key}"), params);
    task.max_attempts = max_attempts;
    store.submit_task(&task).await.unwrap().task
}

/// Force a task to be schedulable right now.
pub async fn make_due(store: &SqliteStore, task_id: &str) {
    sqlx::query("UPDATE tasks SET next_run_at = ? WHERE task_id = ?")
        .bind(chrono::Utc::now() - chrono::Duration::seconds(1))
        .bind(task_id)
        .execute(store.pool())
        .await
        .unwrap();
}
