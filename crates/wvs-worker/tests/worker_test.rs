// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker loop tests against an in-memory store and a scripted executor.

mod common;

use chrono::{Duration, Utc};
use serde_json::json;

use common::{MockExecutor, make_due, store_with_workspace, submit, submit_with_attempts, worker};
use wvs_core::TaskOp;
use wvs_protocol::executor_proto;
use wvs_store::Store;

#[tokio::test]
async fn init_workspace_success_activates_workspace() {
    let store = store_with_workspace("w1").await;
    let executor = MockExecutor::succeed_with(&[("current_path", "/ws/w1/live/initial")]);
    let worker = worker(store.clone(), executor.clone());

    let task = submit(&store, "w1", TaskOp::InitWorkspace, "k1", json!({})).await;

    assert!(worker.tick().await.unwrap());

    let row = store.get_task(&task.task_id).await.unwrap().unwrap();
    assert_eq!(row.status, "SUCCEEDED");
    assert_eq!(row.attempt, 1);
    assert!(row.result.unwrap().contains("current_path"));

    let workspace = store.get_workspace("w1").await.unwrap().unwrap();
    assert_eq!(workspace.state, "ACTIVE");

    // Exactly one RPC, carrying the task_id in params.
    let calls = executor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].op, i32::from(executor_proto::TaskOp::InitWorkspace));
    assert_eq!(
        calls[0].params.get("task_id").map(String::as_str),
        Some(task.task_id.as_str())
    );
}

#[tokio::test]
async fn snapshot_create_success_inserts_snapshot_row() {
    let store = store_with_workspace("w1").await;
    let executor = MockExecutor::succeed_with(&[
        ("snapshot_id", "s1"),
        ("fs_path", "/ws/w1/snapshots/s1"),
    ]);
    let worker = worker(store.clone(), executor.clone());

    submit(
        &store,
        "w1",
        TaskOp::SnapshotCreate,
        "k1",
        json!({"snapshot_id": "s1", "message": "before upgrade"}),
    )
    .await;

    assert!(worker.tick().await.unwrap());

    let snapshot = store.get_snapshot("s1").await.unwrap().unwrap();
    assert_eq!(snapshot.wsid, "w1");
    assert_eq!(snapshot.fs_path, "/ws/w1/snapshots/s1");
    assert_eq!(snapshot.message.as_deref(), Some("before upgrade"));
    assert!(snapshot.deleted_at.is_none());
}

#[tokio::test]
async fn set_current_noop_short_circuits_the_rpc() {
    let store = store_with_workspace("w1").await;
    store
        .update_workspace_current("w1", Some("s1"), "/ws/w1/live/old")
        .await
        .unwrap();

    let executor = MockExecutor::succeed_with(&[]);
    let worker = worker(store.clone(), executor.clone());

    let task = submit(
        &store,
        "w1",
        TaskOp::SetCurrent,
        "k1",
        json!({"snapshot_id": "s1", "new_live_id": "ab12cd34"}),
    )
    .await;

    assert!(worker.tick().await.unwrap());

    let row = store.get_task(&task.task_id).await.unwrap().unwrap();
    assert_eq!(row.status, "SUCCEEDED");
    assert!(row.result.unwrap().contains("noop"));
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn set_current_success_updates_workspace_current() {
    let store = store_with_workspace("w1").await;
    store
        .create_snapshot("s2", "w1", "/ws/w1/snapshots/s2", None)
        .await
        .unwrap();

    let executor = MockExecutor::succeed_with(&[("current_path", "/ws/w1/live/ef56ab78")]);
    let worker = worker(store.clone(), executor.clone());

    submit(
        &store,
        "w1",
        TaskOp::SetCurrent,
        "k1",
        json!({"snapshot_id": "s2", "new_live_id": "ef56ab78"}),
    )
    .await;

    assert!(worker.tick().await.unwrap());

    let workspace = store.get_workspace("w1").await.unwrap().unwrap();
    assert_eq!(workspace.current_snapshot_id.as_deref(), Some("s2"));
    assert_eq!(workspace.current_path, "/ws/w1/live/ef56ab78");
}

#[tokio::test]
async fn executor_failure_retries_then_dead_letters() {
    let store = store_with_workspace("w1").await;
    let executor = MockExecutor::fail_with("EXECUTOR_ERROR", "clone failed");
    let worker = worker(store.clone(), executor.clone());

    let task = submit_with_attempts(
        &store,
        "w1",
        TaskOp::SnapshotCreate,
        "k1",
        json!({"snapshot_id": "s1"}),
        2,
    )
    .await;

    // First attempt fails and reschedules within the first jitter window.
    let before = Utc::now();
    assert!(worker.tick().await.unwrap());
    let row = store.get_task(&task.task_id).await.unwrap().unwrap();
    assert_eq!(row.status, "FAILED");
    assert_eq!(row.attempt, 1);
    assert!(row.next_run_at >= before - Duration::seconds(1));
    assert!(row.next_run_at <= Utc::now() + Duration::seconds(1));
    assert!(row.error.unwrap().contains("EXECUTOR_ERROR"));

    // Second attempt exhausts the budget.
    make_due(&store, &task.task_id).await;
    assert!(worker.tick().await.unwrap());
    let row = store.get_task(&task.task_id).await.unwrap().unwrap();
    assert_eq!(row.status, "DEAD");
    assert_eq!(row.attempt, 2);

    // Workspace untouched by a snapshot_create failure.
    let workspace = store.get_workspace("w1").await.unwrap().unwrap();
    assert_eq!(workspace.state, "PROVISIONING");
    assert_eq!(executor.call_count(), 2);
}

#[tokio::test]
async fn transport_failure_feeds_the_same_retry_path() {
    let store = store_with_workspace("w1").await;
    let executor = MockExecutor::transport_error();
    let worker = worker(store.clone(), executor.clone());

    let task = submit(&store, "w1", TaskOp::InitWorkspace, "k1", json!({})).await;

    assert!(worker.tick().await.unwrap());
    let row = store.get_task(&task.task_id).await.unwrap().unwrap();
    assert_eq!(row.status, "FAILED");
    assert!(row.error.unwrap().contains("executor call"));
}

#[tokio::test]
async fn dead_init_marks_workspace_init_failed_and_retry_init_recovers() {
    let store = store_with_workspace("w1").await;
    let executor = MockExecutor::fail_with("EXECUTOR_ERROR", "mount gone");
    let failing_worker = worker(store.clone(), executor.clone());

    let task =
        submit_with_attempts(&store, "w1", TaskOp::InitWorkspace, "k1", json!({}), 1).await;

    assert!(failing_worker.tick().await.unwrap());
    let row = store.get_task(&task.task_id).await.unwrap().unwrap();
    assert_eq!(row.status, "DEAD");
    let workspace = store.get_workspace("w1").await.unwrap().unwrap();
    assert_eq!(workspace.state, "INIT_FAILED");

    // retry-init: back to PROVISIONING with a fresh task, which succeeds.
    store
        .update_workspace_state("w1", wvs_core::WorkspaceState::Provisioning)
        .await
        .unwrap();
    submit(&store, "w1", TaskOp::InitWorkspace, "k-retry", json!({})).await;

    let healthy = MockExecutor::succeed_with(&[("current_path", "/ws/w1/live/initial")]);
    let healthy_worker = worker(store.clone(), healthy);
    assert!(healthy_worker.tick().await.unwrap());

    let workspace = store.get_workspace("w1").await.unwrap().unwrap();
    assert_eq!(workspace.state, "ACTIVE");
}

#[tokio::test]
async fn canceled_pending_task_is_never_executed() {
    let store = store_with_workspace("w1").await;
    let executor = MockExecutor::succeed_with(&[]);
    let worker = worker(store.clone(), executor.clone());

    let task = submit(&store, "w1", TaskOp::InitWorkspace, "k1", json!({})).await;
    store.cancel_task(&task.task_id).await.unwrap();

    // Nothing schedulable.
    assert!(!worker.tick().await.unwrap());
    assert_eq!(executor.call_count(), 0);
    let row = store.get_task(&task.task_id).await.unwrap().unwrap();
    assert_eq!(row.status, "CANCELED");
}

#[tokio::test]
async fn cancel_requested_failed_row_is_reaped_by_the_loop() {
    let store = store_with_workspace("w1").await;
    let executor = MockExecutor::succeed_with(&[]);
    let worker = worker(store.clone(), executor.clone());

    let task = submit(
        &store,
        "w1",
        TaskOp::SnapshotCreate,
        "k1",
        json!({"snapshot_id": "s1"}),
    )
    .await;

    // The attempt is in flight when cancel arrives; it fails afterwards.
    store.dequeue_task().await.unwrap().unwrap();
    store.cancel_task(&task.task_id).await.unwrap();
    store
        .fail_task(&task.task_id, r#"{"error":"boom"}"#, 0.0)
        .await
        .unwrap();

    // Next iteration reaps it instead of re-leasing.
    assert!(!worker.tick().await.unwrap());
    let row = store.get_task(&task.task_id).await.unwrap().unwrap();
    assert_eq!(row.status, "CANCELED");
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn snapshot_drop_preflight_failure_fails_the_task() {
    let store = store_with_workspace("w1").await;
    store
        .create_snapshot("s1", "w1", "/ws/w1/snapshots/s1", None)
        .await
        .unwrap();
    store
        .update_workspace_current("w1", Some("s1"), "/ws/w1/live/x")
        .await
        .unwrap();

    let executor = MockExecutor::succeed_with(&[]);
    let worker = worker(store.clone(), executor.clone());

    let task = submit(
        &store,
        "w1",
        TaskOp::SnapshotDrop,
        "k1",
        json!({"snapshot_id": "s1"}),
    )
    .await;

    assert!(worker.tick().await.unwrap());

    // The guard fired: no RPC, task failed, snapshot still live.
    assert_eq!(executor.call_count(), 0);
    let row = store.get_task(&task.task_id).await.unwrap().unwrap();
    assert_eq!(row.status, "FAILED");
    assert!(row.error.unwrap().contains("in use"));
    let snapshot = store.get_snapshot("s1").await.unwrap().unwrap();
    assert!(snapshot.deleted_at.is_none());
}

#[tokio::test]
async fn snapshot_drop_marks_deleted_before_the_rpc() {
    let store = store_with_workspace("w1").await;
    store
        .create_snapshot("s2", "w1", "/ws/w1/snapshots/s2", None)
        .await
        .unwrap();

    let executor = MockExecutor::succeed_with(&[]);
    let worker = worker(store.clone(), executor.clone());

    let task = submit(
        &store,
        "w1",
        TaskOp::SnapshotDrop,
        "k1",
        json!({"snapshot_id": "s2"}),
    )
    .await;

    assert!(worker.tick().await.unwrap());

    let row = store.get_task(&task.task_id).await.unwrap().unwrap();
    assert_eq!(row.status, "SUCCEEDED");
    let snapshot = store.get_snapshot("s2").await.unwrap().unwrap();
    assert!(snapshot.deleted_at.is_some());
    assert_eq!(executor.call_count(), 1);
}
