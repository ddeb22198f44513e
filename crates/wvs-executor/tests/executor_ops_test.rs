// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Op-level tests against a real (temporary) filesystem.
//!
//! A background task plays the in-workspace agent: it watches the
//! control file and acks REQUEST_FREEZE with FROZEN, the way a writer
//! agent on the shared mount would.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;

use wvs_executor::clone::CloneMode;
use wvs_executor::quiesce::{CONTROL_FILE, QuiesceState, read_control_state};
use wvs_executor::{Config, ExecutorError, init_workspace, set_current, snapshot_create, snapshot_drop};

fn test_config(mount: &Path) -> Config {
    Config {
        mount_path: mount.to_path_buf(),
        quiesce_timeout: Duration::from_secs(5),
        clone_mode: CloneMode::Copy,
        ..Default::default()
    }
}

/// Ack REQUEST_FREEZE with FROZEN until aborted.
fn spawn_agent(ws_root: std::path::PathBuf) -> JoinHandle<()> {
    tokio::spawn(async move {
        let control = ws_root.join(CONTROL_FILE);
        loop {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Ok(QuiesceState::RequestFreeze) = read_control_state(&control) {
                let doc = serde_json::json!({
                    "state": "FROZEN",
                    "timestamp": chrono::Utc::now(),
                });
                let _ = std::fs::write(&control, serde_json::to_vec(&doc).unwrap());
            }
        }
    })
}

fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn init_workspace_with_content(config: &Config, wsid: &str) -> std::path::PathBuf {
    init_workspace::run(config, wsid, &HashMap::new())
        .await
        .unwrap();
    let ws_root = config.workspace_root(wsid);
    std::fs::write(ws_root.join("live/initial/data.txt"), b"v1").unwrap();
    ws_root
}

#[tokio::test]
async fn snapshot_create_clones_current_tree() {
    let mount = TempDir::new().unwrap();
    let config = test_config(mount.path());
    let ws_root = init_workspace_with_content(&config, "w1").await;
    let agent = spawn_agent(ws_root.clone());

    let results = snapshot_create::run(
        &config,
        "w1",
        &params(&[("snapshot_id", "s1"), ("task_id", "t1"), ("message", "first")]),
    )
    .await
    .unwrap();
    agent.abort();

    let snap_dir = ws_root.join("snapshots/s1");
    assert_eq!(results.get("snapshot_id").map(String::as_str), Some("s1"));
    assert_eq!(
        results.get("fs_path").map(String::as_str),
        Some(snap_dir.to_str().unwrap())
    );
    assert_eq!(std::fs::read(snap_dir.join("data.txt")).unwrap(), b"v1");

    // Metadata marker carries identity and message.
    let meta: serde_json::Value =
        serde_json::from_slice(&std::fs::read(snap_dir.join(".wvs/snapshot.json")).unwrap())
            .unwrap();
    assert_eq!(meta["snapshot_id"], "s1");
    assert_eq!(meta["wsid"], "w1");
    assert_eq!(meta["message"], "first");

    // Writers were resumed.
    assert_eq!(
        read_control_state(&ws_root.join(CONTROL_FILE)).unwrap(),
        QuiesceState::RequestResume
    );
}

#[tokio::test]
async fn snapshot_create_replay_skips_quiesce() {
    let mount = TempDir::new().unwrap();
    let config = test_config(mount.path());
    let ws_root = init_workspace_with_content(&config, "w1").await;
    let agent = spawn_agent(ws_root.clone());

    let args = params(&[("snapshot_id", "s1"), ("task_id", "t1")]);
    let first = snapshot_create::run(&config, "w1", &args).await.unwrap();
    agent.abort();

    // No agent running now; a replay must still succeed because the
    // marker short-circuits before any quiesce.
    let second = snapshot_create::run(&config, "w1", &args).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn snapshot_create_times_out_without_agent() {
    let mount = TempDir::new().unwrap();
    let config = Config {
        quiesce_timeout: Duration::from_millis(300),
        ..test_config(mount.path())
    };
    let ws_root = init_workspace_with_content(&config, "w1").await;

    let err = snapshot_create::run(
        &config,
        "w1",
        &params(&[("snapshot_id", "s1"), ("task_id", "t1")]),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ExecutorError::QuiesceTimeout { .. }));
    assert_eq!(err.error_code(), "QUIESCE_TIMEOUT");
    // Resume marker written even on the failure path.
    assert_eq!(
        read_control_state(&ws_root.join(CONTROL_FILE)).unwrap(),
        QuiesceState::RequestResume
    );
    // No half-made snapshot marker.
    assert!(!ws_root.join("snapshots/s1/.wvs/snapshot.json").exists());
}

#[tokio::test]
async fn snapshot_drop_removes_tree_and_replays_as_noop() {
    let mount = TempDir::new().unwrap();
    let config = test_config(mount.path());
    let ws_root = init_workspace_with_content(&config, "w1").await;
    let agent = spawn_agent(ws_root.clone());

    snapshot_create::run(
        &config,
        "w1",
        &params(&[("snapshot_id", "s1"), ("task_id", "t1")]),
    )
    .await
    .unwrap();
    agent.abort();

    let args = params(&[("snapshot_id", "s1")]);
    snapshot_drop::run(&config, "w1", &args).await.unwrap();
    assert!(!ws_root.join("snapshots/s1").exists());

    // Second drop of the same snapshot is a success.
    snapshot_drop::run(&config, "w1", &args).await.unwrap();
}

#[tokio::test]
async fn set_current_switches_to_clone_of_snapshot() {
    let mount = TempDir::new().unwrap();
    let config = test_config(mount.path());
    let ws_root = init_workspace_with_content(&config, "w1").await;
    let agent = spawn_agent(ws_root.clone());

    snapshot_create::run(
        &config,
        "w1",
        &params(&[("snapshot_id", "s1"), ("task_id", "t1")]),
    )
    .await
    .unwrap();

    // Mutate current after the snapshot; the switch must restore the
    // snapshot content into a fresh live tree.
    std::fs::write(ws_root.join("live/initial/data.txt"), b"v2").unwrap();

    let results = set_current::run(
        &config,
        "w1",
        &params(&[
            ("snapshot_id", "s1"),
            ("new_live_id", "ab12cd34"),
            ("task_id", "t2"),
        ]),
    )
    .await
    .unwrap();
    agent.abort();

    assert_eq!(
        std::fs::read_link(ws_root.join("current")).unwrap(),
        std::path::PathBuf::from("live/ab12cd34")
    );
    assert_eq!(
        results.get("current_path").map(String::as_str),
        Some(ws_root.join("live/ab12cd34").to_str().unwrap())
    );
    assert_eq!(
        std::fs::read(ws_root.join("current/data.txt")).unwrap(),
        b"v1"
    );
    // The snapshot's metadata marker came along with the clone; that is
    // fine; it lives under .wvs and is invisible to writers.
    assert!(ws_root.join("live/ab12cd34/.wvs/snapshot.json").exists());
}

#[tokio::test]
async fn set_current_replay_is_noop_without_agent() {
    let mount = TempDir::new().unwrap();
    let config = test_config(mount.path());
    let ws_root = init_workspace_with_content(&config, "w1").await;
    let agent = spawn_agent(ws_root.clone());

    snapshot_create::run(
        &config,
        "w1",
        &params(&[("snapshot_id", "s1"), ("task_id", "t1")]),
    )
    .await
    .unwrap();

    let args = params(&[
        ("snapshot_id", "s1"),
        ("new_live_id", "ab12cd34"),
        ("task_id", "t2"),
    ]);
    let first = set_current::run(&config, "w1", &args).await.unwrap();
    agent.abort();

    let second = set_current::run(&config, "w1", &args).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn set_current_rejects_missing_snapshot() {
    let mount = TempDir::new().unwrap();
    let config = test_config(mount.path());
    init_workspace_with_content(&config, "w1").await;

    let err = set_current::run(
        &config,
        "w1",
        &params(&[
            ("snapshot_id", "nope"),
            ("new_live_id", "ab12cd34"),
            ("task_id", "t1"),
        ]),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ExecutorError::SnapshotMissing { .. }));
}

#[tokio::test]
async fn missing_params_are_rejected() {
    let mount = TempDir::new().unwrap();
    let config = test_config(mount.path());
    init_workspace_with_content(&config, "w1").await;

    let err = snapshot_create::run(&config, "w1", &HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutorError::MissingParam("snapshot_id")
    ));

    let err = set_current::run(&config, "w1", &params(&[("snapshot_id", "s1")]))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::MissingParam("new_live_id")));
}
