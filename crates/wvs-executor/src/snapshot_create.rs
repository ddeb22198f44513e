// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `snapshot_create`: clone the current tree into an immutable snapshot.

use std::collections::HashMap;

use chrono::Utc;
use tracing::info;

use wvs_core::snapshot::SnapshotMeta;

use crate::clone::clone_tree;
use crate::config::Config;
use crate::error::ExecutorError;
use crate::quiesce::quiesce;

/// Quiesce writers, clone the resolved `current` tree into
/// `snapshots/<snapshot_id>`, and stamp the metadata marker.
///
/// Replay-safe: the marker file is written last, so its presence means a
/// prior attempt completed and the same results are returned.
pub async fn run(
    config: &Config,
    wsid: &str,
    params: &HashMap<String, String>,
) -> Result<HashMap<String, String>, ExecutorError> {
    let snapshot_id = params
        .get("snapshot_id")
        .ok_or(ExecutorError::MissingParam("snapshot_id"))?;
    let task_id = params.get("task_id").map(String::as_str).unwrap_or("");
    let message = params.get("message").filter(|m| !m.is_empty()).cloned();

    let ws_root = config.workspace_root(wsid);
    let dst_path = ws_root.join("snapshots").join(snapshot_id);
    let meta_path = dst_path.join(".wvs").join("snapshot.json");

    if tokio::fs::try_exists(&meta_path).await? {
        info!(wsid, snapshot_id, "snapshot_create: already exists, noop");
        return Ok(results(snapshot_id, &dst_path));
    }

    // Resolve before freezing: a dangling `current` should fail without
    // ever pausing writers.
    let src_path = tokio::fs::canonicalize(ws_root.join("current")).await?;

    let _resume = quiesce(&ws_root, wsid, task_id, config.quiesce_timeout).await?;

    clone_tree(&config.clone_mode, &src_path, &dst_path).await?;

    let meta = SnapshotMeta {
        snapshot_id: snapshot_id.clone(),
        wsid: wsid.to_string(),
        created_at: Utc::now(),
        message,
    };
    tokio::fs::create_dir_all(dst_path.join(".wvs")).await?;
    tokio::fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?).await?;

    info!(wsid, snapshot_id, fs_path = %dst_path.display(), "snapshot_create: completed");
    Ok(results(snapshot_id, &dst_path))
}

fn results(snapshot_id: &str, dst_path: &std::path::Path) -> HashMap<String, String> {
    HashMap::from([
        ("snapshot_id".to_string(), snapshot_id.to_string()),
        (
            "fs_path".to_string(),
            dst_path.to_string_lossy().into_owned(),
        ),
    ])
}
