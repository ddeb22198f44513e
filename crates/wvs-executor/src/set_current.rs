// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `set_current`: switch `current` to a fresh clone of a snapshot.

use std::collections::HashMap;

use tracing::info;

use crate::clone::clone_tree;
use crate::config::Config;
use crate::error::ExecutorError;
use crate::quiesce::quiesce;
use crate::switch::switch_current;

/// Clone `snapshots/<snapshot_id>` into `live/<new_live_id>` and
/// atomically repoint `current` at it.
///
/// Replay-safe: a `current` already pointing at `live/<new_live_id>`
/// means a prior attempt finished the switch.
pub async fn run(
    config: &Config,
    wsid: &str,
    params: &HashMap<String, String>,
) -> Result<HashMap<String, String>, ExecutorError> {
    let snapshot_id = params
        .get("snapshot_id")
        .ok_or(ExecutorError::MissingParam("snapshot_id"))?;
    let new_live_id = params
        .get("new_live_id")
        .ok_or(ExecutorError::MissingParam("new_live_id"))?;
    let task_id = params.get("task_id").map(String::as_str).unwrap_or("");

    let ws_root = config.workspace_root(wsid);
    let src_path = ws_root.join("snapshots").join(snapshot_id);
    let dst_path = ws_root.join("live").join(new_live_id);
    let rel_target = format!("live/{new_live_id}");

    if let Ok(target) = tokio::fs::read_link(ws_root.join("current")).await
        && target == std::path::Path::new(&rel_target)
    {
        info!(wsid, new_live_id, "set_current: already pointing to target, noop");
        return Ok(results(ws_root.join(rel_target)));
    }

    if !tokio::fs::try_exists(&src_path).await? {
        return Err(ExecutorError::SnapshotMissing { path: src_path });
    }

    let _resume = quiesce(&ws_root, wsid, task_id, config.quiesce_timeout).await?;

    clone_tree(&config.clone_mode, &src_path, &dst_path).await?;
    switch_current(&ws_root, &rel_target)?;

    info!(wsid, snapshot_id, new_live_id, "set_current: completed");
    Ok(results(ws_root.join(rel_target)))
}

fn results(current_path: std::path::PathBuf) -> HashMap<String, String> {
    HashMap::from([(
        "current_path".to_string(),
        current_path.to_string_lossy().into_owned(),
    )])
}
