// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `snapshot_drop`: remove a soft-deleted snapshot's directory tree.

use std::collections::HashMap;

use tracing::info;

use crate::config::Config;
use crate::error::ExecutorError;

/// Recursively remove `snapshots/<snapshot_id>`.
///
/// No quiesce: the snapshot is already invisible to submitters via its
/// `deleted_at` row, and removal is replay-safe: a missing directory is
/// a success.
pub async fn run(
    config: &Config,
    wsid: &str,
    params: &HashMap<String, String>,
) -> Result<HashMap<String, String>, ExecutorError> {
    let snapshot_id = params
        .get("snapshot_id")
        .ok_or(ExecutorError::MissingParam("snapshot_id"))?;

    let target = config
        .workspace_root(wsid)
        .join("snapshots")
        .join(snapshot_id);

    if !tokio::fs::try_exists(&target).await? {
        info!(wsid, snapshot_id, "snapshot_drop: directory already removed, noop");
        return Ok(HashMap::new());
    }

    tokio::fs::remove_dir_all(&target).await?;

    info!(wsid, snapshot_id, path = %target.display(), "snapshot_drop: directory removed");
    Ok(HashMap::new())
}
