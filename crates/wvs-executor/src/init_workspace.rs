// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `init_workspace`: materialize the initial directory layout.

use std::collections::HashMap;

use tracing::info;

use crate::config::Config;
use crate::error::ExecutorError;

/// ID of the live directory created at initialization.
const INITIAL_LIVE_ID: &str = "initial";

/// Create `live/initial`, `snapshots/`, `.wvs/`, and the `current`
/// symlink. Replay-safe: if `current` already exists the resolved target
/// is returned untouched.
pub async fn run(
    config: &Config,
    wsid: &str,
    _params: &HashMap<String, String>,
) -> Result<HashMap<String, String>, ExecutorError> {
    let ws_root = config.workspace_root(wsid);
    let current = ws_root.join("current");

    // Replay guard: an existing symlink means a prior attempt finished
    // the switch, even if the task row never heard about it.
    if let Ok(target) = tokio::fs::read_link(&current).await {
        info!(wsid, "init_workspace: already initialized, noop");
        return Ok(results(ws_root.join(target)));
    }

    let live_path = ws_root.join("live").join(INITIAL_LIVE_ID);
    let snapshots_dir = ws_root.join("snapshots");
    let control_dir = ws_root.join(".wvs");
    for dir in [&live_path, &snapshots_dir, &control_dir] {
        tokio::fs::create_dir_all(dir).await?;
    }

    let rel_target = format!("live/{INITIAL_LIVE_ID}");
    tokio::fs::symlink(&rel_target, &current).await?;

    info!(wsid, current = %rel_target, "init_workspace: completed");
    Ok(results(ws_root.join(rel_target)))
}

fn results(current_path: std::path::PathBuf) -> HashMap<String, String> {
    HashMap::from([(
        "current_path".to_string(),
        current_path.to_string_lossy().into_owned(),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(mount: &std::path::Path) -> Config {
        Config {
            mount_path: mount.to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn creates_layout_and_symlink() {
        let mount = tempdir().unwrap();
        let config = test_config(mount.path());

        let results = run(&config, "w1", &HashMap::new()).await.unwrap();

        let ws_root = mount.path().join("w1");
        assert!(ws_root.join("live/initial").is_dir());
        assert!(ws_root.join("snapshots").is_dir());
        assert!(ws_root.join(".wvs").is_dir());
        assert_eq!(
            std::fs::read_link(ws_root.join("current")).unwrap(),
            std::path::PathBuf::from("live/initial")
        );
        assert_eq!(
            results.get("current_path").map(String::as_str),
            Some(ws_root.join("live/initial").to_str().unwrap())
        );
    }

    #[tokio::test]
    async fn replay_returns_existing_target() {
        let mount = tempdir().unwrap();
        let config = test_config(mount.path());

        let first = run(&config, "w1", &HashMap::new()).await.unwrap();
        let second = run(&config, "w1", &HashMap::new()).await.unwrap();
        assert_eq!(first, second);
    }
}
