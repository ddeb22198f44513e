// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tree clone primitive.
//!
//! Production deployments clone through the filesystem's server-side
//! primitive (`<cmd> clone <src> <dst>`, O(1) in metadata, content
//! shared). The `copy` mode is an in-process recursive copy for local
//! development and tests where no clone-capable filesystem is mounted.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::ExecutorError;

/// How trees are cloned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneMode {
    /// Shell out: `<command> clone <src> <dst>`.
    Command(String),
    /// Recursive in-process copy (dev/test).
    Copy,
}

impl Default for CloneMode {
    fn default() -> Self {
        Self::Command("juicefs".to_string())
    }
}

impl CloneMode {
    /// Parse the `CLONE_MODE` value: `copy`, or a command name.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("copy") {
            Self::Copy
        } else {
            Self::Command(value.to_string())
        }
    }
}

/// Clone `src` to `dst`.
///
/// `dst` must not exist; the clone creates it. The parent of `dst` is
/// created if needed.
pub async fn clone_tree(mode: &CloneMode, src: &Path, dst: &Path) -> Result<(), ExecutorError> {
    let start = Instant::now();
    debug!(src = %src.display(), dst = %dst.display(), "clone: starting");

    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match mode {
        CloneMode::Command(command) => {
            let output = tokio::process::Command::new(command)
                .arg("clone")
                .arg(src)
                .arg(dst)
                .output()
                .await
                .map_err(|e| ExecutorError::CloneFailed {
                    detail: format!("spawn {command}: {e}"),
                })?;

            if !output.status.success() {
                let mut detail = format!("{command} clone exited with {}", output.status);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    detail.push_str(": ");
                    detail.push_str(stderr.trim());
                }
                return Err(ExecutorError::CloneFailed { detail });
            }
        }
        CloneMode::Copy => {
            let src = src.to_path_buf();
            let dst = dst.to_path_buf();
            tokio::task::spawn_blocking(move || copy_recursive(&src, &dst))
                .await
                .map_err(|e| ExecutorError::CloneFailed {
                    detail: format!("copy task panicked: {e}"),
                })??;
        }
    }

    info!(
        src = %src.display(),
        dst = %dst.display(),
        duration = ?start.elapsed(),
        "clone: completed"
    );
    Ok(())
}

/// Copy a directory tree, preserving symbolic links.
fn copy_recursive(src: &Path, dst: &Path) -> Result<(), ExecutorError> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            copy_recursive(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}
