// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Atomic `current` symlink switch.

use std::path::Path;
use std::time::Instant;

use tracing::info;

use crate::error::ExecutorError;

/// Atomically repoint `<ws_root>/current` at `new_target` (relative).
///
/// A temporary symlink is created and renamed over `current`; rename(2)
/// is atomic on POSIX, so a concurrent reader observes either the old or
/// the new target, never a missing link.
pub fn switch_current(ws_root: &Path, new_target: &str) -> Result<(), ExecutorError> {
    let start = Instant::now();
    let current = ws_root.join("current");
    let tmp = ws_root.join("current.tmp");

    // A stale tmp link from a crashed switch may still be around.
    let _ = std::fs::remove_file(&tmp);
    std::os::unix::fs::symlink(new_target, &tmp)?;

    if let Err(e) = std::fs::rename(&tmp, &current) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }

    info!(target = new_target, duration = ?start.elapsed(), "switch: current updated");
    Ok(())
}
