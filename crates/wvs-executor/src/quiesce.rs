// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Quiesce handshake over `.wvs/control.json`.
//!
//! The executor and the in-workspace agent negotiate write quiescence
//! through a single JSON document:
//!
//! | State | Written by | Meaning |
//! |-------|-----------|---------|
//! | `RUNNING` | agent | writers active (steady state) |
//! | `REQUEST_FREEZE` | executor | drain in-flight writes |
//! | `FROZEN` | agent | no writes outstanding |
//! | `REQUEST_RESUME` | executor | agent may return to RUNNING |
//!
//! The file is rewritten atomically (write-then-rename); the agent's
//! contract tolerates no partial reads. A successful [`quiesce`] returns
//! a [`ResumeGuard`] whose `Drop` writes `REQUEST_RESUME`, so the resume
//! marker lands on success, error, deadline cancellation, and panic
//! unwinding alike.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ExecutorError;

/// Poll interval while waiting for the FROZEN ack.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Control file location relative to the workspace root.
pub const CONTROL_FILE: &str = ".wvs/control.json";

/// States of the quiesce handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuiesceState {
    /// Writers active.
    Running,
    /// Executor asks the agent to drain in-flight writes.
    RequestFreeze,
    /// Agent acks: no writes outstanding.
    Frozen,
    /// Executor is done; agent returns to RUNNING.
    RequestResume,
}

/// The control file document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFile {
    /// Current handshake state.
    pub state: QuiesceState,
    /// When this state was written.
    pub timestamp: DateTime<Utc>,
    /// Task that initiated the handshake, for executor-written states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Pause writers: write `REQUEST_FREEZE` and wait for the `FROZEN` ack.
///
/// On success the returned guard keeps the workspace frozen until
/// dropped. On timeout, `REQUEST_RESUME` is written and
/// [`ExecutorError::QuiesceTimeout`] returned.
pub async fn quiesce(
    ws_root: &Path,
    wsid: &str,
    task_id: &str,
    timeout: Duration,
) -> Result<ResumeGuard, ExecutorError> {
    let control_path = ws_root.join(CONTROL_FILE);
    if let Some(parent) = control_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    write_control(&control_path, QuiesceState::RequestFreeze, task_id)?;
    debug!(path = %control_path.display(), "quiesce: REQUEST_FREEZE written");

    let started = Instant::now();
    let deadline = started + timeout;

    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        if Instant::now() >= deadline {
            let _ = write_control(&control_path, QuiesceState::RequestResume, task_id);
            warn!(wsid, waited = ?started.elapsed(), "quiesce: timed out waiting for FROZEN");
            return Err(ExecutorError::QuiesceTimeout {
                wsid: wsid.to_string(),
                waited: started.elapsed(),
            });
        }

        match read_control_state(&control_path) {
            Ok(QuiesceState::Frozen) => {
                info!(wsid, waited = ?started.elapsed(), "quiesce: FROZEN ack received");
                return Ok(ResumeGuard {
                    control_path,
                    task_id: task_id.to_string(),
                });
            }
            // Not yet acked, or the agent is mid-rewrite; keep polling.
            Ok(_) | Err(_) => continue,
        }
    }
}

/// Writes `REQUEST_RESUME` when dropped.
///
/// The write is synchronous so it also runs during unwinding and when
/// the op future is dropped at an await point by a deadline.
#[derive(Debug)]
#[must_use = "dropping the guard resumes writers"]
pub struct ResumeGuard {
    control_path: PathBuf,
    task_id: String,
}

impl Drop for ResumeGuard {
    fn drop(&mut self) {
        if let Err(e) = write_control(&self.control_path, QuiesceState::RequestResume, &self.task_id)
        {
            warn!(
                path = %self.control_path.display(),
                error = %e,
                "quiesce: failed to write REQUEST_RESUME"
            );
        }
    }
}

/// Atomically rewrite the control file.
fn write_control(path: &Path, state: QuiesceState, task_id: &str) -> Result<(), ExecutorError> {
    let doc = ControlFile {
        state,
        timestamp: Utc::now(),
        task_id: Some(task_id.to_string()),
    };
    let data = serde_json::to_vec(&doc)?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read the current handshake state.
pub fn read_control_state(path: &Path) -> Result<QuiesceState, ExecutorError> {
    let data = std::fs::read(path)?;
    let doc: ControlFile = serde_json::from_slice(&data)?;
    Ok(doc.state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn control_file_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("control.json");

        write_control(&path, QuiesceState::RequestFreeze, "t1").unwrap();
        assert_eq!(
            read_control_state(&path).unwrap(),
            QuiesceState::RequestFreeze
        );

        let doc: ControlFile =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(doc.task_id.as_deref(), Some("t1"));
    }

    #[test]
    fn states_serialize_screaming_snake() {
        let json = serde_json::to_string(&QuiesceState::RequestResume).unwrap();
        assert_eq!(json, "\"REQUEST_RESUME\"");
    }

    #[test]
    fn guard_writes_resume_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("control.json");
        write_control(&path, QuiesceState::Frozen, "t1").unwrap();

        let guard = ResumeGuard {
            control_path: path.clone(),
            task_id: "t1".into(),
        };
        drop(guard);

        assert_eq!(
            read_control_state(&path).unwrap(),
            QuiesceState::RequestResume
        );
    }

    #[tokio::test]
    async fn quiesce_times_out_and_leaves_resume_marker() {
        let dir = tempdir().unwrap();
        let ws_root = dir.path();

        let err = quiesce(ws_root, "w1", "t1", Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::QuiesceTimeout { .. }));
        assert_eq!(err.error_code(), "QUIESCE_TIMEOUT");

        assert_eq!(
            read_control_state(&ws_root.join(CONTROL_FILE)).unwrap(),
            QuiesceState::RequestResume
        );
    }

    #[tokio::test]
    async fn quiesce_succeeds_when_agent_acks() {
        let dir = tempdir().unwrap();
        let ws_root = dir.path().to_path_buf();
        let control_path = ws_root.join(CONTROL_FILE);

        let agent_path = control_path.clone();
        let agent = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if let Ok(QuiesceState::RequestFreeze) = read_control_state(&agent_path) {
                    write_control(&agent_path, QuiesceState::Frozen, "agent").unwrap();
                    break;
                }
            }
        });

        let guard = quiesce(&ws_root, "w1", "t1", Duration::from_secs(5))
            .await
            .unwrap();
        agent.await.unwrap();

        drop(guard);
        assert_eq!(
            read_control_state(&control_path).unwrap(),
            QuiesceState::RequestResume
        );
    }
}
