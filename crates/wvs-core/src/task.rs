// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task operations and the task status state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Operations a task row can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOp {
    /// Materialize the initial directory layout for a workspace.
    InitWorkspace,
    /// Clone the current tree into an immutable snapshot.
    SnapshotCreate,
    /// Remove a soft-deleted snapshot's directory tree.
    SnapshotDrop,
    /// Switch `current` to a fresh clone of a chosen snapshot.
    SetCurrent,
}

impl TaskOp {
    /// The string stored in the `op` column and used in idempotency keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitWorkspace => "init_workspace",
            Self::SnapshotCreate => "snapshot_create",
            Self::SnapshotDrop => "snapshot_drop",
            Self::SetCurrent => "set_current",
        }
    }
}

impl fmt::Display for TaskOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskOp {
    type Err = UnknownOp;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init_workspace" => Ok(Self::InitWorkspace),
            "snapshot_create" => Ok(Self::SnapshotCreate),
            "snapshot_drop" => Ok(Self::SnapshotDrop),
            "set_current" => Ok(Self::SetCurrent),
            _ => Err(UnknownOp(s.to_string())),
        }
    }
}

/// Error returned when parsing an unrecognized op string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task op: {0}")]
pub struct UnknownOp(pub String);

/// Task lifecycle status.
///
/// Transitions are total: [`TaskStatus::can_transition`] enumerates every
/// legal edge, and the store's UPDATE statements guard on the source
/// status so no other edge can be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Durably submitted, waiting for a worker lease.
    Pending,
    /// Leased by a worker; exactly one attempt in flight.
    Running,
    /// Terminal: the attempt completed and post-execution updates applied.
    Succeeded,
    /// The attempt failed; rescheduled unless attempts are exhausted.
    Failed,
    /// Terminal: canceled before or between attempts.
    Canceled,
    /// Terminal: failed with no attempts remaining.
    Dead,
}

impl TaskStatus {
    /// The string stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::Dead => "DEAD",
        }
    }

    /// True for statuses no transition leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Canceled | Self::Dead)
    }

    /// Whether moving to `to` is a legal edge of the lifecycle.
    ///
    /// The FAILED → RUNNING edge is the retry lease: a retryable FAILED
    /// row is claimed directly, collapsing the logical FAILED → PENDING →
    /// RUNNING path into one atomic claim.
    pub fn can_transition(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Canceled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Canceled)
                | (Failed, Running)
                | (Failed, Pending)
                | (Failed, Dead)
                | (Failed, Canceled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            "CANCELED" => Ok(Self::Canceled),
            "DEAD" => Ok(Self::Dead),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// Error returned when parsing an unrecognized status string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown task status: {0}")]
pub struct UnknownStatus(pub String);
