// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workspace state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Workspace lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceState {
    /// Row created by the submitter; init task not yet succeeded.
    Provisioning,
    /// Initialized and serving a `current` tree.
    Active,
    /// The init task exhausted its retries.
    InitFailed,
    /// Explicitly disabled; no transition leaves this state.
    Disabled,
}

impl WorkspaceState {
    /// The string stored in the `state` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "PROVISIONING",
            Self::Active => "ACTIVE",
            Self::InitFailed => "INIT_FAILED",
            Self::Disabled => "DISABLED",
        }
    }

    /// Whether moving to `to` is a legal edge.
    ///
    /// DISABLED is absorbing. INIT_FAILED → PROVISIONING is the retry-init
    /// path.
    pub fn can_transition(&self, to: WorkspaceState) -> bool {
        use WorkspaceState::*;
        matches!(
            (self, to),
            (Provisioning, Active)
                | (Provisioning, InitFailed)
                | (Provisioning, Disabled)
                | (Active, Disabled)
                | (InitFailed, Provisioning)
                | (InitFailed, Disabled)
        )
    }
}

impl fmt::Display for WorkspaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkspaceState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROVISIONING" => Ok(Self::Provisioning),
            "ACTIVE" => Ok(Self::Active),
            "INIT_FAILED" => Ok(Self::InitFailed),
            "DISABLED" => Ok(Self::Disabled),
            _ => Err(UnknownState(s.to_string())),
        }
    }
}

/// Error returned when parsing an unrecognized workspace state string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown workspace state: {0}")]
pub struct UnknownState(pub String);
