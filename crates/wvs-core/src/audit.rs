// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Append-only audit event shape.
//!
//! Written by submitters for every externally-initiated action; never read
//! by the worker or executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One externally-initiated action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the action was received.
    pub ts: DateTime<Utc>,
    /// Workspace the action targets, if any.
    pub wsid: Option<String>,
    /// Who initiated the action (opaque to the core).
    pub actor: Value,
    /// Action name, e.g. `workspace.create` or `snapshot.drop`.
    pub action: String,
    /// Task enqueued by the action, if any.
    pub task_id: Option<String>,
    /// Opaque request payload.
    pub payload: Value,
}

impl AuditEvent {
    /// Build an event timestamped now.
    pub fn now(
        wsid: Option<String>,
        actor: Value,
        action: impl Into<String>,
        task_id: Option<String>,
        payload: Value,
    ) -> Self {
        Self {
            ts: Utc::now(),
            wsid,
            actor,
            action: action.into(),
            task_id,
            payload,
        }
    }
}
