// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Snapshot metadata marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contents of `snapshots/<id>/.wvs/snapshot.json`.
///
/// The executor writes this marker after a successful clone; its presence
/// is the idempotent-replay witness for `snapshot_create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Snapshot this directory materializes.
    pub snapshot_id: String,
    /// Owning workspace.
    pub wsid: String,
    /// When the clone completed.
    pub created_at: DateTime<Utc>,
    /// Optional operator-supplied description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_round_trips() {
        let meta = SnapshotMeta {
            snapshot_id: "s1".into(),
            wsid: "w1".into(),
            created_at: Utc::now(),
            message: Some("before upgrade".into()),
        };
        let json = serde_json::to_string(&meta).unwrap();
        let back: SnapshotMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn message_is_omitted_when_absent() {
        let meta = SnapshotMeta {
            snapshot_id: "s1".into(),
            wsid: "w1".into(),
            created_at: Utc::now(),
            message: None,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(!json.contains("message"));
    }
}
