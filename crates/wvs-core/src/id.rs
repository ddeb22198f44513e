// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ID generation.
//!
//! Task and snapshot IDs are UUID v7 so that lexicographic order tracks
//! creation time, which the dequeue ordering and cursor pagination rely
//! on. Live-directory IDs only need to be unique within one workspace's
//! `live/` directory and stay short for readable paths.

use uuid::Uuid;

/// Generate a time-ordered task ID.
pub fn new_task_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generate a time-ordered snapshot ID.
pub fn new_snapshot_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generate an 8-character live-directory suffix.
pub fn new_live_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
