// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WVS Executor - Stateless filesystem operator
//!
//! The executor serves `ExecuteTask` RPCs from workers and performs the
//! filesystem side of each operation on the shared mount. It holds no
//! state between calls; every op starts with a stat-then-act replay
//! guard, so a re-dequeued task can safely run the same op again.
//!
//! # Directory layout under `<mount>/<wsid>/`
//!
//! ```text
//! live/<live_id>/          mutable working trees (one per switch)
//! snapshots/<snapshot_id>/ immutable clones, each with .wvs/snapshot.json
//! .wvs/control.json        quiesce control file
//! current                  relative symlink into live/ or snapshots/
//! ```
//!
//! # Op summary
//!
//! | Op | Replay witness | Quiesce |
//! |----|----------------|---------|
//! | `init_workspace` | `current` symlink exists | no |
//! | `snapshot_create` | `snapshots/<id>/.wvs/snapshot.json` exists | yes |
//! | `snapshot_drop` | `snapshots/<id>` missing | no |
//! | `set_current` | `current` already points at `live/<new_live_id>` | yes |
//!
//! Serialization between concurrent mutations is the caller's job; the
//! executor relies on the queue's RUNNING status and the per-workspace
//! advisory lock upstream, plus the single-writer control-file handshake
//! during clones.

/// Out-of-process (or in-process) tree clone.
pub mod clone;

/// Environment configuration.
pub mod config;

/// Executor error type and wire code mapping.
pub mod error;

/// `init_workspace` op.
pub mod init_workspace;

/// Quiesce handshake over the control file.
pub mod quiesce;

/// QUIC server and op dispatch.
pub mod server;

/// `set_current` op.
pub mod set_current;

/// `snapshot_create` op.
pub mod snapshot_create;

/// `snapshot_drop` op.
pub mod snapshot_drop;

/// Atomic `current` symlink switch.
pub mod switch;

pub use config::Config;
pub use error::ExecutorError;
