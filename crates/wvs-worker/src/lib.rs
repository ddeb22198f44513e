// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WVS Worker - task lease and dispatch loop
//!
//! A worker repeatedly leases one due task from the queue, takes the
//! per-workspace guard, calls the executor, and applies the
//! post-execution state transitions. Multiple worker processes can run
//! against one queue; the skip-locked claim and the advisory lock keep
//! them from stepping on each other.
//!
//! # Loop shape
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ reap cancel-flagged rows  →  sweep expired leases (timed)  │
//! │ dequeue ──none──► idle backoff ──► repeat                  │
//! │    │ task                                                  │
//! │    ├─ cancel_requested? ──► CANCELED                       │
//! │    ├─ guard window (advisory lock; drop pre-flight)        │
//! │    ├─ dispatch to executor (per-task deadline)             │
//! │    └─ onSuccess / failTask transitions                     │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The executor never mutates queue state; every task-row transition
//! happens here. A post-success store failure is logged but does not
//! un-succeed the completed filesystem operation; idempotent replay on
//! the next attempt is the recovery path.

/// Worker configuration.
pub mod config;

/// Executor call seam: remote QUIC client and the trait test mocks use.
pub mod executor_client;

/// The lease/dispatch loop.
pub mod worker;

pub use config::Config;
pub use executor_client::{ExecutorCallError, RemoteExecutor, TaskExecutor};
pub use worker::Worker;
