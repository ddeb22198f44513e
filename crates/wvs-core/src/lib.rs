// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WVS Core - Domain types for the workspace versioning service
//!
//! This crate holds the vocabulary shared by the queue layer, the worker,
//! and the external submission surface: the task and workspace state
//! machines, ID generation, request-hash canonicalization, retry backoff,
//! and the wire-visible error codes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     External Submitters                          │
//! │                  (HTTP API, wvsctl - out of tree)                │
//! └──────────────────────────────────────────────────────────────────┘
//!                │ submit (idempotency key + request hash)
//!                ▼
//! ┌──────────────────────┐      dequeue/complete     ┌──────────────┐
//! │      wvs-store       │◄──────────────────────────│  wvs-worker  │
//! │  (queue + locks)     │                           │              │
//! └──────────────────────┘                           └──────┬───────┘
//!                                                           │ ExecuteTask
//!                                                           ▼
//!                                                    ┌──────────────┐
//!                                                    │ wvs-executor │
//!                                                    │ (shared FS)  │
//!                                                    └──────────────┘
//! ```
//!
//! # Task state machine
//!
//! ```text
//!            ┌─────────┐
//!     ┌──────│ PENDING │──────┐
//!     │      └────┬────┘      │
//! cancel    lease │           │
//!     │           ▼           │
//!     │      ┌─────────┐      │
//!     │ ┌────│ RUNNING │────┐ │
//!     │ │    └────┬────┘    │ │
//!     │ │ ok      │ err     │ │ cancel ack
//!     │ ▼         ▼         ▼ ▼
//! ┌───────────┐ ┌────────┐ ┌──────────┐
//! │ SUCCEEDED │ │ FAILED │ │ CANCELED │
//! └───────────┘ └───┬────┘ └──────────┘
//!          retry │  │ exhausted
//!        (lease) │  ▼
//!                │ ┌──────┐
//!                └─│ DEAD │
//!                  └──────┘
//! ```
//!
//! SUCCEEDED, CANCELED, and DEAD are terminal. The retry edge leases a
//! retryable FAILED row straight back to RUNNING; logically it passes
//! through PENDING.

#![deny(missing_docs)]

/// Append-only audit event shape written by submitters.
pub mod audit;

/// Full-jitter exponential retry backoff.
pub mod backoff;

/// Wire-visible error codes and their HTTP mapping.
pub mod errors;

/// Time-ordered and short random ID generation.
pub mod id;

/// Request-hash canonicalization for idempotent submission.
pub mod idempotency;

/// Snapshot row shape.
pub mod snapshot;

/// Task operations and the task status state machine.
pub mod task;

/// Workspace state machine.
pub mod workspace;

pub use errors::{AppError, ErrorCode};
pub use task::{TaskOp, TaskStatus};
pub use workspace::WorkspaceState;
