// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WVS Store - Durable task queue and workspace state
//!
//! This crate is the queue & idempotency layer: durable task rows with
//! exactly-once claim semantics, idempotent submission, per-workspace
//! advisory locking, and the workspace/snapshot/audit tables, all behind
//! the [`Store`] trait.
//!
//! # Backends
//!
//! | Backend | Claim | Advisory lock | Intended use |
//! |---------|-------|---------------|--------------|
//! | [`PostgresStore`] | `FOR UPDATE SKIP LOCKED` | `pg_advisory_xact_lock` | production, multi-process |
//! | [`SqliteStore`] | single-writer `UPDATE … RETURNING` | in-process named locks | development, tests |
//!
//! The SQLite backend has full feature parity except that its workspace
//! guard only excludes tasks within one process; it must not be shared by
//! multiple worker processes.
//!
//! # Claim semantics
//!
//! [`Store::dequeue_task`] atomically selects one due row (PENDING, or
//! FAILED with attempts remaining), skips rows another worker holds, and
//! transitions it to RUNNING with `attempt` incremented and `started_at`
//! stamped. Completion, failure, and dead-lettering all guard on the
//! source status in SQL, so the task lifecycle can only move along its
//! legal edges no matter how many workers race.

#![deny(missing_docs)]

/// Error type for store operations.
pub mod error;

/// Embedded migrations for both backends.
pub mod migrations;

/// PostgreSQL backend.
pub mod postgres;

/// Record structs mirroring the table rows.
pub mod records;

/// SQLite backend.
pub mod sqlite;

/// The `Store` trait and submission types.
pub mod store;

pub use error::StoreError;
pub use postgres::PostgresStore;
pub use records::{AuditRecord, SnapshotRecord, TaskRecord, WorkspaceRecord};
pub use sqlite::SqliteStore;
pub use store::{Store, SubmitOutcome, SubmitTask, TaskFilter};
