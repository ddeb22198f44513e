// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the queue layer.

use wvs_core::ErrorCode;

/// Result type using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A referenced row does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Row kind: "workspace", "snapshot", or "task".
        kind: &'static str,
        /// Primary key that missed.
        id: String,
    },

    /// A row with this identity already exists.
    #[error("{kind} '{id}' already exists")]
    AlreadyExists {
        /// Row kind.
        kind: &'static str,
        /// Conflicting identity.
        id: String,
    },

    /// An idempotency key was reused with a different request hash.
    #[error("idempotency key '{key}' reused with a different request for {wsid}/{op}")]
    IdempotencyMismatch {
        /// Workspace the submission targets.
        wsid: String,
        /// Operation name.
        op: String,
        /// The reused key.
        key: String,
    },

    /// The row is not in a state that permits the transition.
    #[error("{kind} '{id}' is {actual}, operation requires {expected}")]
    InvalidState {
        /// Row kind.
        kind: &'static str,
        /// Primary key.
        id: String,
        /// State the operation requires.
        expected: &'static str,
        /// State the row is actually in.
        actual: String,
    },

    /// The workspace has active tasks blocking the operation.
    #[error("workspace '{wsid}' has {active} active task(s)")]
    WorkspaceBusy {
        /// Workspace that is busy.
        wsid: String,
        /// Number of non-terminal tasks.
        active: i64,
    },

    /// The snapshot is current or referenced by a non-terminal task.
    #[error("snapshot '{snapshot_id}' is in use")]
    SnapshotInUse {
        /// The contested snapshot.
        snapshot_id: String,
    },

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored JSON could not be parsed.
    #[error("stored JSON invalid: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Map to the wire-visible error vocabulary.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::AlreadyExists { .. } => ErrorCode::ConflictExists,
            Self::IdempotencyMismatch { .. } => ErrorCode::ConflictIdempotentMismatch,
            Self::InvalidState { .. } => ErrorCode::PreconditionFailed,
            Self::WorkspaceBusy { .. } => ErrorCode::ConflictLocked,
            Self::SnapshotInUse { .. } => ErrorCode::ConflictSnapshotInUse,
            Self::Database(_) | Self::Json(_) => ErrorCode::Internal,
        }
    }
}
