// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire-visible error codes.
//!
//! These are the codes submitters and clients see; every surface maps its
//! failures onto this vocabulary before leaving the process.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable error codes shared by the submission surface and the queue layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed or incomplete submission.
    BadRequest,
    /// Referenced workspace, snapshot, or task does not exist.
    NotFound,
    /// The workspace has active tasks blocking the operation.
    ConflictLocked,
    /// An idempotency key was reused with a different request body.
    ConflictIdempotentMismatch,
    /// The resource already exists.
    ConflictExists,
    /// The snapshot is current or referenced by a pending task.
    ConflictSnapshotInUse,
    /// The workspace is disabled.
    Gone,
    /// The resource is not in the state the operation requires.
    PreconditionFailed,
    /// Unexpected internal failure.
    Internal,
    /// The executor reported a failure.
    ExecutorError,
    /// The executor call exceeded its deadline.
    ExecutorTimeout,
}

impl ErrorCode {
    /// The stable code string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "WVS_BAD_REQUEST",
            Self::NotFound => "WVS_NOT_FOUND",
            Self::ConflictLocked => "WVS_CONFLICT_LOCKED",
            Self::ConflictIdempotentMismatch => "WVS_CONFLICT_IDEMPOTENT_MISMATCH",
            Self::ConflictExists => "WVS_CONFLICT_EXISTS",
            Self::ConflictSnapshotInUse => "WVS_CONFLICT_SNAPSHOT_IN_USE",
            Self::Gone => "WVS_GONE",
            Self::PreconditionFailed => "WVS_PRECONDITION_FAILED",
            Self::Internal => "WVS_INTERNAL",
            Self::ExecutorError => "WVS_EXECUTOR_ERROR",
            Self::ExecutorTimeout => "WVS_EXECUTOR_TIMEOUT",
        }
    }

    /// HTTP status a submission surface should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::ConflictLocked
            | Self::ConflictIdempotentMismatch
            | Self::ConflictExists
            | Self::ConflictSnapshotInUse => 409,
            Self::Gone => 410,
            Self::PreconditionFailed => 412,
            Self::Internal => 500,
            Self::ExecutorError => 502,
            Self::ExecutorTimeout => 504,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error with a wire-visible code and a human-readable message.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct AppError {
    /// Stable code for programmatic handling.
    pub code: ErrorCode,
    /// Free-form description.
    pub message: String,
}

impl AppError {
    /// Create an error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_mapping() {
        assert_eq!(ErrorCode::BadRequest.http_status(), 400);
        assert_eq!(ErrorCode::NotFound.http_status(), 404);
        assert_eq!(ErrorCode::ConflictIdempotentMismatch.http_status(), 409);
        assert_eq!(ErrorCode::ConflictSnapshotInUse.http_status(), 409);
        assert_eq!(ErrorCode::Gone.http_status(), 410);
        assert_eq!(ErrorCode::PreconditionFailed.http_status(), 412);
        assert_eq!(ErrorCode::Internal.http_status(), 500);
        assert_eq!(ErrorCode::ExecutorError.http_status(), 502);
        assert_eq!(ErrorCode::ExecutorTimeout.http_status(), 504);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = AppError::new(ErrorCode::ConflictIdempotentMismatch, "key reused");
        assert_eq!(
            err.to_string(),
            "WVS_CONFLICT_IDEMPOTENT_MISMATCH: key reused"
        );
    }
}
