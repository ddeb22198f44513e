// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed store.
//!
//! The production backend. Dequeue claims rows with `FOR UPDATE SKIP
//! LOCKED`; the per-workspace guard is `pg_advisory_xact_lock` keyed by a
//! hash of the wsid, released automatically when the guard transaction
//! ends. All scheduling comparisons use the database clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use wvs_core::{TaskOp, TaskStatus, WorkspaceState, audit::AuditEvent, id};

use crate::error::StoreError;
use crate::records::{SnapshotRecord, TaskRecord, WorkspaceRecord};
use crate::store::{Store, SubmitOutcome, SubmitTask, TaskFilter};

const TASK_COLUMNS: &str = "task_id, wsid, op, status, idempotency_key, request_hash, \
     params, result, error, attempt, max_attempts, next_run_at, \
     timeout_seconds, cancel_requested, created_at, started_at, ended_at";

const WORKSPACE_COLUMNS: &str =
    "wsid, root_path, owner, state, current_snapshot_id, current_path, created_at, updated_at";

const SNAPSHOT_COLUMNS: &str = "snapshot_id, wsid, fs_path, message, created_at, deleted_at";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the given DSN and verify the connection.
    ///
    /// Does not run migrations; call [`crate::migrations::run_postgres`]
    /// separately.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(20).connect(dsn).await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn submit_task(&self, submit: &SubmitTask) -> Result<SubmitOutcome, StoreError> {
        let task_id = id::new_task_id();
        let params = serde_json::to_string(&submit.params)?;

        let inserted = sqlx::query_as::<_, TaskRecord>(&format!(
            r#"
            INSERT INTO tasks (task_id, wsid, op, status, idempotency_key, request_hash,
                               params, attempt, max_attempts, next_run_at, timeout_seconds,
                               cancel_requested, created_at)
            VALUES ($1, $2, $3, 'PENDING', $4, $5, $6, 0, $7, now(), $8, false, now())
            ON CONFLICT (wsid, op, idempotency_key) DO NOTHING
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(&task_id)
        .bind(&submit.wsid)
        .bind(submit.op.as_str())
        .bind(&submit.idempotency_key)
        .bind(&submit.request_hash)
        .bind(&params)
        .bind(submit.max_attempts)
        .bind(submit.timeout_seconds)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(task) = inserted {
            return Ok(SubmitOutcome {
                task,
                deduplicated: false,
            });
        }

        // The constraint fired: a row with this identity already exists.
        let existing = self
            .get_task_by_idempotency_key(&submit.wsid, submit.op, &submit.idempotency_key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "task",
                id: submit.idempotency_key.clone(),
            })?;

        if existing.request_hash != submit.request_hash {
            return Err(StoreError::IdempotencyMismatch {
                wsid: submit.wsid.clone(),
                op: submit.op.as_str().to_string(),
                key: submit.idempotency_key.clone(),
            });
        }

        Ok(SubmitOutcome {
            task: existing,
            deduplicated: true,
        })
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let task = sqlx::query_as::<_, TaskRecord>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    async fn get_task_by_idempotency_key(
        &self,
        wsid: &str,
        op: TaskOp,
        idempotency_key: &str,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let task = sqlx::query_as::<_, TaskRecord>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE wsid = $1 AND op = $2 AND idempotency_key = $3"
        ))
        .bind(wsid)
        .bind(op.as_str())
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        limit: i64,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let limit = limit.clamp(1, 100);
        let tasks = sqlx::query_as::<_, TaskRecord>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE ($1::TEXT IS NULL OR wsid = $1)
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::TEXT IS NULL OR op = $3)
              AND ($4::TIMESTAMPTZ IS NULL OR created_at < $4)
            ORDER BY created_at DESC
            LIMIT $5
            "#
        ))
        .bind(filter.wsid.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.op.map(|o| o.as_str()))
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    async fn dequeue_task(&self) -> Result<Option<TaskRecord>, StoreError> {
        let task = sqlx::query_as::<_, TaskRecord>(&format!(
            r#"
            WITH next AS (
                SELECT task_id FROM tasks
                WHERE (status = 'PENDING'
                       OR (status = 'FAILED' AND attempt < max_attempts))
                  AND next_run_at <= now()
                  AND cancel_requested = false
                ORDER BY next_run_at, created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE tasks AS t
            SET status = 'RUNNING', started_at = now(), attempt = t.attempt + 1
            FROM next
            WHERE t.task_id = next.task_id
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    async fn complete_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        debug_assert!(matches!(
            status,
            TaskStatus::Succeeded | TaskStatus::Canceled
        ));
        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $2, ended_at = now(), result = $3, error = $4
            WHERE task_id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(result)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.task_transition_error(task_id, "RUNNING").await);
        }
        Ok(())
    }

    async fn fail_task(
        &self,
        task_id: &str,
        error: &str,
        retry_delay_secs: f64,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'FAILED', ended_at = now(), error = $2,
                next_run_at = now() + ($3::float8 * interval '1 second')
            WHERE task_id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(task_id)
        .bind(error)
        .bind(retry_delay_secs)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.task_transition_error(task_id, "RUNNING").await);
        }
        Ok(())
    }

    async fn mark_task_dead(&self, task_id: &str, error: &str) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'DEAD', ended_at = now(), error = $2
            WHERE task_id = $1 AND status IN ('RUNNING', 'FAILED')
            "#,
        )
        .bind(task_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.task_transition_error(task_id, "RUNNING or FAILED").await);
        }
        Ok(())
    }

    async fn cancel_task(&self, task_id: &str) -> Result<TaskRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let task = sqlx::query_as::<_, TaskRecord>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = $1 FOR UPDATE"
        ))
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            kind: "task",
            id: task_id.to_string(),
        })?;

        if task.is_terminal() {
            tx.commit().await?;
            return Ok(task);
        }

        let updated = if task.status == "PENDING" {
            sqlx::query_as::<_, TaskRecord>(&format!(
                r#"
                UPDATE tasks
                SET status = 'CANCELED', ended_at = now(),
                    error = '{{"error":"canceled"}}'
                WHERE task_id = $1
                RETURNING {TASK_COLUMNS}
                "#
            ))
            .bind(task_id)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_as::<_, TaskRecord>(&format!(
                "UPDATE tasks SET cancel_requested = true \
                 WHERE task_id = $1 RETURNING {TASK_COLUMNS}"
            ))
            .bind(task_id)
            .fetch_one(&mut *tx)
            .await?
        };

        tx.commit().await?;
        Ok(updated)
    }

    async fn reap_cancel_requested(&self) -> Result<u64, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'CANCELED', ended_at = now(),
                error = '{"error":"canceled"}'
            WHERE cancel_requested = true AND status IN ('PENDING', 'FAILED')
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected())
    }

    async fn sweep_expired_leases(&self, grace_secs: i64) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let refailed = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'FAILED', ended_at = now(),
                error = '{"error":"lease expired"}', next_run_at = now()
            WHERE status = 'RUNNING'
              AND started_at + ((timeout_seconds + $1) * interval '1 second') < now()
              AND attempt < max_attempts
            "#,
        )
        .bind(grace_secs)
        .execute(&mut *tx)
        .await?;

        let deadened = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'DEAD', ended_at = now(),
                error = '{"error":"lease expired"}'
            WHERE status = 'RUNNING'
              AND started_at + ((timeout_seconds + $1) * interval '1 second') < now()
              AND attempt >= max_attempts
            "#,
        )
        .bind(grace_secs)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(refailed.rows_affected() + deadened.rows_affected())
    }

    async fn queue_depth(&self) -> Result<i64, StoreError> {
        let (depth,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM tasks
            WHERE (status = 'PENDING'
                   OR (status = 'FAILED' AND attempt < max_attempts))
              AND next_run_at <= now()
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(depth)
    }

    async fn acquire_workspace_guard(&self, wsid: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::bigint)")
            .bind(wsid)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn prepare_snapshot_drop(
        &self,
        wsid: &str,
        snapshot_id: &str,
        task_id: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::bigint)")
            .bind(wsid)
            .execute(&mut *tx)
            .await?;

        let current: Option<(Option<String>,)> =
            sqlx::query_as("SELECT current_snapshot_id FROM workspaces WHERE wsid = $1")
                .bind(wsid)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some((Some(current_id),)) = current
            && current_id == snapshot_id
        {
            return Err(StoreError::SnapshotInUse {
                snapshot_id: snapshot_id.to_string(),
            });
        }

        let (referenced,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM tasks
                WHERE wsid = $1
                  AND task_id <> $2
                  AND status NOT IN ('SUCCEEDED', 'CANCELED', 'DEAD')
                  AND params::jsonb ->> 'snapshot_id' = $3
            )
            "#,
        )
        .bind(wsid)
        .bind(task_id)
        .bind(snapshot_id)
        .fetch_one(&mut *tx)
        .await?;
        if referenced {
            return Err(StoreError::SnapshotInUse {
                snapshot_id: snapshot_id.to_string(),
            });
        }

        sqlx::query(
            "UPDATE snapshots SET deleted_at = now() \
             WHERE snapshot_id = $1 AND deleted_at IS NULL",
        )
        .bind(snapshot_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn create_workspace(
        &self,
        wsid: &str,
        root_path: &str,
        owner: &str,
        current_path: &str,
    ) -> Result<WorkspaceRecord, StoreError> {
        let workspace = sqlx::query_as::<_, WorkspaceRecord>(&format!(
            r#"
            INSERT INTO workspaces (wsid, root_path, owner, state, current_path,
                                    created_at, updated_at)
            VALUES ($1, $2, $3, 'PROVISIONING', $4, now(), now())
            RETURNING {WORKSPACE_COLUMNS}
            "#
        ))
        .bind(wsid)
        .bind(root_path)
        .bind(owner)
        .bind(current_path)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "workspace", wsid))?;
        Ok(workspace)
    }

    async fn get_workspace(&self, wsid: &str) -> Result<Option<WorkspaceRecord>, StoreError> {
        let workspace = sqlx::query_as::<_, WorkspaceRecord>(&format!(
            "SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE wsid = $1"
        ))
        .bind(wsid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(workspace)
    }

    async fn list_workspaces(
        &self,
        limit: i64,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<WorkspaceRecord>, StoreError> {
        let limit = limit.clamp(1, 100);
        let workspaces = sqlx::query_as::<_, WorkspaceRecord>(&format!(
            r#"
            SELECT {WORKSPACE_COLUMNS} FROM workspaces
            WHERE ($1::TIMESTAMPTZ IS NULL OR created_at < $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(workspaces)
    }

    async fn update_workspace_state(
        &self,
        wsid: &str,
        state: WorkspaceState,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE workspaces SET state = $2, updated_at = now() \
             WHERE wsid = $1 AND state <> 'DISABLED'",
        )
        .bind(wsid)
        .bind(state.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.workspace_update_error(wsid).await);
        }
        Ok(())
    }

    async fn update_workspace_current(
        &self,
        wsid: &str,
        snapshot_id: Option<&str>,
        current_path: &str,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE workspaces \
             SET current_snapshot_id = $2, current_path = $3, updated_at = now() \
             WHERE wsid = $1 AND state <> 'DISABLED'",
        )
        .bind(wsid)
        .bind(snapshot_id)
        .bind(current_path)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.workspace_update_error(wsid).await);
        }
        Ok(())
    }

    async fn disable_workspace(&self, wsid: &str) -> Result<WorkspaceRecord, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::bigint)")
            .bind(wsid)
            .execute(&mut *tx)
            .await?;

        let workspace = sqlx::query_as::<_, WorkspaceRecord>(&format!(
            "SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE wsid = $1 FOR UPDATE"
        ))
        .bind(wsid)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            kind: "workspace",
            id: wsid.to_string(),
        })?;

        if workspace.state == "DISABLED" {
            tx.commit().await?;
            return Ok(workspace);
        }

        let (active,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM tasks
            WHERE wsid = $1
              AND (status IN ('PENDING', 'RUNNING')
                   OR (status = 'FAILED' AND attempt < max_attempts))
            "#,
        )
        .bind(wsid)
        .fetch_one(&mut *tx)
        .await?;
        if active > 0 {
            return Err(StoreError::WorkspaceBusy {
                wsid: wsid.to_string(),
                active,
            });
        }

        let disabled = sqlx::query_as::<_, WorkspaceRecord>(&format!(
            "UPDATE workspaces SET state = 'DISABLED', updated_at = now() \
             WHERE wsid = $1 RETURNING {WORKSPACE_COLUMNS}"
        ))
        .bind(wsid)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(disabled)
    }

    async fn count_active_tasks(&self, wsid: &str) -> Result<i64, StoreError> {
        let (active,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM tasks
            WHERE wsid = $1
              AND (status IN ('PENDING', 'RUNNING')
                   OR (status = 'FAILED' AND attempt < max_attempts))
            "#,
        )
        .bind(wsid)
        .fetch_one(&self.pool)
        .await?;
        Ok(active)
    }

    async fn create_snapshot(
        &self,
        snapshot_id: &str,
        wsid: &str,
        fs_path: &str,
        message: Option<&str>,
    ) -> Result<SnapshotRecord, StoreError> {
        let snapshot = sqlx::query_as::<_, SnapshotRecord>(&format!(
            r#"
            INSERT INTO snapshots (snapshot_id, wsid, fs_path, message, created_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (snapshot_id) DO UPDATE SET fs_path = EXCLUDED.fs_path
            RETURNING {SNAPSHOT_COLUMNS}
            "#
        ))
        .bind(snapshot_id)
        .bind(wsid)
        .bind(fs_path)
        .bind(message)
        .fetch_one(&self.pool)
        .await?;
        Ok(snapshot)
    }

    async fn get_snapshot(&self, snapshot_id: &str) -> Result<Option<SnapshotRecord>, StoreError> {
        let snapshot = sqlx::query_as::<_, SnapshotRecord>(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE snapshot_id = $1"
        ))
        .bind(snapshot_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(snapshot)
    }

    async fn list_snapshots(
        &self,
        wsid: &str,
        limit: i64,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<SnapshotRecord>, StoreError> {
        let limit = limit.clamp(1, 100);
        let snapshots = sqlx::query_as::<_, SnapshotRecord>(&format!(
            r#"
            SELECT {SNAPSHOT_COLUMNS} FROM snapshots
            WHERE wsid = $1
              AND deleted_at IS NULL
              AND ($2::TIMESTAMPTZ IS NULL OR created_at < $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#
        ))
        .bind(wsid)
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(snapshots)
    }

    async fn mark_snapshot_deleted(&self, snapshot_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE snapshots SET deleted_at = now() \
             WHERE snapshot_id = $1 AND deleted_at IS NULL",
        )
        .bind(snapshot_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_snapshot_referenced(
        &self,
        wsid: &str,
        snapshot_id: &str,
        exclude_task_id: &str,
    ) -> Result<bool, StoreError> {
        let (referenced,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM tasks
                WHERE wsid = $1
                  AND task_id <> $2
                  AND status NOT IN ('SUCCEEDED', 'CANCELED', 'DEAD')
                  AND params::jsonb ->> 'snapshot_id' = $3
            )
            "#,
        )
        .bind(wsid)
        .bind(exclude_task_id)
        .bind(snapshot_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(referenced)
    }

    async fn append_audit(&self, event: &AuditEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (ts, wsid, actor, action, task_id, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.ts)
        .bind(event.wsid.as_deref())
        .bind(serde_json::to_string(&event.actor)?)
        .bind(&event.action)
        .bind(event.task_id.as_deref())
        .bind(serde_json::to_string(&event.payload)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

impl PostgresStore {
    /// Build the error for a guarded task UPDATE that matched no row.
    async fn task_transition_error(&self, task_id: &str, expected: &'static str) -> StoreError {
        match self.get_task(task_id).await {
            Ok(Some(task)) => StoreError::InvalidState {
                kind: "task",
                id: task_id.to_string(),
                expected,
                actual: task.status,
            },
            Ok(None) => StoreError::NotFound {
                kind: "task",
                id: task_id.to_string(),
            },
            Err(e) => e,
        }
    }

    /// Build the error for a guarded workspace UPDATE that matched no row.
    async fn workspace_update_error(&self, wsid: &str) -> StoreError {
        match self.get_workspace(wsid).await {
            Ok(Some(workspace)) => StoreError::InvalidState {
                kind: "workspace",
                id: wsid.to_string(),
                expected: "not DISABLED",
                actual: workspace.state,
            },
            Ok(None) => StoreError::NotFound {
                kind: "workspace",
                id: wsid.to_string(),
            },
            Err(e) => e,
        }
    }
}

fn unique_violation(err: sqlx::Error, kind: &'static str, id: &str) -> StoreError {
    if let sqlx::Error::Database(ref db) = err
        && db.is_unique_violation()
    {
        return StoreError::AlreadyExists {
            kind,
            id: id.to_string(),
        };
    }
    StoreError::Database(err)
}
