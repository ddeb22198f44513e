//! SQLite-backed store.
//!
//! Development and test backend. SQLite serializes writers, so a single
//! `UPDATE … RETURNING` claim is atomic without SKIP LOCKED. The
//! per-workspace guard is an in-process named-lock registry: it provides
//! the same mutual exclusion as the Postgres advisory lock but only
//! within one process, so this backend must not be shared by multiple
//! worker processes.
//!
//! All timestamps are bound from the process clock; with an embedded
//! database the "database clock" and the client clock are the same
//! thing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

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

type LockRegistry = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    locks: LockRegistry,
}

impl SqliteStore {
    /// Wrap an existing pool. Migrations must already have run.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open an in-memory database and run migrations.
    ///
    /// The pool is pinned to one connection; each `:memory:` connection
    /// is its own database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        crate::migrations::run_sqlite(&pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;
        Ok(Self::new(pool))
    }

    /// Open (creating if needed) a database file and run migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Database(sqlx::Error::Io(std::io::Error::other(format!(
                    "create {}: {e}",
                    parent.display()
                ))))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;
        crate::migrations::run_sqlite(&pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;
        Ok(Self::new(pool))
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn workspace_lock(&self, wsid: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.locks.lock().expect("lock registry poisoned");
        map.entry(wsid.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

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

#[async_trait]
impl Store for SqliteStore {
    async fn submit_task(&self, submit: &SubmitTask) -> Result<SubmitOutcome, StoreError> {
        let task_id = id::new_task_id();
        let params = serde_json::to_string(&submit.params)?;
        let now = Utc::now();

        let inserted = sqlx::query_as::<_, TaskRecord>(&format!(
            r#"
            INSERT INTO tasks (task_id, wsid, op, status, idempotency_key, request_hash,
                               params, attempt, max_attempts, next_run_at, timeout_seconds,
                               cancel_requested, created_at)
            VALUES (?, ?, ?, 'PENDING', ?, ?, ?, 0, ?, ?, ?, 0, ?)
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
        .bind(now)
        .bind(submit.timeout_seconds)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(task) = inserted {
            return Ok(SubmitOutcome {
                task,
                deduplicated: false,
            });
        }

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
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?"
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
             WHERE wsid = ? AND op = ? AND idempotency_key = ?"
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
            WHERE (?1 IS NULL OR wsid = ?1)
              AND (?2 IS NULL OR status = ?2)
              AND (?3 IS NULL OR op = ?3)
              AND (?4 IS NULL OR created_at < ?4)
            ORDER BY created_at DESC
            LIMIT ?5
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
        let now = Utc::now();
        let task = sqlx::query_as::<_, TaskRecord>(&format!(
            r#"
            UPDATE tasks
            SET status = 'RUNNING', started_at = ?1, attempt = attempt + 1
            WHERE task_id = (
                SELECT task_id FROM tasks
                WHERE (status = 'PENDING'
                       OR (status = 'FAILED' AND attempt < max_attempts))
                  AND next_run_at <= ?1
                  AND cancel_requested = 0
                ORDER BY next_run_at, created_at
                LIMIT 1
            )
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(now)
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
            SET status = ?, ended_at = ?, result = ?, error = ?
            WHERE task_id = ? AND status = 'RUNNING'
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(result)
        .bind(error)
        .bind(task_id)
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
        let now = Utc::now();
        let next_run_at = now + Duration::milliseconds((retry_delay_secs * 1000.0) as i64);
        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'FAILED', ended_at = ?, error = ?, next_run_at = ?
            WHERE task_id = ? AND status = 'RUNNING'
            "#,
        )
        .bind(now)
        .bind(error)
        .bind(next_run_at)
        .bind(task_id)
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
            SET status = 'DEAD', ended_at = ?, error = ?
            WHERE task_id = ? AND status IN ('RUNNING', 'FAILED')
            "#,
        )
        .bind(Utc::now())
        .bind(error)
        .bind(task_id)
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
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?"
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
                SET status = 'CANCELED', ended_at = ?,
                    error = '{{"error":"canceled"}}'
                WHERE task_id = ?
                RETURNING {TASK_COLUMNS}
                "#
            ))
            .bind(Utc::now())
            .bind(task_id)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_as::<_, TaskRecord>(&format!(
                "UPDATE tasks SET cancel_requested = 1 \
                 WHERE task_id = ? RETURNING {TASK_COLUMNS}"
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
            SET status = 'CANCELED', ended_at = ?,
                error = '{"error":"canceled"}'
            WHERE cancel_requested = 1 AND status IN ('PENDING', 'FAILED')
            "#,
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected())
    }

    async fn sweep_expired_leases(&self, grace_secs: i64) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let refailed = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'FAILED', ended_at = ?1,
                error = '{"error":"lease expired"}', next_run_at = ?1
            WHERE status = 'RUNNING'
              AND (julianday(?1) - julianday(started_at)) * 86400.0
                  > timeout_seconds + ?2
              AND attempt < max_attempts
            "#,
        )
        .bind(now)
        .bind(grace_secs)
        .execute(&mut *tx)
        .await?;

        let deadened = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'DEAD', ended_at = ?1,
                error = '{"error":"lease expired"}'
            WHERE status = 'RUNNING'
              AND (julianday(?1) - julianday(started_at)) * 86400.0
                  > timeout_seconds + ?2
              AND attempt >= max_attempts
            "#,
        )
        .bind(now)
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
              AND next_run_at <= ?
            "#,
        )
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(depth)
    }

    async fn acquire_workspace_guard(&self, wsid: &str) -> Result<(), StoreError> {
        let lock = self.workspace_lock(wsid);
        let _guard = lock.lock().await;
        Ok(())
    }

    async fn prepare_snapshot_drop(
        &self,
        wsid: &str,
        snapshot_id: &str,
        task_id: &str,
    ) -> Result<(), StoreError> {
        let lock = self.workspace_lock(wsid);
        let _guard = lock.lock().await;

        let mut tx = self.pool.begin().await?;

        let current: Option<(Option<String>,)> =
            sqlx::query_as("SELECT current_snapshot_id FROM workspaces WHERE wsid = ?")
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
                WHERE wsid = ?
                  AND task_id <> ?
                  AND status NOT IN ('SUCCEEDED', 'CANCELED', 'DEAD')
                  AND json_extract(params, '$.snapshot_id') = ?
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
            "UPDATE snapshots SET deleted_at = ? \
             WHERE snapshot_id = ? AND deleted_at IS NULL",
        )
        .bind(Utc::now())
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
        let now = Utc::now();
        let workspace = sqlx::query_as::<_, WorkspaceRecord>(&format!(
            r#"
            INSERT INTO workspaces (wsid, root_path, owner, state, current_path,
                                    created_at, updated_at)
            VALUES (?, ?, ?, 'PROVISIONING', ?, ?, ?)
            RETURNING {WORKSPACE_COLUMNS}
            "#
        ))
        .bind(wsid)
        .bind(root_path)
        .bind(owner)
        .bind(current_path)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "workspace", wsid))?;
        Ok(workspace)
    }

    async fn get_workspace(&self, wsid: &str) -> Result<Option<WorkspaceRecord>, StoreError> {
        let workspace = sqlx::query_as::<_, WorkspaceRecord>(&format!(
            "SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE wsid = ?"
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
            WHERE (?1 IS NULL OR created_at < ?1)
            ORDER BY created_at DESC
            LIMIT ?2
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
            "UPDATE workspaces SET state = ?, updated_at = ? \
             WHERE wsid = ? AND state <> 'DISABLED'",
        )
        .bind(state.as_str())
        .bind(Utc::now())
        .bind(wsid)
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
             SET current_snapshot_id = ?, current_path = ?, updated_at = ? \
             WHERE wsid = ? AND state <> 'DISABLED'",
        )
        .bind(snapshot_id)
        .bind(current_path)
        .bind(Utc::now())
        .bind(wsid)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.workspace_update_error(wsid).await);
        }
        Ok(())
    }

    async fn disable_workspace(&self, wsid: &str) -> Result<WorkspaceRecord, StoreError> {
        let lock = self.workspace_lock(wsid);
        let _guard = lock.lock().await;

        let mut tx = self.pool.begin().await?;

        let workspace = sqlx::query_as::<_, WorkspaceRecord>(&format!(
            "SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE wsid = ?"
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
            WHERE wsid = ?
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
            "UPDATE workspaces SET state = 'DISABLED', updated_at = ? \
             WHERE wsid = ? RETURNING {WORKSPACE_COLUMNS}"
        ))
        .bind(Utc::now())
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
            WHERE wsid = ?
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
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (snapshot_id) DO UPDATE SET fs_path = excluded.fs_path
            RETURNING {SNAPSHOT_COLUMNS}
            "#
        ))
        .bind(snapshot_id)
        .bind(wsid)
        .bind(fs_path)
        .bind(message)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(snapshot)
    }

    async fn get_snapshot(&self, snapshot_id: &str) -> Result<Option<SnapshotRecord>, StoreError> {
        let snapshot = sqlx::query_as::<_, SnapshotRecord>(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE snapshot_id = ?"
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
            WHERE wsid = ?1
              AND deleted_at IS NULL
              AND (?2 IS NULL OR created_at < ?2)
            ORDER BY created_at DESC
            LIMIT ?3
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
            "UPDATE snapshots SET deleted_at = ? \
             WHERE snapshot_id = ? AND deleted_at IS NULL",
        )
        .bind(Utc::now())
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
                WHERE wsid = ?
                  AND task_id <> ?
                  AND status NOT IN ('SUCCEEDED', 'CANCELED', 'DEAD')
                  AND json_extract(params, '$.snapshot_id') = ?
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
            VALUES (?, ?, ?, ?, ?, ?)
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
