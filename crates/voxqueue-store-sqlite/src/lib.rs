//! SQLite-backed `Queue` implementation.
//!
//! A single `tasks` table with a `(state, schedule_at)` index for the
//! dispatcher hot paths and a `(created_at)` index for listing. All
//! queue-level atomicity is expressed as a single
//! `WITH ... UPDATE ... RETURNING` statement so that a lost race becomes a
//! no-op rather than corruption, the SQLite analogue of claiming rows with
//! Postgres's `FOR UPDATE SKIP LOCKED`, adapted to SQLite's single-writer
//! model and `RETURNING` support (SQLite 3.35+, bundled by sqlx's `sqlite`
//! feature).
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE tasks (
//!     id              TEXT PRIMARY KEY,
//!     state           INTEGER NOT NULL,
//!     schedule_at     INTEGER NOT NULL,
//!     attempt_count   INTEGER NOT NULL DEFAULT 0,
//!     attempted_at    INTEGER,
//!     attempted_error TEXT,
//!     finalized_at    INTEGER,
//!     items           TEXT NOT NULL,
//!     item_count      INTEGER NOT NULL DEFAULT 0,
//!     created_at      INTEGER NOT NULL,
//!     updated_at      INTEGER NOT NULL
//! );
//! CREATE INDEX idx_tasks_state_schedule ON tasks (state, schedule_at);
//! CREATE INDEX idx_tasks_created ON tasks (created_at);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use ulid::Ulid;

use voxqueue_core::{
    now_ms, Queue, QueueConfig, QueueError, QueueStats, Task, TaskCursor, TaskItem, TaskState,
};

/// A SQLite-backed `Queue`. Cheap to clone (wraps a pooled connection
/// handle); construct once per process and share the clone, the way a
/// `PgPool`/`SqlitePool` is meant to be used.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    config: QueueConfig,
}

impl SqliteStore {
    /// Connects to `config.database_url` and idempotently creates the
    /// schema. `config`'s retry/backoff fields govern every later `retry`
    /// call on the returned store.
    pub async fn connect(config: &QueueConfig) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&config.database_url)
            .await?;
        Self::from_pool(pool, config.clone()).await
    }

    /// Wraps an already-open pool (e.g. an in-memory pool built by tests),
    /// applying the schema and adopting `config`'s retry/backoff fields.
    pub async fn from_pool(pool: SqlitePool, config: QueueConfig) -> anyhow::Result<Self> {
        let store = Self { pool, config };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id              TEXT PRIMARY KEY,
                state           INTEGER NOT NULL,
                schedule_at     INTEGER NOT NULL,
                attempt_count   INTEGER NOT NULL DEFAULT 0,
                attempted_at    INTEGER,
                attempted_error TEXT,
                finalized_at    INTEGER,
                items           TEXT NOT NULL,
                item_count      INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_state_schedule ON tasks (state, schedule_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks (created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Option<Task>, QueueError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(QueueError::store)?;
        row.map(|r| row_to_task(&r)).transpose()
    }

    /// Shared guard for the straight-line transitions
    /// (`MarkComplete`/`MarkRetry`/`MarkCancelled`/`MarkDiscarded`/`Resume`):
    /// attempts the update guarded by `expected`, and on a zero-row result
    /// distinguishes `TaskNotFound` from `InvalidStateTransition` with a
    /// follow-up read.
    async fn require_transitioned(
        &self,
        id: &str,
        row: Option<sqlx::sqlite::SqliteRow>,
        expected: TaskState,
        attempted: TaskState,
    ) -> Result<Task, QueueError> {
        match row {
            Some(r) => row_to_task(&r),
            None => match self.fetch_by_id(id).await? {
                None => Err(QueueError::TaskNotFound { id: id.to_string() }),
                Some(current) => Err(QueueError::InvalidStateTransition {
                    id: id.to_string(),
                    expected,
                    actual: current.state,
                    attempted,
                }),
            },
        }
    }
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<Task, QueueError> {
    let state_raw: i64 = row.try_get("state").map_err(|e| QueueError::store(e))?;
    let state = TaskState::from_i32(state_raw as i32).ok_or_else(|| {
        QueueError::store(anyhow::anyhow!("unknown persisted task state {state_raw}"))
    })?;

    let items_json: String = row.try_get("items").map_err(|e| QueueError::store(e))?;
    let items: Vec<TaskItem> = serde_json::from_str(&items_json)?;

    let attempted_error_json: Option<String> = row
        .try_get("attempted_error")
        .map_err(|e| QueueError::store(e))?;
    let attempted_error: Vec<String> = match attempted_error_json {
        Some(s) if !s.is_empty() => serde_json::from_str(&s)?,
        _ => Vec::new(),
    };

    Ok(Task {
        id: row.try_get("id").map_err(|e| QueueError::store(e))?,
        state,
        schedule_at: row.try_get("schedule_at").map_err(|e| QueueError::store(e))?,
        attempt_count: row
            .try_get::<i64, _>("attempt_count")
            .map_err(|e| QueueError::store(e))? as u32,
        attempted_at: row
            .try_get("attempted_at")
            .map_err(|e| QueueError::store(e))?,
        attempted_error,
        finalized_at: row
            .try_get("finalized_at")
            .map_err(|e| QueueError::store(e))?,
        items,
        created_at: row.try_get("created_at").map_err(|e| QueueError::store(e))?,
        updated_at: row.try_get("updated_at").map_err(|e| QueueError::store(e))?,
    })
}

#[async_trait]
impl Queue for SqliteStore {
    async fn enqueue(&self, tasks: Vec<Task>) -> Result<Vec<String>, QueueError> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let current_time = now_ms();
        let mut ids = Vec::with_capacity(tasks.len());
        let mut tx = self.pool.begin().await.map_err(QueueError::store)?;

        for mut task in tasks {
            if task.id.is_empty() {
                task.id = Ulid::new().to_string();
            }
            task.created_at = current_time;
            task.updated_at = current_time;
            if task.schedule_at == 0 {
                task.schedule_at = current_time;
            }
            task.state = TaskState::Pending;

            let items_json = serde_json::to_string(&task.items)?;
            let item_count = task.items.len() as i64;

            // INSERT OR IGNORE: a colliding explicit id is silently skipped
            // rather than erroring.
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO tasks
                    (id, state, schedule_at, attempt_count, attempted_at, attempted_error,
                     finalized_at, items, item_count, created_at, updated_at)
                VALUES (?1, ?2, ?3, 0, NULL, NULL, NULL, ?4, ?5, ?6, ?6)
                "#,
            )
            .bind(&task.id)
            .bind(task.state.as_i32() as i64)
            .bind(task.schedule_at)
            .bind(&items_json)
            .bind(item_count)
            .bind(current_time)
            .execute(&mut *tx)
            .await
            .map_err(QueueError::store)?;

            if result.rows_affected() > 0 {
                ids.push(task.id);
            }
        }

        tx.commit().await.map_err(QueueError::store)?;
        tracing::info!(count = ids.len(), "enqueued tasks");
        Ok(ids)
    }

    async fn dequeue(&self, size: i64) -> Result<Vec<Task>, QueueError> {
        if size <= 0 {
            return Ok(Vec::new());
        }

        let current_time = now_ms();
        let rows = sqlx::query(
            r#"
            WITH selected AS (
                SELECT id FROM tasks
                WHERE state = ?1 AND schedule_at <= ?2
                ORDER BY created_at ASC
                LIMIT ?3
            )
            UPDATE tasks SET state = ?4, updated_at = ?2
            WHERE id IN (SELECT id FROM selected) AND state = ?1
            RETURNING *
            "#,
        )
        .bind(TaskState::Pending.as_i32() as i64)
        .bind(current_time)
        .bind(size)
        .bind(TaskState::Processing.as_i32() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::store)?;

        let tasks = rows.iter().map(row_to_task).collect::<Result<Vec<_>, _>>()?;
        tracing::info!(count = tasks.len(), "dequeued tasks for processing");
        Ok(tasks)
    }

    async fn claim_for_processing(&self, id: &str) -> Result<Task, QueueError> {
        let current_time = now_ms();
        let row = sqlx::query(
            r#"
            UPDATE tasks SET state = ?1, updated_at = ?2
            WHERE id = ?3 AND state = ?4
            RETURNING *
            "#,
        )
        .bind(TaskState::Processing.as_i32() as i64)
        .bind(current_time)
        .bind(id)
        .bind(TaskState::Pending.as_i32() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::store)?;

        self.require_transitioned(id, row, TaskState::Pending, TaskState::Processing)
            .await
    }

    async fn retry(
        &self,
        size: i64,
        visibility_timeout: std::time::Duration,
        max_attempts: u32,
    ) -> Result<Vec<Task>, QueueError> {
        if size <= 0 {
            return Ok(Vec::new());
        }

        let current_time = now_ms();
        let stale_cutoff = current_time - visibility_timeout.as_millis() as i64;

        // The schedule_at for each possible next attempt is precomputed and
        // embedded as literal integers (not user input): SQLite has no way
        // to call back into application code from a CASE branch.
        let mut case_parts = String::new();
        for attempt in 0..max_attempts.saturating_sub(1) {
            let delay_ms = voxqueue_core::backoff_ms(
                attempt,
                self.config.retry_base_delay_secs,
                self.config.retry_backoff_multiplier,
                self.config.max_retry_delay_secs,
            );
            case_parts.push_str(&format!(
                "WHEN (attempt_count + 1) = {} THEN {} ",
                attempt + 1,
                current_time + delay_ms
            ));
        }
        let schedule_case = format!("CASE {case_parts}ELSE {current_time} END");

        let sql = format!(
            r#"
            WITH selected AS (
                SELECT id FROM tasks
                WHERE (
                    (state = ?1 AND schedule_at <= ?2)
                    OR (state = ?3 AND schedule_at < ?4)
                )
                AND attempt_count < ?5
                ORDER BY created_at ASC
                LIMIT ?6
            )
            UPDATE tasks SET
                state = CASE WHEN (attempt_count + 1) >= ?5 THEN ?7 ELSE ?8 END,
                schedule_at = CASE WHEN (attempt_count + 1) >= ?5 THEN schedule_at ELSE {schedule_case} END,
                finalized_at = CASE WHEN (attempt_count + 1) >= ?5 THEN ?2 ELSE finalized_at END,
                attempt_count = attempt_count + 1,
                attempted_at = ?2,
                updated_at = ?2
            WHERE id IN (SELECT id FROM selected)
            RETURNING *
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(TaskState::Retryable.as_i32() as i64)
            .bind(current_time)
            .bind(TaskState::Processing.as_i32() as i64)
            .bind(stale_cutoff)
            .bind(max_attempts as i64)
            .bind(size)
            .bind(TaskState::Discarded.as_i32() as i64)
            .bind(TaskState::Pending.as_i32() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(QueueError::store)?;

        let tasks = rows.iter().map(row_to_task).collect::<Result<Vec<_>, _>>()?;
        for task in &tasks {
            if task.state == TaskState::Discarded {
                tracing::debug!(id = %task.id, attempts = task.attempt_count, "auto-discarded task");
            } else {
                tracing::debug!(id = %task.id, delay_ms = task.schedule_at - current_time, "scheduled retry");
            }
        }
        tracing::info!(count = tasks.len(), "processed tasks for retry");
        Ok(tasks)
    }

    async fn mark_complete(&self, task: Task) -> Result<Task, QueueError> {
        let current_time = now_ms();
        let items_json = serde_json::to_string(&task.items)?;
        let item_count = task.items.len() as i64;

        let row = sqlx::query(
            r#"
            UPDATE tasks SET
                items = ?1, item_count = ?2, state = ?3, finalized_at = ?4, updated_at = ?4
            WHERE id = ?5 AND state = ?6
            RETURNING *
            "#,
        )
        .bind(&items_json)
        .bind(item_count)
        .bind(TaskState::Completed.as_i32() as i64)
        .bind(current_time)
        .bind(&task.id)
        .bind(TaskState::Processing.as_i32() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::store)?;

        let result = self
            .require_transitioned(&task.id, row, TaskState::Processing, TaskState::Completed)
            .await;
        if result.is_ok() {
            tracing::info!(id = %task.id, "task completed");
        }
        result
    }

    async fn mark_retry(&self, id: &str, error: &str) -> Result<Task, QueueError> {
        let current = self.fetch_by_id(id).await?;
        let Some(current) = current else {
            return Err(QueueError::TaskNotFound { id: id.to_string() });
        };
        if current.state != TaskState::Processing {
            return Err(QueueError::InvalidStateTransition {
                id: id.to_string(),
                expected: TaskState::Processing,
                actual: current.state,
                attempted: TaskState::Retryable,
            });
        }

        let mut errors = current.attempted_error.clone();
        errors.push(error.to_string());
        let errors_json = serde_json::to_string(&errors)?;
        let current_time = now_ms();

        let row = sqlx::query(
            r#"
            UPDATE tasks SET attempted_error = ?1, state = ?2, updated_at = ?3
            WHERE id = ?4 AND state = ?5
            RETURNING *
            "#,
        )
        .bind(&errors_json)
        .bind(TaskState::Retryable.as_i32() as i64)
        .bind(current_time)
        .bind(id)
        .bind(TaskState::Processing.as_i32() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::store)?;

        let result = self
            .require_transitioned(id, row, TaskState::Processing, TaskState::Retryable)
            .await;
        if let Ok(task) = &result {
            tracing::info!(id = %task.id, %error, "marked task for retry");
        }
        result
    }

    async fn mark_cancelled(&self, id: &str) -> Result<Task, QueueError> {
        let current_time = now_ms();
        let row = sqlx::query(
            r#"
            UPDATE tasks SET state = ?1, finalized_at = ?2, updated_at = ?2
            WHERE id = ?3 AND state = ?4
            RETURNING *
            "#,
        )
        .bind(TaskState::Cancelled.as_i32() as i64)
        .bind(current_time)
        .bind(id)
        .bind(TaskState::Pending.as_i32() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::store)?;

        self.require_transitioned(id, row, TaskState::Pending, TaskState::Cancelled)
            .await
    }

    async fn mark_discarded(&self, id: &str) -> Result<Task, QueueError> {
        let current_time = now_ms();
        let row = sqlx::query(
            r#"
            UPDATE tasks SET state = ?1, finalized_at = ?2, updated_at = ?2
            WHERE id = ?3 AND state = ?4
            RETURNING *
            "#,
        )
        .bind(TaskState::Discarded.as_i32() as i64)
        .bind(current_time)
        .bind(id)
        .bind(TaskState::Processing.as_i32() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::store)?;

        self.require_transitioned(id, row, TaskState::Processing, TaskState::Discarded)
            .await
    }

    async fn resume(&self, id: &str) -> Result<Task, QueueError> {
        let current_time = now_ms();
        let row = sqlx::query(
            r#"
            UPDATE tasks SET state = ?1, schedule_at = ?2, finalized_at = NULL, updated_at = ?2
            WHERE id = ?3 AND state = ?4
            RETURNING *
            "#,
        )
        .bind(TaskState::Pending.as_i32() as i64)
        .bind(current_time)
        .bind(id)
        .bind(TaskState::Discarded.as_i32() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::store)?;

        self.require_transitioned(id, row, TaskState::Discarded, TaskState::Pending)
            .await
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, QueueError> {
        self.fetch_by_id(id).await
    }

    async fn list_tasks(
        &self,
        limit: u32,
        cursor: Option<TaskCursor>,
    ) -> Result<Vec<Task>, QueueError> {
        let limit = limit.clamp(1, 100) as i64;
        let rows = match cursor {
            None => sqlx::query(
                "SELECT * FROM tasks ORDER BY created_at ASC, id ASC LIMIT ?1",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(QueueError::store)?,
            Some(c) => sqlx::query(
                r#"
                SELECT * FROM tasks
                WHERE created_at > ?1 OR (created_at = ?1 AND id > ?2)
                ORDER BY created_at ASC, id ASC
                LIMIT ?3
                "#,
            )
            .bind(c.key)
            .bind(c.id_tiebreak.to_string())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(QueueError::store)?,
        };
        rows.iter().map(row_to_task).collect()
    }

    async fn list_tasks_by_state(
        &self,
        state: TaskState,
        limit: u32,
        cursor: Option<TaskCursor>,
    ) -> Result<Vec<Task>, QueueError> {
        let limit = limit.clamp(1, 100) as i64;
        let state_val = state.as_i32() as i64;
        let rows = match cursor {
            None => sqlx::query(
                "SELECT * FROM tasks WHERE state = ?1 ORDER BY schedule_at ASC, id ASC LIMIT ?2",
            )
            .bind(state_val)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(QueueError::store)?,
            Some(c) => sqlx::query(
                r#"
                SELECT * FROM tasks
                WHERE state = ?1 AND (schedule_at > ?2 OR (schedule_at = ?2 AND id > ?3))
                ORDER BY schedule_at ASC, id ASC
                LIMIT ?4
                "#,
            )
            .bind(state_val)
            .bind(c.key)
            .bind(c.id_tiebreak.to_string())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(QueueError::store)?,
        };
        rows.iter().map(row_to_task).collect()
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT
                SUM(CASE WHEN state = ?1 THEN 1 ELSE 0 END) AS pending,
                SUM(CASE WHEN state = ?2 THEN 1 ELSE 0 END) AS processing,
                SUM(CASE WHEN state = ?3 THEN 1 ELSE 0 END) AS completed,
                SUM(CASE WHEN state = ?4 THEN 1 ELSE 0 END) AS retryable,
                SUM(CASE WHEN state = ?5 THEN 1 ELSE 0 END) AS cancelled,
                SUM(CASE WHEN state = ?6 THEN 1 ELSE 0 END) AS discarded
            FROM tasks
            "#,
        )
        .bind(TaskState::Pending.as_i32() as i64)
        .bind(TaskState::Processing.as_i32() as i64)
        .bind(TaskState::Completed.as_i32() as i64)
        .bind(TaskState::Retryable.as_i32() as i64)
        .bind(TaskState::Cancelled.as_i32() as i64)
        .bind(TaskState::Discarded.as_i32() as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(QueueError::store)?;

        Ok(QueueStats {
            pending: row.try_get::<Option<i64>, _>("pending").map_err(QueueError::store)?.unwrap_or(0),
            processing: row.try_get::<Option<i64>, _>("processing").map_err(QueueError::store)?.unwrap_or(0),
            completed: row.try_get::<Option<i64>, _>("completed").map_err(QueueError::store)?.unwrap_or(0),
            retryable: row.try_get::<Option<i64>, _>("retryable").map_err(QueueError::store)?.unwrap_or(0),
            cancelled: row.try_get::<Option<i64>, _>("cancelled").map_err(QueueError::store)?.unwrap_or(0),
            discarded: row.try_get::<Option<i64>, _>("discarded").map_err(QueueError::store)?.unwrap_or(0),
        })
    }

    async fn cleanup_completed(&self, older_than: DateTime<Utc>) -> Result<u64, QueueError> {
        let cutoff_ms = older_than.timestamp_millis();
        let result = sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE state IN (?1, ?2, ?3) AND updated_at < ?4
            "#,
        )
        .bind(TaskState::Completed.as_i32() as i64)
        .bind(TaskState::Cancelled.as_i32() as i64)
        .bind(TaskState::Discarded.as_i32() as i64)
        .bind(cutoff_ms)
        .execute(&self.pool)
        .await
        .map_err(QueueError::store)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests;
