//! The `Queue` trait: the transactional API a store backend implements.
//! Owns nothing itself; it's the seam the workers and any adapter code
//! depend on, so a store can be swapped without touching either.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::QueueError;
use crate::task::{Task, TaskState};

/// Opaque pagination cursor: the `(key, id)` pair of the last row returned,
/// where `key` is `created_at` for `list_tasks` or `schedule_at` for
/// `list_tasks_by_state`. Paging is `>` on that tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCursor {
    pub key: i64,
    pub id_tiebreak: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub retryable: i64,
    pub cancelled: i64,
    pub discarded: i64,
}

/// The queue's transactional API over a `Store`. Implementations must make
/// `dequeue` and `retry` safe under N concurrent callers with no lost or
/// double-delivered rows.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Bulk-inserts tasks, minting ids and stamping timestamps for any task
    /// missing them. Returns the ids of rows actually present after commit
    /// (a colliding explicit id is skipped, not an error). `tasks.is_empty()`
    /// returns `Ok(vec![])` without touching the store.
    async fn enqueue(&self, tasks: Vec<Task>) -> Result<Vec<String>, QueueError>;

    /// Atomically claims up to `size` runnable `PENDING` rows and moves them
    /// to `PROCESSING`. `size <= 0` returns empty without writes.
    async fn dequeue(&self, size: i64) -> Result<Vec<Task>, QueueError>;

    /// Claims one already-`PENDING` row for processing, the same
    /// state-update `dequeue` performs, guarded by `expected_state =
    /// PENDING`. The retry worker uses this on the rows `retry` just
    /// promoted back to `PENDING` before running the same per-item
    /// processing `dequeue`'s callers do.
    async fn claim_for_processing(&self, id: &str) -> Result<Task, QueueError>;

    /// Promotes due `RETRYABLE` rows back to `PENDING` (with backoff applied
    /// to `schedule_at`) and reclaims `PROCESSING` rows whose lease has
    /// expired, discarding either kind once `attempt_count` would reach
    /// `max_attempts`. `size <= 0` returns empty without writes.
    async fn retry(
        &self,
        size: i64,
        visibility_timeout: Duration,
        max_attempts: u32,
    ) -> Result<Vec<Task>, QueueError>;

    /// `PROCESSING -> COMPLETED`. Persists the caller-supplied `task.items`
    /// (which now carry `response_url` values) atomically with the state
    /// change.
    async fn mark_complete(&self, task: Task) -> Result<Task, QueueError>;

    /// `PROCESSING -> RETRYABLE`, appending `error` to `attempted_error`.
    /// Does not bump `attempt_count` or set `schedule_at`; the reaper does.
    async fn mark_retry(&self, id: &str, error: &str) -> Result<Task, QueueError>;

    /// `PENDING -> CANCELLED`.
    async fn mark_cancelled(&self, id: &str) -> Result<Task, QueueError>;

    /// `PROCESSING -> DISCARDED`, manual variant.
    async fn mark_discarded(&self, id: &str) -> Result<Task, QueueError>;

    /// `DISCARDED -> PENDING`, resetting `schedule_at` to now.
    async fn resume(&self, id: &str) -> Result<Task, QueueError>;

    async fn get_task(&self, id: &str) -> Result<Option<Task>, QueueError>;

    async fn list_tasks(
        &self,
        limit: u32,
        cursor: Option<TaskCursor>,
    ) -> Result<Vec<Task>, QueueError>;

    async fn list_tasks_by_state(
        &self,
        state: TaskState,
        limit: u32,
        cursor: Option<TaskCursor>,
    ) -> Result<Vec<Task>, QueueError>;

    /// Counts of tasks per state, for an operator dashboard or health check.
    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Deletes terminal (`COMPLETED`/`CANCELLED`/`DISCARDED`) rows whose
    /// `updated_at` predates `older_than`. Never called by the workers
    /// themselves; an opt-in maintenance operation (see DESIGN.md).
    async fn cleanup_completed(&self, older_than: DateTime<Utc>) -> Result<u64, QueueError>;
}
