//! The retry worker: polls `retry` to promote due `RETRYABLE` rows and
//! reclaim expired `PROCESSING` leases, then claims and processes the ones
//! that came back `PENDING`.

use std::sync::Arc;
use std::time::Duration;

use voxqueue_core::{now_ms, Queue, Synthesizer, Task, TaskState, WorkerConfig, SYNTHESIS_ITEM_DEADLINE_SECS, WORKER_ERROR_BACKOFF_SECS};

use crate::processing::process_batch;
use crate::shutdown::ShutdownHandle;

pub struct RetryWorker {
    worker_id: String,
    queue: Arc<dyn Queue>,
    synth: Arc<dyn Synthesizer>,
    config: WorkerConfig,
    shutdown: ShutdownHandle,
}

impl RetryWorker {
    pub fn new(
        worker_id: impl Into<String>,
        queue: Arc<dyn Queue>,
        synth: Arc<dyn Synthesizer>,
        config: WorkerConfig,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue,
            synth,
            config,
            shutdown,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub async fn run(&self) {
        let poll_delay = Duration::from_secs(self.config.retry_worker_poll_delay_secs);
        let error_backoff = Duration::from_secs(WORKER_ERROR_BACKOFF_SECS);
        let item_deadline = Duration::from_secs(SYNTHESIS_ITEM_DEADLINE_SECS);
        let visibility_timeout = Duration::from_secs(self.config.retry_worker_visibility_timeout_secs);
        let max_attempts = self.config.retry_worker_max_attempts;

        tracing::info!(worker_id = %self.worker_id, "retry worker starting");

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            let batch_size = self.config.retry_worker_batch_size as i64;
            match self.queue.retry(batch_size, visibility_timeout, max_attempts).await {
                Ok(tasks) if tasks.is_empty() => {
                    tokio::select! {
                        _ = self.shutdown.wait() => break,
                        _ = tokio::time::sleep(poll_delay) => {}
                    }
                }
                Ok(tasks) => {
                    let claimed = self.claim_due(tasks).await;
                    process_batch(Arc::clone(&self.queue), Arc::clone(&self.synth), claimed, item_deadline).await;
                }
                Err(err) => {
                    tracing::error!(worker_id = %self.worker_id, %err, "retry sweep failed, backing off");
                    tokio::select! {
                        _ = self.shutdown.wait() => break,
                        _ = tokio::time::sleep(error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.worker_id, "retry worker stopped");
    }

    /// `retry` hands back every row it touched, including rows it
    /// discarded outright and rows whose `schedule_at` is still in the
    /// future. Only rows it promoted to due `PENDING` get claimed for
    /// processing here.
    async fn claim_due(&self, tasks: Vec<Task>) -> Vec<Task> {
        let now = now_ms();
        let mut claimed = Vec::new();
        for task in tasks {
            match task.state {
                TaskState::Discarded => {
                    tracing::info!(task_id = %task.id, attempts = task.attempt_count, "task discarded after exhausting retries");
                }
                TaskState::Pending if task.schedule_at <= now => {
                    match self.queue.claim_for_processing(&task.id).await {
                        Ok(claimed_task) => claimed.push(claimed_task),
                        Err(err) => tracing::error!(task_id = %task.id, %err, "failed to claim due retry"),
                    }
                }
                _ => {}
            }
        }
        claimed
    }
}
