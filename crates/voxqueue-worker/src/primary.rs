//! The primary worker: polls `dequeue` for fresh `PENDING` work and drains
//! it in batches.

use std::sync::Arc;
use std::time::Duration;

use voxqueue_core::{Queue, Synthesizer, WorkerConfig, SYNTHESIS_ITEM_DEADLINE_SECS, WORKER_ERROR_BACKOFF_SECS};

use crate::processing::process_batch;
use crate::shutdown::ShutdownHandle;

pub struct PrimaryWorker {
    worker_id: String,
    queue: Arc<dyn Queue>,
    synth: Arc<dyn Synthesizer>,
    config: WorkerConfig,
    shutdown: ShutdownHandle,
}

impl PrimaryWorker {
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

    /// Runs until `shutdown` is triggered. Never panics on a queue error;
    /// it logs and backs off instead.
    pub async fn run(&self) {
        let poll_delay = Duration::from_secs(self.config.worker_poll_delay_secs);
        let error_backoff = Duration::from_secs(WORKER_ERROR_BACKOFF_SECS);
        let item_deadline = Duration::from_secs(SYNTHESIS_ITEM_DEADLINE_SECS);

        tracing::info!(worker_id = %self.worker_id, "primary worker starting");

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            match self.queue.dequeue(self.config.worker_batch_size as i64).await {
                Ok(tasks) if tasks.is_empty() => {
                    tokio::select! {
                        _ = self.shutdown.wait() => break,
                        _ = tokio::time::sleep(poll_delay) => {}
                    }
                }
                Ok(tasks) => {
                    tracing::debug!(worker_id = %self.worker_id, count = tasks.len(), "claimed tasks");
                    process_batch(Arc::clone(&self.queue), Arc::clone(&self.synth), tasks, item_deadline).await;
                }
                Err(err) => {
                    tracing::error!(worker_id = %self.worker_id, %err, "dequeue failed, backing off");
                    tokio::select! {
                        _ = self.shutdown.wait() => break,
                        _ = tokio::time::sleep(error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.worker_id, "primary worker stopped");
    }
}
