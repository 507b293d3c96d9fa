//! Worker pools that drain a `Queue` into a `Synthesizer`: a primary
//! worker draining fresh `PENDING` work and a retry worker sweeping
//! `RETRYABLE`/stale-`PROCESSING` rows back into the pipeline. Both share
//! the sequential-items/concurrent-tasks processing model and a
//! `ShutdownHandle` for cooperative stop.

mod processing;
mod primary;
mod request;
mod retry;
mod shutdown;

pub use primary::PrimaryWorker;
pub use request::TextToSpeechRequest;
pub use retry::RetryWorker;
pub use shutdown::ShutdownHandle;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use voxqueue_core::{Queue, QueueConfig, Task, TaskItem, TaskState, WorkerConfig};
    use voxqueue_testing::{temp_sqlite_store, EchoSynthesizer, SynthFailure};

    use super::*;

    fn item(text: &str, voice: &str) -> TaskItem {
        TaskItem::new(serde_json::json!({ "text": text, "voice_id": voice }))
    }

    #[tokio::test]
    async fn primary_worker_drains_pending_tasks_to_completion() {
        let store = Arc::new(temp_sqlite_store().await.unwrap());
        let synth = Arc::new(EchoSynthesizer::new());

        let ids = store
            .enqueue(vec![Task::new(vec![item("hello", "v1")])])
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);

        let shutdown = ShutdownHandle::new();
        let worker = PrimaryWorker::new(
            "primary-test-1",
            store.clone() as Arc<dyn Queue>,
            synth.clone() as Arc<dyn voxqueue_core::Synthesizer>,
            WorkerConfig {
                worker_poll_delay_secs: 1,
                worker_batch_size: 5,
                ..Default::default()
            },
            shutdown.clone(),
        );

        let handle = tokio::spawn(async move { worker.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.trigger();
        handle.await.unwrap();

        let task = store.get_task(&ids[0]).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert!(task.items[0].response_url.starts_with("data:audio/wav;base64,"));
    }

    #[tokio::test]
    async fn primary_worker_retries_failing_task_instead_of_completing() {
        let store = Arc::new(temp_sqlite_store().await.unwrap());
        let synth = Arc::new(EchoSynthesizer::new());
        synth.fail_voice("bad", SynthFailure::Generation("boom".into()));

        let ids = store
            .enqueue(vec![Task::new(vec![item("hello", "bad")])])
            .await
            .unwrap();

        let shutdown = ShutdownHandle::new();
        let worker = PrimaryWorker::new(
            "primary-test-2",
            store.clone() as Arc<dyn Queue>,
            synth as Arc<dyn voxqueue_core::Synthesizer>,
            WorkerConfig {
                worker_poll_delay_secs: 1,
                worker_batch_size: 5,
                ..Default::default()
            },
            shutdown.clone(),
        );

        let handle = tokio::spawn(async move { worker.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.trigger();
        handle.await.unwrap();

        let task = store.get_task(&ids[0]).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Retryable);
        assert_eq!(task.attempted_error.len(), 1);
    }

    #[tokio::test]
    async fn retry_worker_completes_a_due_retryable_task() {
        let store = Arc::new(temp_sqlite_store().await.unwrap());
        let synth = Arc::new(EchoSynthesizer::new());
        let queue_config = QueueConfig::default();

        let ids = store
            .enqueue(vec![Task::new(vec![item("hello", "v1")])])
            .await
            .unwrap();
        let claimed = store.dequeue(1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        store.mark_retry(&ids[0], "first failure").await.unwrap();

        // Force the backoff window open immediately, the way a test would
        // fast-forward past a real delay.
        sqlx::query("UPDATE tasks SET schedule_at = 0")
            .execute(store.pool())
            .await
            .unwrap();

        let shutdown = ShutdownHandle::new();
        let worker = RetryWorker::new(
            "retry-test-1",
            store.clone() as Arc<dyn Queue>,
            synth as Arc<dyn voxqueue_core::Synthesizer>,
            WorkerConfig {
                retry_worker_poll_delay_secs: 1,
                retry_worker_batch_size: 5,
                retry_worker_visibility_timeout_secs: queue_config.visibility_timeout_secs,
                retry_worker_max_attempts: queue_config.max_attempts,
                ..Default::default()
            },
            shutdown.clone(),
        );

        let handle = tokio::spawn(async move { worker.run().await });
        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown.trigger();
        handle.await.unwrap();

        let task = store.get_task(&ids[0]).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Completed);
    }
}
