//! Per-task and per-batch processing, shared by the primary and retry
//! worker loops: items within a task run sequentially (voices are a
//! shared, order-sensitive resource on the engine side), tasks within a
//! batch run concurrently.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use voxqueue_core::{Queue, Synthesizer, Task};

use crate::request::TextToSpeechRequest;

/// Runs every item's synthesis in order, writing `response_url` as a
/// `data:audio/wav;base64,...` URI in place. Stops at the first failure;
/// the caller marks the whole task for retry, never a partial completion.
async fn synthesize_items(
    task: &mut Task,
    synth: &dyn Synthesizer,
    deadline: Duration,
) -> Result<(), String> {
    for item in task.items.iter_mut() {
        let request: TextToSpeechRequest = serde_json::from_value(item.request.clone())
            .map_err(|e| format!("invalid text-to-speech request: {e}"))?;
        let audio = synth
            .synthesize(&request.text, &request.voice_id, deadline)
            .await
            .map_err(|e| e.to_string())?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(audio);
        item.response_url = format!("data:audio/wav;base64,{encoded}");
    }
    Ok(())
}

/// Processes one claimed (`PROCESSING`) task end to end and reports the
/// outcome back to the queue. Errors talking to the queue itself are
/// logged, not propagated; the task will be reclaimed once its
/// visibility timeout lapses.
pub(crate) async fn process_one(queue: &dyn Queue, synth: &dyn Synthesizer, mut task: Task, item_deadline: Duration) {
    let id = task.id.clone();
    match synthesize_items(&mut task, synth, item_deadline).await {
        Ok(()) => match queue.mark_complete(task).await {
            Ok(_) => tracing::info!(task_id = %id, "task completed"),
            Err(err) => tracing::error!(task_id = %id, %err, "failed to mark task complete"),
        },
        Err(message) => match queue.mark_retry(&id, &message).await {
            Ok(_) => tracing::warn!(task_id = %id, error = %message, "task marked for retry"),
            Err(err) => tracing::error!(task_id = %id, %err, "failed to mark task for retry"),
        },
    }
}

pub(crate) async fn process_batch(
    queue: Arc<dyn Queue>,
    synth: Arc<dyn Synthesizer>,
    tasks: Vec<Task>,
    item_deadline: Duration,
) {
    let calls = tasks.into_iter().map(|task| {
        let queue = Arc::clone(&queue);
        let synth = Arc::clone(&synth);
        async move { process_one(queue.as_ref(), synth.as_ref(), task, item_deadline).await }
    });
    futures::future::join_all(calls).await;
}
