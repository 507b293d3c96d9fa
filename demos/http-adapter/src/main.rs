//! Demonstration HTTP surface over the `Queue` trait. Not part of the core
//! library: a thin adapter showing how a web framework would sit on top
//! of `voxqueue-core`, `voxqueue-store-sqlite`, and `voxqueue-worker`.
//! Never touched by the queue's own invariants or tests.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde::{Deserialize, Serialize};

use voxqueue_core::{
    Queue, QueueConfig, QueueError, Synthesizer, Task, TaskCursor, TaskItem, TaskState,
};
use voxqueue_store_sqlite::SqliteStore;
use voxqueue_synth_pool::{BlockingEngine, BlockingSynthPool, SynthPoolConfig};
use voxqueue_worker::{PrimaryWorker, RetryWorker, ShutdownHandle, TextToSpeechRequest};

/// Stands in for a real voice model (e.g. a Kokoro integration) so the
/// adapter is runnable without bundling one. Swap for a real
/// `BlockingEngine` impl to go to production.
struct PlaceholderEngine;

impl BlockingEngine for PlaceholderEngine {
    fn synthesize_blocking(
        &self,
        text: &str,
        _voice_id: &str,
    ) -> Result<Vec<u8>, voxqueue_core::SynthesisError> {
        let mut wav = b"RIFF".to_vec();
        wav.extend_from_slice(text.as_bytes());
        Ok(wav)
    }
}

#[derive(Clone)]
struct AppState {
    queue: Arc<dyn Queue>,
    synth: Arc<dyn Synthesizer>,
}

struct ApiError(QueueError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            QueueError::TaskNotFound { id } => (StatusCode::NOT_FOUND, format!("task '{id}' not found")),
            QueueError::InvalidStateTransition { .. } => (StatusCode::CONFLICT, self.0.to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()),
        };
        (status, Json(serde_json::json!({ "detail": message }))).into_response()
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        Self(err)
    }
}

#[derive(Deserialize)]
struct PublishTasksRequest {
    items: Vec<TextToSpeechRequest>,
}

#[derive(Serialize)]
struct PublishTasksResponse {
    task_ids: Vec<String>,
}

async fn publish_task(
    State(state): State<AppState>,
    Json(body): Json<PublishTasksRequest>,
) -> Result<Json<PublishTasksResponse>, ApiError> {
    if body.items.is_empty() {
        return Ok(Json(PublishTasksResponse { task_ids: Vec::new() }));
    }
    let items = body
        .items
        .into_iter()
        .map(|req| TaskItem::new(serde_json::to_value(req).expect("TextToSpeechRequest serializes")))
        .collect();
    let task_ids = state.queue.enqueue(vec![Task::new(items)]).await?;
    Ok(Json(PublishTasksResponse { task_ids }))
}

#[derive(Serialize)]
struct TaskStateInfo {
    name: &'static str,
    value: i32,
    description: &'static str,
}

#[derive(Serialize)]
struct AllStatesResponse {
    states: Vec<TaskStateInfo>,
}

async fn list_all_task_states() -> Json<AllStatesResponse> {
    let states = TaskState::ALL
        .into_iter()
        .map(|s| TaskStateInfo {
            name: s.name(),
            value: s.as_i32(),
            description: s.description(),
        })
        .collect();
    Json(AllStatesResponse { states })
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default = "default_limit")]
    limit: u32,
    cursor: Option<String>,
}

fn default_limit() -> u32 {
    50
}

#[derive(Serialize)]
struct TaskListResponse {
    tasks: Vec<Task>,
    next_cursor: Option<String>,
}

/// `cursor` is transported as `"<key>:<id>"`. A framework boundary detail;
/// `TaskCursor` itself carries no serialization opinion.
fn parse_cursor(raw: &str) -> Option<TaskCursor> {
    let (key, id) = raw.split_once(':')?;
    Some(TaskCursor {
        key: key.parse().ok()?,
        id_tiebreak: id.to_string(),
    })
}

fn encode_cursor(task: &Task, by_schedule: bool) -> String {
    let key = if by_schedule { task.schedule_at } else { task.created_at };
    format!("{key}:{}", task.id)
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let cursor = q.cursor.as_deref().and_then(parse_cursor);
    let tasks = state.queue.list_tasks(q.limit, cursor).await?;
    let next_cursor = if tasks.len() as u32 == q.limit.clamp(1, 100) {
        tasks.last().map(|t| encode_cursor(t, false))
    } else {
        None
    };
    Ok(Json(TaskListResponse { tasks, next_cursor }))
}

async fn list_tasks_by_state(
    State(state): State<AppState>,
    Path(state_param): Path<String>,
    Query(q): Query<ListQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let Some(task_state) = TaskState::parse(&state_param) else {
        return Err(ApiError(QueueError::store(anyhow::anyhow!(
            "invalid state '{state_param}'"
        ))));
    };
    let cursor = q.cursor.as_deref().and_then(parse_cursor);
    let tasks = state
        .queue
        .list_tasks_by_state(task_state, q.limit, cursor)
        .await?;
    let next_cursor = if tasks.len() as u32 == q.limit.clamp(1, 100) {
        tasks.last().map(|t| encode_cursor(t, true))
    } else {
        None
    };
    Ok(Json(TaskListResponse { tasks, next_cursor }))
}

async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    match state.queue.get_task(&task_id).await? {
        Some(task) => Ok(Json(task)),
        None => Err(ApiError(QueueError::TaskNotFound { id: task_id })),
    }
}

#[derive(Serialize)]
struct TextToSpeechResponse {
    audio: String,
    request: TextToSpeechRequest,
}

/// Synchronous single-shot synthesis, bypassing the queue entirely: the
/// direct `/tts` analogue, not durable and not retried.
async fn text_to_speech(
    State(state): State<AppState>,
    Json(request): Json<TextToSpeechRequest>,
) -> Result<Json<TextToSpeechResponse>, ApiError> {
    let audio = state
        .synth
        .synthesize(&request.text, &request.voice_id, Duration::from_secs(30))
        .await
        .map_err(|e| ApiError(QueueError::store(anyhow::anyhow!(e.to_string()))))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(audio);
    Ok(Json(TextToSpeechResponse {
        audio: encoded,
        request,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let queue_config = QueueConfig::from_env();
    let worker_config = voxqueue_core::WorkerConfig::from_env();

    let store = Arc::new(SqliteStore::connect(&queue_config).await?);
    let synth = Arc::new(BlockingSynthPool::new(PlaceholderEngine, SynthPoolConfig::from_env()));

    let shutdown = ShutdownHandle::new();
    let primary = PrimaryWorker::new(
        format!("primary-0-{}", std::process::id()),
        store.clone() as Arc<dyn Queue>,
        synth.clone() as Arc<dyn Synthesizer>,
        worker_config.clone(),
        shutdown.clone(),
    );
    let retry = RetryWorker::new(
        format!("retry-0-{}", std::process::id()),
        store.clone() as Arc<dyn Queue>,
        synth.clone() as Arc<dyn Synthesizer>,
        worker_config,
        shutdown.clone(),
    );
    tokio::spawn(async move { primary.run().await });
    tokio::spawn(async move { retry.run().await });

    let app_state = AppState {
        queue: store.clone() as Arc<dyn Queue>,
        synth: synth as Arc<dyn Synthesizer>,
    };

    let app = Router::new()
        .route("/tts", post(text_to_speech))
        .route("/tts/queue/task", post(publish_task).get(list_tasks))
        .route("/tts/queue/state", get(list_all_task_states))
        .route("/tts/queue/task/:task_id", get(get_task))
        .route("/tts/queue/:state/task", get(list_tasks_by_state))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
    tracing::info!("listening on 0.0.0.0:8000");
    axum::serve(listener, app).await?;

    shutdown.trigger();
    Ok(())
}
