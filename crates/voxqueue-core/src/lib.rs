//! Core types for a durable, at-least-once TTS task queue: the task/state
//! model, the error taxonomy, backoff math, environment configuration, and
//! the `Queue`/`Synthesizer` trait seams that a store backend and a
//! synthesis engine implement. No IO lives here.

mod backoff;
mod config;
mod error;
mod queue;
mod synth;
mod task;

pub use backoff::backoff_ms;
pub use config::{
    QueueConfig, WorkerConfig, SYNTHESIS_ITEM_DEADLINE_SECS, WORKER_ERROR_BACKOFF_SECS,
};
pub use error::{QueueError, SynthesisError};
pub use queue::{Queue, QueueStats, TaskCursor};
pub use synth::Synthesizer;
pub use task::{now_ms, Task, TaskItem, TaskState};

pub use async_trait::async_trait;
