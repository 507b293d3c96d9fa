//! The error taxonomy shared across the store, workers, and any adapter.

use crate::task::TaskState;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("task {id} not found")]
    TaskNotFound { id: String },

    #[error("cannot transition task {id} to {attempted:?}: expected {expected:?}, found {actual:?}")]
    InvalidStateTransition {
        id: String,
        expected: TaskState,
        actual: TaskState,
        attempted: TaskState,
    },

    #[error("queue store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("failed to (de)serialize task payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("voice not found: {voice_id}")]
    VoiceNotFound { voice_id: String },

    #[error("synthesis timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("synthesis failed: {0}")]
    Generation(String),
}

impl QueueError {
    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        QueueError::Store(err.into())
    }
}
