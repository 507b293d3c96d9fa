//! Test fixtures and doubles shared across the workspace: nothing here
//! ships to production, it only supports the other crates' test suites.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use voxqueue_core::{QueueConfig, SynthesisError, Synthesizer, Task, TaskItem};
use voxqueue_store_sqlite::SqliteStore;

/// A fresh, schema-initialized, in-memory `SqliteStore` with default
/// retry/backoff settings. Each call gets its own isolated database.
pub async fn temp_sqlite_store() -> anyhow::Result<SqliteStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect("sqlite::memory:")
        .await?;
    SqliteStore::from_pool(pool, QueueConfig::default()).await
}

/// Builds a pending, unenqueued `Task` with one item per `(text, voice_id)`
/// pair.
pub fn task_with_items(pairs: &[(&str, &str)]) -> Task {
    let items = pairs
        .iter()
        .map(|(text, voice_id)| {
            TaskItem::new(serde_json::json!({ "text": text, "voice_id": voice_id }))
        })
        .collect();
    Task::new(items)
}

/// A `Synthesizer` double that returns a deterministic fake WAV payload
/// without touching any real audio library. Can be configured to fail for
/// specific voice ids to exercise the retry path.
#[derive(Default)]
pub struct EchoSynthesizer {
    failing_voices: Mutex<HashMap<String, SynthFailure>>,
    call_count: std::sync::atomic::AtomicUsize,
}

#[derive(Clone)]
pub enum SynthFailure {
    VoiceNotFound,
    Timeout,
    Generation(String),
}

impl EchoSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_voice(&self, voice_id: &str, failure: SynthFailure) {
        self.failing_voices
            .lock()
            .unwrap()
            .insert(voice_id.to_string(), failure);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for EchoSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        _deadline: Duration,
    ) -> Result<Vec<u8>, SynthesisError> {
        self.call_count
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        if let Some(failure) = self.failing_voices.lock().unwrap().get(voice_id).cloned() {
            return Err(match failure {
                SynthFailure::VoiceNotFound => SynthesisError::VoiceNotFound {
                    voice_id: voice_id.to_string(),
                },
                SynthFailure::Timeout => SynthesisError::Timeout(_deadline),
                SynthFailure::Generation(msg) => SynthesisError::Generation(msg),
            });
        }

        // A tiny, well-formed enough "WAV" stand-in: callers only assert on
        // the base64 envelope shape, never decode real audio.
        let mut wav = b"RIFF".to_vec();
        wav.extend_from_slice(text.as_bytes());
        Ok(wav)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_synthesizer_returns_deterministic_bytes() {
        let synth = EchoSynthesizer::new();
        let audio = synth
            .synthesize("hi", "v1", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(audio.starts_with(b"RIFF"));
        assert_eq!(synth.call_count(), 1);
    }

    #[tokio::test]
    async fn echo_synthesizer_can_be_configured_to_fail() {
        let synth = EchoSynthesizer::new();
        synth.fail_voice("bad-voice", SynthFailure::VoiceNotFound);
        let err = synth
            .synthesize("hi", "bad-voice", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::VoiceNotFound { .. }));
    }
}
