//! Bridges the async worker loops to a CPU-bound, likely-blocking TTS
//! engine.
//!
//! The pool size is independent of worker batch size and governs peak CPU
//! concurrency regardless of how many task workers are active. A
//! [`Semaphore`] gates entry so that, even though `tokio::task::spawn_blocking`
//! has its own much larger internal thread budget, only `max_workers` calls
//! ever run at once; each call is wrapped in [`tokio::time::timeout`] against
//! the caller-supplied deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use voxqueue_core::{SynthesisError, Synthesizer};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthPoolConfig {
    pub max_workers: usize,
    pub generation_timeout_secs: u64,
    pub voice_preload_timeout_secs: u64,
}

impl Default for SynthPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            generation_timeout_secs: 30,
            voice_preload_timeout_secs: 30,
        }
    }
}

impl SynthPoolConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_workers: env_or("TTS_THREAD_POOL_MAX_WORKERS", default.max_workers),
            generation_timeout_secs: env_or(
                "TTS_GENERATION_TIMEOUT",
                default.generation_timeout_secs,
            ),
            voice_preload_timeout_secs: env_or(
                "VOICE_PRELOAD_TIMEOUT",
                default.voice_preload_timeout_secs,
            ),
        }
    }
}

/// The blocking half of the engine boundary: whatever wraps the actual
/// model/voice catalog implements this, synchronously, on a
/// `spawn_blocking` thread. Kept separate from [`Synthesizer`] (the async
/// trait the queue/workers see) so an engine author never has to think
/// about tokio.
pub trait BlockingEngine: Send + Sync + 'static {
    fn synthesize_blocking(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, SynthesisError>;
}

/// Bounds concurrent calls into a [`BlockingEngine`] and enforces a
/// per-call deadline, independent of how many worker tasks are fanned out
/// above it.
pub struct BlockingSynthPool<E> {
    engine: Arc<E>,
    permits: Arc<Semaphore>,
}

impl<E: BlockingEngine> BlockingSynthPool<E> {
    pub fn new(engine: E, config: SynthPoolConfig) -> Self {
        Self {
            engine: Arc::new(engine),
            permits: Arc::new(Semaphore::new(config.max_workers.max(1))),
        }
    }
}

impl<E> Clone for BlockingSynthPool<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            permits: Arc::clone(&self.permits),
        }
    }
}

#[async_trait]
impl<E: BlockingEngine> Synthesizer for BlockingSynthPool<E> {
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        deadline: Duration,
    ) -> Result<Vec<u8>, SynthesisError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("synth pool semaphore is never closed");

        let engine = Arc::clone(&self.engine);
        let text = text.to_string();
        let voice_id = voice_id.to_string();

        let call = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            engine.synthesize_blocking(&text, &voice_id)
        });

        match tokio::time::timeout(deadline, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                tracing::error!(voice_id = %voice_id, %join_err, "synthesis task panicked");
                Err(SynthesisError::Generation(format!(
                    "synthesis task panicked: {join_err}"
                )))
            }
            Err(_elapsed) => {
                tracing::warn!(voice_id = %voice_id, ?deadline, "synthesis timed out");
                Err(SynthesisError::Timeout(deadline))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEngine {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl BlockingEngine for CountingEngine {
        fn synthesize_blocking(&self, text: &str, _voice_id: &str) -> Result<Vec<u8>, SynthesisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(text.as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn synthesizes_successfully() {
        let pool = BlockingSynthPool::new(
            CountingEngine {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(1),
            },
            SynthPoolConfig {
                max_workers: 2,
                ..Default::default()
            },
        );

        let audio = pool
            .synthesize("hello", "v1", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(audio, b"hello");
    }

    #[tokio::test]
    async fn times_out_past_deadline() {
        struct SlowEngine;
        impl BlockingEngine for SlowEngine {
            fn synthesize_blocking(&self, _text: &str, _voice_id: &str) -> Result<Vec<u8>, SynthesisError> {
                std::thread::sleep(Duration::from_millis(200));
                Ok(vec![])
            }
        }

        let pool = BlockingSynthPool::new(SlowEngine, SynthPoolConfig::default());
        let result = pool
            .synthesize("hello", "v1", Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(SynthesisError::Timeout(_))));
    }

    #[tokio::test]
    async fn bounds_concurrency_to_max_workers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        struct TrackingEngine {
            calls: Arc<AtomicUsize>,
            max_seen: Arc<AtomicUsize>,
        }
        impl BlockingEngine for TrackingEngine {
            fn synthesize_blocking(&self, _text: &str, _voice_id: &str) -> Result<Vec<u8>, SynthesisError> {
                let cur = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(cur, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                self.calls.fetch_sub(1, Ordering::SeqCst);
                Ok(vec![])
            }
        }

        let pool = BlockingSynthPool::new(
            TrackingEngine {
                calls: Arc::clone(&calls),
                max_seen: Arc::clone(&max_seen),
            },
            SynthPoolConfig {
                max_workers: 2,
                ..Default::default()
            },
        );

        let mut handles = Vec::new();
        for i in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.synthesize(&format!("t{i}"), "v1", Duration::from_secs(2))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
