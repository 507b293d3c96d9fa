//! The synthesizer capability boundary. The core depends only on this; voice
//! catalogs, model loading, and waveform generation live entirely behind
//! whatever implements this trait.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SynthesisError;

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesizes `text` with `voice_id`, returning WAV-encoded audio.
    /// Implementations must respect `deadline` and return
    /// `SynthesisError::Timeout` rather than blocking past it.
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        deadline: Duration,
    ) -> Result<Vec<u8>, SynthesisError>;
}
