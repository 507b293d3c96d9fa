//! The shape a `TaskItem.request` payload must deserialize into: text,
//! voice, and free-form metadata.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextToSpeechRequest {
    pub text: String,
    pub voice_id: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}
