//! No-operation speech engine for testing and fallback.

use async_trait::async_trait;

use crate::types::Transcription;
use crate::{SpeechEngine, SttError};

/// An engine that never decodes anything. Useful for exercising the pipeline
/// without model dependencies; every window transcribes to the empty string.
#[derive(Debug, Clone, Default)]
pub struct NoOpEngine;

impl NoOpEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SpeechEngine for NoOpEngine {
    async fn transcribe(
        &self,
        _samples: &[f32],
        _language_hint: Option<&str>,
    ) -> Result<Transcription, SttError> {
        Ok(Transcription::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_returns_empty_text() {
        let engine = NoOpEngine::new();
        let out = engine.transcribe(&[0.5; 160], Some("en")).await.unwrap();
        assert!(out.text.is_empty());
        assert!(out.segments.is_none());
    }
}
