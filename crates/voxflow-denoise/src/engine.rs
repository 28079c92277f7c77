use async_trait::async_trait;
use thiserror::Error;

/// Result of running one window through the noise/VAD engine.
#[derive(Debug, Clone)]
pub struct DenoiseOutput {
    pub samples: Vec<f32>,
    /// Voice-activity confidence in [0,1]. The stage wrapper clamps
    /// out-of-range engine values.
    pub vad_score: f32,
}

#[derive(Error, Debug)]
pub enum DenoiseError {
    #[error("Engine failure: {0}")]
    Engine(String),

    #[error("Engine not initialized")]
    NotInitialized,
}

/// A trait for noise-suppression / voice-activity engines.
///
/// Implementations receive a window of raw samples and return cleaned audio
/// plus a voice-activity score. Engines are shared singletons injected as
/// `Arc<dyn DenoiseEngine>`; only the owning stage may invoke them.
#[async_trait]
pub trait DenoiseEngine: Send + Sync {
    async fn process(&self, samples: &[f32]) -> Result<DenoiseOutput, DenoiseError>;
}
