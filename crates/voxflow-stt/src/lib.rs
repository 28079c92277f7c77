//! Speech-to-text abstraction layer for VoxFlow.
//!
//! Provides the [`SpeechEngine`] contract for external decoders and the
//! [`stage::TranscribeStage`] wrapper that absorbs engine failures.

use async_trait::async_trait;
use thiserror::Error;

pub mod noop;
pub mod stage;
pub mod types;

pub use noop::NoOpEngine;
pub use stage::TranscribeStage;
pub use types::{TranscriptResult, TranscriptSegment, Transcription};

#[derive(Error, Debug)]
pub enum SttError {
    #[error("Engine failure: {0}")]
    Engine(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
}

/// Core transcription interface.
///
/// Implementations receive cleaned mono samples for one window and return
/// decoded text, optionally with sub-span timestamps. Engines are shared
/// singletons injected as `Arc<dyn SpeechEngine>`; only the owning stage may
/// invoke them.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn transcribe(
        &self,
        samples: &[f32],
        language_hint: Option<&str>,
    ) -> Result<Transcription, SttError>;
}
