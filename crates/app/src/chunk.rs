use serde::Serialize;
use std::sync::Arc;

/// The unit emitted to presentation-layer subscribers: one window's cleaned
/// audio joined with its transcript and timing metadata.
///
/// Emitted at most once per sequence index, in strictly increasing index
/// order. `is_complete` is false when the assembler promoted a partial
/// result after the grace period, or when every stage result for the window
/// was a failure substitute.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationalChunk {
    pub id: String,
    pub sequence_index: u64,
    /// Cleaned audio for the window; `None` when the chunk was promoted
    /// without its audio half.
    #[serde(skip_serializing)]
    pub audio: Option<Arc<[f32]>>,
    pub transcript: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub vad_score: f32,
    pub is_complete: bool,
    /// End-to-end latency from window creation to emission.
    pub processing_latency_ms: u64,
}

impl ConversationalChunk {
    pub fn id_for(sequence_index: u64) -> String {
        format!("chunk-{:06}", sequence_index)
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}
