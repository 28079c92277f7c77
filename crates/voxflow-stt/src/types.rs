//! Core types for speech-to-text results.

/// One decoded sub-span with timestamps relative to the window start.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Raw engine output for one window.
#[derive(Debug, Clone, Default)]
pub struct Transcription {
    /// Decoded text; empty when no speech was detected.
    pub text: String,
    pub segments: Option<Vec<TranscriptSegment>>,
}

/// Transcribe-stage result for one window. Ownership passes to the
/// assembler.
#[derive(Debug, Clone)]
pub struct TranscriptResult {
    pub sequence_index: u64,
    pub text: String,
    pub segments: Option<Vec<TranscriptSegment>>,
    pub stage_latency_ms: u64,
    /// True when the engine failed and an empty transcript was substituted.
    pub degraded: bool,
}
