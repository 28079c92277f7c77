use std::sync::Arc;
use std::time::Instant;

use tracing::warn;
use voxflow_denoise::CleanedAudio;
use voxflow_telemetry::{LatencySample, LatencyTracker, PipelineMetrics, PipelineStage, StageName};

use crate::types::TranscriptResult;
use crate::SpeechEngine;

/// Wraps the speech-to-text engine. Invoked only after the same window's
/// preprocess result exists; windows with different sequence indices
/// transcribe concurrently up to the orchestrator's bound. Engine failure
/// degrades to an empty transcript and never propagates to the caller.
pub struct TranscribeStage {
    engine: Arc<dyn SpeechEngine>,
    language_hint: Option<String>,
    latency: Arc<LatencyTracker>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl TranscribeStage {
    pub fn new(engine: Arc<dyn SpeechEngine>, latency: Arc<LatencyTracker>) -> Self {
        Self {
            engine,
            language_hint: None,
            latency,
            metrics: None,
        }
    }

    pub fn with_language_hint(mut self, hint: Option<String>) -> Self {
        self.language_hint = hint;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn process(&self, cleaned: &CleanedAudio) -> TranscriptResult {
        let started = Instant::now();
        let result = self
            .engine
            .transcribe(&cleaned.samples, self.language_hint.as_deref())
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let transcript = match result {
            Ok(out) => {
                if let Some(m) = &self.metrics {
                    m.increment_transcriptions();
                }
                TranscriptResult {
                    sequence_index: cleaned.sequence_index,
                    text: out.text,
                    segments: out.segments,
                    stage_latency_ms: elapsed_ms,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(
                    sequence_index = cleaned.sequence_index,
                    "Speech engine failed, substituting empty transcript: {}", e
                );
                if let Some(m) = &self.metrics {
                    m.increment_transcribe_failures();
                }
                TranscriptResult {
                    sequence_index: cleaned.sequence_index,
                    text: String::new(),
                    segments: None,
                    stage_latency_ms: elapsed_ms,
                    degraded: true,
                }
            }
        };

        if let Some(m) = &self.metrics {
            m.mark_stage_active(PipelineStage::Transcribe);
        }
        self.latency.record(LatencySample::now(
            cleaned.sequence_index,
            StageName::Transcribe,
            transcript.stage_latency_ms,
        ));
        transcript
    }
}
