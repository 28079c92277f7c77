use std::sync::Arc;
use std::time::Instant;

use tracing::warn;
use voxflow_audio::AudioWindow;
use voxflow_telemetry::{LatencySample, LatencyTracker, PipelineMetrics, PipelineStage, StageName};

use crate::engine::DenoiseEngine;

/// Preprocess result for one window. Ownership passes to the assembler.
#[derive(Debug, Clone)]
pub struct CleanedAudio {
    pub sequence_index: u64,
    pub samples: Vec<f32>,
    pub vad_score: f32,
    pub stage_latency_ms: u64,
    /// True when the engine failed and the original samples were passed
    /// through instead.
    pub degraded: bool,
}

/// Wraps the noise/VAD engine. Engine failure degrades to "treat as
/// processed": the window's original samples pass through with a zero score
/// so transcription of the same window is never blocked.
pub struct PreprocessStage {
    engine: Arc<dyn DenoiseEngine>,
    latency: Arc<LatencyTracker>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl PreprocessStage {
    pub fn new(engine: Arc<dyn DenoiseEngine>, latency: Arc<LatencyTracker>) -> Self {
        Self {
            engine,
            latency,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn process(&self, window: &AudioWindow) -> CleanedAudio {
        let started = Instant::now();
        let result = self.engine.process(&window.samples).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let cleaned = match result {
            Ok(out) => CleanedAudio {
                sequence_index: window.sequence_index,
                samples: out.samples,
                vad_score: out.vad_score.clamp(0.0, 1.0),
                stage_latency_ms: elapsed_ms,
                degraded: false,
            },
            Err(e) => {
                warn!(
                    sequence_index = window.sequence_index,
                    "Denoise engine failed, passing window through unprocessed: {}", e
                );
                if let Some(m) = &self.metrics {
                    m.increment_preprocess_failures();
                }
                CleanedAudio {
                    sequence_index: window.sequence_index,
                    samples: window.samples.clone(),
                    vad_score: 0.0,
                    stage_latency_ms: elapsed_ms,
                    degraded: true,
                }
            }
        };

        if let Some(m) = &self.metrics {
            m.mark_stage_active(PipelineStage::Preprocess);
        }
        self.latency.record(LatencySample::now(
            window.sequence_index,
            StageName::Preprocess,
            cleaned.stage_latency_ms,
        ));
        cleaned
    }
}
