use serde::{Deserialize, Serialize};
use std::time::Duration;

use voxflow_audio::segmenter::SegmenterConfig;
use voxflow_audio::SAMPLE_RATE_HZ;
use voxflow_foundation::error::PipelineError;

use crate::assembler::AssemblerConfig;

/// Pipeline-wide configuration. Deserializable from TOML; CLI flags override
/// file values in the binary. Validation happens once, before the pipeline
/// starts — an invalid configuration never runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Window duration in milliseconds. Must be > 0.
    pub window_duration_ms: u32,
    /// Input sample rate in Hz. Must be > 0.
    pub sample_rate_hz: u32,
    /// Bound on windows concurrently in the preprocess/transcribe stages.
    pub max_in_flight: usize,
    /// End-to-end latency target used by the latency report.
    pub latency_budget_ms: u64,
    /// Wait for a window's counterpart half before promoting a partial
    /// chunk. Derived from the latency budget when unset.
    pub assembly_grace_ms: Option<u64>,
    /// Drop tracking state for windows that never produce any stage result.
    /// Derived from the grace period when unset.
    pub discard_timeout_ms: Option<u64>,
    /// Downstream silence filter threshold. The assembler itself never
    /// consults this; it travels with the config for subscribers.
    pub vad_threshold: f32,
    pub language_hint: Option<String>,
    /// Broadcast capacity for emitted chunks.
    pub emit_buffer: usize,
    /// How long `stop()` waits for in-flight stage work before aborting it.
    pub drain_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_duration_ms: 3000,
            sample_rate_hz: SAMPLE_RATE_HZ,
            max_in_flight: 3,
            latency_budget_ms: 300,
            assembly_grace_ms: None,
            discard_timeout_ms: None,
            vad_threshold: 0.25,
            language_hint: None,
            emit_buffer: 256,
            drain_timeout_ms: 5000,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.window_duration_ms == 0 {
            return Err(PipelineError::Config(
                "window_duration_ms must be > 0".into(),
            ));
        }
        if self.sample_rate_hz == 0 {
            return Err(PipelineError::Config("sample_rate_hz must be > 0".into()));
        }
        if self.max_in_flight == 0 {
            return Err(PipelineError::Config("max_in_flight must be >= 1".into()));
        }
        if self.latency_budget_ms == 0 {
            return Err(PipelineError::Config(
                "latency_budget_ms must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            return Err(PipelineError::Config(
                "vad_threshold must be within [0, 1]".into(),
            ));
        }
        if self.emit_buffer == 0 {
            return Err(PipelineError::Config("emit_buffer must be >= 1".into()));
        }
        Ok(())
    }

    /// Grace period, explicit or derived as a small multiple of the
    /// expected per-stage latency.
    pub fn assembly_grace(&self) -> Duration {
        Duration::from_millis(
            self.assembly_grace_ms
                .unwrap_or(self.latency_budget_ms.saturating_mul(4)),
        )
    }

    pub fn discard_timeout(&self) -> Duration {
        Duration::from_millis(
            self.discard_timeout_ms
                .unwrap_or_else(|| (self.assembly_grace().as_millis() as u64).saturating_mul(4)),
        )
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn segmenter_config(&self) -> SegmenterConfig {
        SegmenterConfig {
            window_duration_ms: self.window_duration_ms,
            sample_rate_hz: self.sample_rate_hz,
        }
    }

    pub fn assembler_config(&self) -> AssemblerConfig {
        AssemblerConfig {
            grace_period: self.assembly_grace(),
            discard_timeout: self.discard_timeout(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, PipelineError> {
        toml::from_str(s).map_err(|e| PipelineError::Config(format!("invalid config file: {e}")))
    }
}
