use async_trait::async_trait;

use crate::engine::{DenoiseEngine, DenoiseError, DenoiseOutput};

/// Built-in energy-based engine: passes audio through unchanged and derives
/// the voice-activity score from RMS level in dBFS. No model dependencies,
/// so the pipeline runs end-to-end out of the box; swap in a real engine for
/// production noise suppression.
pub struct EnergyDenoiser {
    /// Level at or below which the score is 0.
    floor_dbfs: f32,
    /// Level at or above which the score is 1.
    ceiling_dbfs: f32,
}

impl Default for EnergyDenoiser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnergyDenoiser {
    pub fn new() -> Self {
        Self {
            floor_dbfs: -60.0,
            ceiling_dbfs: -20.0,
        }
    }

    pub fn with_range(floor_dbfs: f32, ceiling_dbfs: f32) -> Self {
        Self {
            floor_dbfs,
            ceiling_dbfs,
        }
    }

    pub fn calculate_rms(&self, samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum_squares / samples.len() as f64).sqrt() as f32
    }

    pub fn rms_to_dbfs(&self, rms: f32) -> f32 {
        if rms <= 1e-10 {
            return -100.0;
        }
        20.0 * rms.log10()
    }

    fn score(&self, samples: &[f32]) -> f32 {
        let dbfs = self.rms_to_dbfs(self.calculate_rms(samples));
        ((dbfs - self.floor_dbfs) / (self.ceiling_dbfs - self.floor_dbfs)).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl DenoiseEngine for EnergyDenoiser {
    async fn process(&self, samples: &[f32]) -> Result<DenoiseOutput, DenoiseError> {
        Ok(DenoiseOutput {
            samples: samples.to_vec(),
            vad_score: self.score(samples),
        })
    }
}
