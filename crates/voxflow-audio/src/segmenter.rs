use std::collections::VecDeque;
use std::sync::Arc;

use voxflow_telemetry::{PipelineMetrics, PipelineStage};

use crate::SAMPLE_RATE_HZ;

/// A bounded slice of the input stream, tagged with a monotonic sequence
/// index and timestamps relative to pipeline start.
#[derive(Debug, Clone)]
pub struct AudioWindow {
    pub sequence_index: u64,
    pub start_ms: u64,
    pub end_ms: u64,
    pub samples: Vec<f32>,
    /// True only for the final partial window emitted by `flush`.
    pub is_tail: bool,
}

impl AudioWindow {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub window_duration_ms: u32,
    pub sample_rate_hz: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            window_duration_ms: 3000,
            sample_rate_hz: SAMPLE_RATE_HZ,
        }
    }
}

impl SegmenterConfig {
    pub fn window_size_samples(&self) -> usize {
        (self.sample_rate_hz as u64 * self.window_duration_ms as u64 / 1000) as usize
    }
}

/// Buffers the incoming sample stream and slices it into fixed-duration
/// windows. Pure buffering: `push` never suspends and never drops samples.
///
/// Sequence indices start at 0 and increment by exactly 1 per emitted window
/// for the lifetime of one run. Timestamps derive from the running sample
/// count, so they are exact regardless of how ragged the input blocks are.
pub struct WindowSegmenter {
    cfg: SegmenterConfig,
    buffer: VecDeque<f32>,
    next_index: u64,
    samples_windowed: u64,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl WindowSegmenter {
    pub fn new(cfg: SegmenterConfig) -> Self {
        let cap = cfg.window_size_samples().saturating_mul(2);
        Self {
            cfg,
            buffer: VecDeque::with_capacity(cap),
            next_index: 0,
            samples_windowed: 0,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Append captured samples; emits one window per full window-duration of
    /// accumulated audio and retains the remainder. A zero-length push is a
    /// no-op.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioWindow> {
        if samples.is_empty() {
            return Vec::new();
        }

        if let Some(m) = &self.metrics {
            m.update_audio_level(samples);
            m.mark_stage_active(PipelineStage::Segmenter);
        }

        self.buffer.extend(samples.iter().copied());

        let size = self.cfg.window_size_samples();
        let mut windows = Vec::new();
        while self.buffer.len() >= size {
            let samples: Vec<f32> = self.buffer.drain(..size).collect();
            windows.push(self.make_window(samples, false));
        }
        windows
    }

    /// Emit whatever remains as a final partial tail window. Used when
    /// capture stops mid-window; returns `None` when nothing is buffered.
    pub fn flush(&mut self) -> Option<AudioWindow> {
        if self.buffer.is_empty() {
            return None;
        }
        let samples: Vec<f32> = self.buffer.drain(..).collect();
        Some(self.make_window(samples, true))
    }

    pub fn pending_samples(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_sequence_index(&self) -> u64 {
        self.next_index
    }

    fn make_window(&mut self, samples: Vec<f32>, is_tail: bool) -> AudioWindow {
        let rate = self.cfg.sample_rate_hz as u64;
        let start_ms = self.samples_windowed * 1000 / rate;
        self.samples_windowed += samples.len() as u64;
        let end_ms = self.samples_windowed * 1000 / rate;

        let window = AudioWindow {
            sequence_index: self.next_index,
            start_ms,
            end_ms,
            samples,
            is_tail,
        };
        self.next_index += 1;

        if let Some(m) = &self.metrics {
            m.increment_windows_segmented();
        }
        window
    }
}
