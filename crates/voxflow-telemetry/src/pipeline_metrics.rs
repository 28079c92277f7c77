use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Shared counters for cross-task pipeline monitoring. Shared as
/// `Arc<PipelineMetrics>`; every field is atomic so readers never block the
/// pipeline.
#[derive(Debug)]
pub struct PipelineMetrics {
    // Audio level monitoring (normalized f32 samples)
    pub current_peak_milli: AtomicU64, // peak * 1000
    pub current_rms_milli: AtomicU64,  // RMS * 1000
    pub audio_level_db: AtomicI64,     // dBFS * 10

    // Pipeline stage tracking
    pub stage_segmenter: AtomicBool,
    pub stage_preprocess: AtomicBool,
    pub stage_transcribe: AtomicBool,
    pub stage_assemble: AtomicBool,

    // Event counters
    pub windows_segmented: AtomicU64,
    pub preprocess_failures: AtomicU64,
    pub transcriptions: AtomicU64,
    pub transcribe_failures: AtomicU64,
    pub chunks_emitted: AtomicU64,
    pub chunks_incomplete: AtomicU64,
    pub chunks_discarded: AtomicU64,

    // Throughput
    pub windows_per_sec_x10: AtomicU64,

    // Backpressure gauge
    pub windows_in_flight: AtomicUsize,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            current_peak_milli: AtomicU64::new(0),
            current_rms_milli: AtomicU64::new(0),
            // Silence floor until the first block is measured
            audio_level_db: AtomicI64::new(-1000),

            stage_segmenter: AtomicBool::new(false),
            stage_preprocess: AtomicBool::new(false),
            stage_transcribe: AtomicBool::new(false),
            stage_assemble: AtomicBool::new(false),

            windows_segmented: AtomicU64::new(0),
            preprocess_failures: AtomicU64::new(0),
            transcriptions: AtomicU64::new(0),
            transcribe_failures: AtomicU64::new(0),
            chunks_emitted: AtomicU64::new(0),
            chunks_incomplete: AtomicU64::new(0),
            chunks_discarded: AtomicU64::new(0),

            windows_per_sec_x10: AtomicU64::new(0),

            windows_in_flight: AtomicUsize::new(0),
        }
    }
}

impl PipelineMetrics {
    pub fn update_audio_level(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
        self.current_peak_milli
            .store((peak * 1000.0) as u64, Ordering::Relaxed);

        let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        let rms = (sum / samples.len() as f64).sqrt();
        self.current_rms_milli
            .store((rms * 1000.0) as u64, Ordering::Relaxed);

        let db = if rms > 1e-10 {
            (20.0 * rms.log10() * 10.0) as i64
        } else {
            -1000
        };
        self.audio_level_db.store(db, Ordering::Relaxed);
    }

    pub fn mark_stage_active(&self, stage: PipelineStage) {
        match stage {
            PipelineStage::Segmenter => self.stage_segmenter.store(true, Ordering::Relaxed),
            PipelineStage::Preprocess => self.stage_preprocess.store(true, Ordering::Relaxed),
            PipelineStage::Transcribe => self.stage_transcribe.store(true, Ordering::Relaxed),
            PipelineStage::Assemble => self.stage_assemble.store(true, Ordering::Relaxed),
        }
    }

    /// Reset stage-active flags; called by dashboards between refreshes so a
    /// stalled stage shows up as inactive.
    pub fn decay_stages(&self) {
        self.stage_segmenter.store(false, Ordering::Relaxed);
        self.stage_preprocess.store(false, Ordering::Relaxed);
        self.stage_transcribe.store(false, Ordering::Relaxed);
        self.stage_assemble.store(false, Ordering::Relaxed);
    }

    pub fn increment_windows_segmented(&self) {
        self.windows_segmented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_preprocess_failures(&self) {
        self.preprocess_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_transcriptions(&self) {
        self.transcriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_transcribe_failures(&self) {
        self.transcribe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_chunks_emitted(&self) {
        self.chunks_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_chunks_incomplete(&self) {
        self.chunks_incomplete.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_chunks_discarded(&self) {
        self.chunks_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_window_rate(&self, rate: f64) {
        self.windows_per_sec_x10
            .store((rate * 10.0) as u64, Ordering::Relaxed);
    }

    pub fn window_entered_flight(&self) {
        self.windows_in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub fn window_left_flight(&self) {
        self.windows_in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.windows_in_flight.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum PipelineStage {
    Segmenter,
    Preprocess,
    Transcribe,
    Assemble,
}

/// Windows-per-second tracker, ticked once per emitted window.
#[derive(Debug)]
pub struct ThroughputTracker {
    last_update: Instant,
    count: u64,
}

impl Default for ThroughputTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self {
            last_update: Instant::now(),
            count: 0,
        }
    }

    pub fn tick(&mut self) -> Option<f64> {
        self.count += 1;
        let elapsed = self.last_update.elapsed();

        if elapsed >= Duration::from_secs(1) {
            let rate = self.count as f64 / elapsed.as_secs_f64();
            self.last_update = Instant::now();
            self.count = 0;
            Some(rate)
        } else {
            None
        }
    }
}
