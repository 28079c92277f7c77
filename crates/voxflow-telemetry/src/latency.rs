use parking_lot::RwLock;
use std::collections::VecDeque;
use std::time::Instant;

/// Default per-stage ring capacity. At ~3s windows this covers well over ten
/// minutes of history.
pub const DEFAULT_RING_CAPACITY: usize = 256;

/// Minimum end-to-end samples before a trend is reported.
const MIN_TREND_SAMPLES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageName {
    Preprocess,
    Transcribe,
    Assemble,
    EndToEnd,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Preprocess => "preprocess",
            StageName::Transcribe => "transcribe",
            StageName::Assemble => "assemble",
            StageName::EndToEnd => "end-to-end",
        }
    }
}

/// One timing observation for one window at one stage.
#[derive(Debug, Clone)]
pub struct LatencySample {
    pub sequence_index: u64,
    pub stage: StageName,
    pub duration_ms: u64,
    pub recorded_at: Instant,
}

impl LatencySample {
    pub fn now(sequence_index: u64, stage: StageName, duration_ms: u64) -> Self {
        Self {
            sequence_index,
            stage,
            duration_ms,
            recorded_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyTrend {
    Improving,
    Degrading,
    Stable,
}

#[derive(Debug, Clone, Default)]
pub struct StageStats {
    pub average_ms: f64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub samples: usize,
}

#[derive(Debug, Clone)]
pub struct LatencyReport {
    /// End-to-end rolling statistics.
    pub average_ms: f64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    /// True when the end-to-end rolling average is below the budget. An
    /// empty window trivially meets the target.
    pub target_met: bool,
    pub trend: LatencyTrend,
    pub preprocess: StageStats,
    pub transcribe: StageStats,
    pub assemble: StageStats,
}

#[derive(Debug, Default)]
struct Rings {
    preprocess: VecDeque<LatencySample>,
    transcribe: VecDeque<LatencySample>,
    assemble: VecDeque<LatencySample>,
    end_to_end: VecDeque<LatencySample>,
}

impl Rings {
    fn ring_mut(&mut self, stage: StageName) -> &mut VecDeque<LatencySample> {
        match stage {
            StageName::Preprocess => &mut self.preprocess,
            StageName::Transcribe => &mut self.transcribe,
            StageName::Assemble => &mut self.assemble,
            StageName::EndToEnd => &mut self.end_to_end,
        }
    }
}

/// Bounded rolling latency window per stage. `record` is called from stage
/// wrappers and the assembler; `report` from whoever wants statistics.
#[derive(Debug)]
pub struct LatencyTracker {
    rings: RwLock<Rings>,
    capacity: usize,
    budget_ms: u64,
}

impl LatencyTracker {
    pub fn new(budget_ms: u64) -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY, budget_ms)
    }

    pub fn with_capacity(capacity: usize, budget_ms: u64) -> Self {
        Self {
            rings: RwLock::new(Rings::default()),
            capacity: capacity.max(1),
            budget_ms,
        }
    }

    pub fn budget_ms(&self) -> u64 {
        self.budget_ms
    }

    pub fn record(&self, sample: LatencySample) {
        let mut rings = self.rings.write();
        let ring = rings.ring_mut(sample.stage);
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(sample);
    }

    pub fn samples(&self, stage: StageName) -> usize {
        let mut rings = self.rings.write();
        rings.ring_mut(stage).len()
    }

    pub fn report(&self) -> LatencyReport {
        let rings = self.rings.read();
        let e2e: Vec<u64> = rings.end_to_end.iter().map(|s| s.duration_ms).collect();
        let headline = stage_stats(&e2e);

        LatencyReport {
            average_ms: headline.average_ms,
            p95_ms: headline.p95_ms,
            p99_ms: headline.p99_ms,
            target_met: e2e.is_empty() || headline.average_ms < self.budget_ms as f64,
            trend: trend_of(&e2e),
            preprocess: stage_stats(
                &rings
                    .preprocess
                    .iter()
                    .map(|s| s.duration_ms)
                    .collect::<Vec<_>>(),
            ),
            transcribe: stage_stats(
                &rings
                    .transcribe
                    .iter()
                    .map(|s| s.duration_ms)
                    .collect::<Vec<_>>(),
            ),
            assemble: stage_stats(
                &rings
                    .assemble
                    .iter()
                    .map(|s| s.duration_ms)
                    .collect::<Vec<_>>(),
            ),
        }
    }
}

fn stage_stats(durations: &[u64]) -> StageStats {
    if durations.is_empty() {
        return StageStats::default();
    }
    let sum: u64 = durations.iter().sum();
    let mut sorted = durations.to_vec();
    sorted.sort_unstable();
    StageStats {
        average_ms: sum as f64 / durations.len() as f64,
        p95_ms: percentile(&sorted, 0.95),
        p99_ms: percentile(&sorted, 0.99),
        samples: durations.len(),
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[u64], q: f64) -> u64 {
    let rank = ((sorted.len() as f64) * q).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Compare the most recent third of samples against the earliest third with
/// 10% hysteresis so jitter does not flap the classification.
fn trend_of(durations: &[u64]) -> LatencyTrend {
    if durations.len() < MIN_TREND_SAMPLES {
        return LatencyTrend::Stable;
    }
    let third = durations.len() / 3;
    let earliest: f64 =
        durations[..third].iter().sum::<u64>() as f64 / third as f64;
    let recent: f64 = durations[durations.len() - third..].iter().sum::<u64>() as f64 / third as f64;

    if recent < earliest * 0.9 {
        LatencyTrend::Improving
    } else if recent > earliest * 1.1 {
        LatencyTrend::Degrading
    } else {
        LatencyTrend::Stable
    }
}
