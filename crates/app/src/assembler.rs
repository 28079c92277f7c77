use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use voxflow_denoise::CleanedAudio;
use voxflow_foundation::clock::SharedClock;
use voxflow_stt::TranscriptResult;
use voxflow_telemetry::{LatencySample, LatencyTracker, PipelineMetrics, PipelineStage, StageName};

use crate::chunk::ConversationalChunk;

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// How long to wait for a window's counterpart half after the first half
    /// arrives before promoting a partial chunk.
    pub grace_period: Duration,
    /// How long a registered window may sit with no stage result at all
    /// before its tracking state is dropped and the release floor advances.
    pub discard_timeout: Duration,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(1200),
            discard_timeout: Duration::from_millis(4800),
        }
    }
}

struct PendingWindow {
    start_ms: u64,
    end_ms: u64,
    registered_at: Instant,
    first_half_at: Option<Instant>,
    audio: Option<CleanedAudio>,
    transcript: Option<TranscriptResult>,
}

struct StagedChunk {
    chunk: ConversationalChunk,
    registered_at: Instant,
    first_half_at: Instant,
}

/// Joins preprocess and transcribe outputs per sequence index and releases
/// chunks strictly in index order, regardless of which stage finished last.
///
/// All operations are synchronous and non-suspending; the orchestrator's
/// assembler task drives `poll_timeouts` on a timer. Time is read through
/// the injected [`SharedClock`] so the grace/discard policies are testable
/// with a virtual clock.
pub struct ChunkAssembler {
    cfg: AssemblerConfig,
    clock: SharedClock,
    pending: HashMap<u64, PendingWindow>,
    ready: BTreeMap<u64, StagedChunk>,
    /// Indices dropped by the discard policy; the release floor walks
    /// through these instead of stalling.
    discarded: BTreeSet<u64>,
    next_release: u64,
    latency: Option<Arc<LatencyTracker>>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl ChunkAssembler {
    pub fn new(cfg: AssemblerConfig, clock: SharedClock) -> Self {
        Self {
            cfg,
            clock,
            pending: HashMap::new(),
            ready: BTreeMap::new(),
            discarded: BTreeSet::new(),
            next_release: 0,
            latency: None,
            metrics: None,
        }
    }

    pub fn with_latency(mut self, latency: Arc<LatencyTracker>) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start tracking a window the moment the segmenter emits it. The
    /// registration time anchors both end-to-end latency and the discard
    /// timeout.
    pub fn register_window(&mut self, sequence_index: u64, start_ms: u64, end_ms: u64) {
        if sequence_index < self.next_release || self.pending.contains_key(&sequence_index) {
            debug!(sequence_index, "Duplicate window registration ignored");
            return;
        }
        let now = self.clock.now();
        self.pending.insert(
            sequence_index,
            PendingWindow {
                start_ms,
                end_ms,
                registered_at: now,
                first_half_at: None,
                audio: None,
                transcript: None,
            },
        );
    }

    pub fn offer_audio(&mut self, cleaned: CleanedAudio) -> Vec<ConversationalChunk> {
        let seq = cleaned.sequence_index;
        let now = self.clock.now();
        let Some(pw) = self.pending.get_mut(&seq) else {
            debug!(
                sequence_index = seq,
                "Audio half arrived for an already-settled window, dropping"
            );
            return Vec::new();
        };
        pw.first_half_at.get_or_insert(now);
        pw.audio = Some(cleaned);
        if pw.transcript.is_some() {
            self.seal(seq)
        } else {
            Vec::new()
        }
    }

    pub fn offer_transcript(&mut self, transcript: TranscriptResult) -> Vec<ConversationalChunk> {
        let seq = transcript.sequence_index;
        let now = self.clock.now();
        let Some(pw) = self.pending.get_mut(&seq) else {
            debug!(
                sequence_index = seq,
                "Transcript half arrived for an already-settled window, dropping"
            );
            return Vec::new();
        };
        pw.first_half_at.get_or_insert(now);
        pw.transcript = Some(transcript);
        if pw.audio.is_some() {
            self.seal(seq)
        } else {
            Vec::new()
        }
    }

    /// Promote windows whose grace period elapsed and discard windows that
    /// never produced anything; returns any chunks this unblocked.
    pub fn poll_timeouts(&mut self) -> Vec<ConversationalChunk> {
        let now = self.clock.now();
        let mut to_promote = Vec::new();
        let mut to_discard = Vec::new();

        for (&seq, pw) in &self.pending {
            match pw.first_half_at {
                Some(first) => {
                    if now.duration_since(first) >= self.cfg.grace_period {
                        to_promote.push(seq);
                    }
                }
                None => {
                    if now.duration_since(pw.registered_at) >= self.cfg.discard_timeout {
                        to_discard.push(seq);
                    }
                }
            }
        }

        for seq in to_discard {
            warn!(
                sequence_index = seq,
                "No stage result before the discard timeout, dropping window"
            );
            self.discard(seq);
        }

        to_promote.sort_unstable();
        let mut released = Vec::new();
        for seq in to_promote {
            debug!(
                sequence_index = seq,
                "Grace period elapsed, promoting partial chunk"
            );
            released.extend(self.seal(seq));
        }
        released.extend(self.release_ready());
        released
    }

    /// Stop-path drain: promote every window with at least one half, discard
    /// the rest, and release everything in order.
    pub fn force_drain(&mut self) -> Vec<ConversationalChunk> {
        let mut seqs: Vec<u64> = self.pending.keys().copied().collect();
        seqs.sort_unstable();

        let mut released = Vec::new();
        for seq in seqs {
            let has_half = self
                .pending
                .get(&seq)
                .map(|p| p.audio.is_some() || p.transcript.is_some())
                .unwrap_or(false);
            if has_half {
                released.extend(self.seal(seq));
            } else {
                self.discard(seq);
            }
        }
        released.extend(self.release_ready());
        released
    }

    pub fn pending_windows(&self) -> usize {
        self.pending.len()
    }

    pub fn next_release(&self) -> u64 {
        self.next_release
    }

    fn discard(&mut self, seq: u64) {
        self.pending.remove(&seq);
        self.discarded.insert(seq);
        if let Some(m) = &self.metrics {
            m.increment_chunks_discarded();
        }
    }

    /// Build the chunk for `seq` from whatever halves are present, stage it,
    /// and release everything that is now in order.
    ///
    /// Completeness: both halves must be present, and at least one of them
    /// must be a genuine engine result rather than a failure substitute.
    fn seal(&mut self, seq: u64) -> Vec<ConversationalChunk> {
        let Some(pw) = self.pending.remove(&seq) else {
            return Vec::new();
        };

        let audio_ok = pw.audio.as_ref().map(|a| !a.degraded).unwrap_or(false);
        let transcript_ok = pw.transcript.as_ref().map(|t| !t.degraded).unwrap_or(false);
        let both_present = pw.audio.is_some() && pw.transcript.is_some();
        let is_complete = both_present && (audio_ok || transcript_ok);

        let vad_score = pw.audio.as_ref().map(|a| a.vad_score).unwrap_or(0.0);
        let chunk = ConversationalChunk {
            id: ConversationalChunk::id_for(seq),
            sequence_index: seq,
            audio: pw.audio.map(|a| Arc::from(a.samples)),
            transcript: pw.transcript.map(|t| t.text).unwrap_or_default(),
            start_ms: pw.start_ms,
            end_ms: pw.end_ms,
            vad_score,
            is_complete,
            processing_latency_ms: 0, // finalized at release
        };

        self.ready.insert(
            seq,
            StagedChunk {
                chunk,
                registered_at: pw.registered_at,
                first_half_at: pw.first_half_at.unwrap_or(pw.registered_at),
            },
        );
        self.release_ready()
    }

    fn release_ready(&mut self) -> Vec<ConversationalChunk> {
        let mut released = Vec::new();
        loop {
            if let Some(staged) = self.ready.remove(&self.next_release) {
                let now = self.clock.now();
                let mut chunk = staged.chunk;
                chunk.processing_latency_ms =
                    now.duration_since(staged.registered_at).as_millis() as u64;

                if let Some(l) = &self.latency {
                    l.record(LatencySample::now(
                        chunk.sequence_index,
                        StageName::Assemble,
                        now.duration_since(staged.first_half_at).as_millis() as u64,
                    ));
                    l.record(LatencySample::now(
                        chunk.sequence_index,
                        StageName::EndToEnd,
                        chunk.processing_latency_ms,
                    ));
                }
                if let Some(m) = &self.metrics {
                    m.increment_chunks_emitted();
                    if !chunk.is_complete {
                        m.increment_chunks_incomplete();
                    }
                    m.mark_stage_active(PipelineStage::Assemble);
                }

                released.push(chunk);
                self.next_release += 1;
            } else if self.discarded.remove(&self.next_release) {
                self.next_release += 1;
            } else {
                break;
            }
        }
        released
    }
}
