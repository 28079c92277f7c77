use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use voxflow_audio::capture::CaptureSource;
use voxflow_audio::segmenter::{AudioWindow, WindowSegmenter};
use voxflow_denoise::{CleanedAudio, DenoiseEngine, PreprocessStage};
use voxflow_foundation::clock::real_clock;
use voxflow_foundation::error::PipelineError;
use voxflow_foundation::state::{PipelineState, StateManager};
use voxflow_stt::{SpeechEngine, TranscribeStage, TranscriptResult};
use voxflow_telemetry::{LatencyReport, LatencyTracker, PipelineMetrics, ThroughputTracker};

use crate::assembler::ChunkAssembler;
use crate::chunk::ConversationalChunk;
use crate::config::PipelineConfig;

/// How often the paused capture loop rechecks state. Cheap enough to poll;
/// resume latency stays well under one window duration.
const PAUSE_POLL: Duration = Duration::from_millis(25);

/// Queue depth between the capture/stage side and the assembler task.
const ASSEMBLER_QUEUE: usize = 256;

/// Externally-owned engine handles, injected at construction. The
/// orchestrator owns their lifecycle for the duration of a run; no component
/// other than the owning stage wrapper may invoke them.
pub struct PipelineEngines {
    pub denoise: Arc<dyn DenoiseEngine>,
    pub stt: Arc<dyn SpeechEngine>,
}

enum AssemblerMsg {
    Register {
        sequence_index: u64,
        start_ms: u64,
        end_ms: u64,
    },
    Audio(CleanedAudio),
    Transcript(TranscriptResult),
}

/// Owns the pipeline lifecycle: `start` wires capture, the two stages, the
/// assembler, and telemetry together; the returned [`PipelineHandle`]
/// controls pause/resume/stop and exposes the chunk subscription.
pub struct PipelineOrchestrator;

impl PipelineOrchestrator {
    pub fn start(
        config: PipelineConfig,
        source: Box<dyn CaptureSource>,
        engines: PipelineEngines,
    ) -> Result<PipelineHandle, PipelineError> {
        config.validate()?;

        let state = Arc::new(StateManager::new());
        state.transition(PipelineState::Running)?;

        let metrics = Arc::new(PipelineMetrics::default());
        let latency = Arc::new(LatencyTracker::new(config.latency_budget_ms));
        let (chunk_tx, _) = broadcast::channel(config.emit_buffer);
        let (asm_tx, asm_rx) = mpsc::channel(ASSEMBLER_QUEUE);
        let (stop_tx, stop_rx) = watch::channel(false);

        let assembler = ChunkAssembler::new(config.assembler_config(), real_clock())
            .with_latency(latency.clone())
            .with_metrics(metrics.clone());
        let tick =
            Duration::from_millis((config.assembly_grace().as_millis() as u64 / 4).max(10));
        let assembler_handle =
            tokio::spawn(run_assembler(assembler, asm_rx, chunk_tx.clone(), tick));

        let preprocess = Arc::new(
            PreprocessStage::new(engines.denoise, latency.clone()).with_metrics(metrics.clone()),
        );
        let transcribe = Arc::new(
            TranscribeStage::new(engines.stt, latency.clone())
                .with_language_hint(config.language_hint.clone())
                .with_metrics(metrics.clone()),
        );
        let segmenter =
            WindowSegmenter::new(config.segmenter_config()).with_metrics(metrics.clone());

        let worker = CaptureWorker {
            source,
            segmenter,
            preprocess,
            transcribe,
            asm_tx,
            semaphore: Arc::new(Semaphore::new(config.max_in_flight)),
            state: state.clone(),
            stop_rx,
            metrics: metrics.clone(),
            drain_timeout: config.drain_timeout(),
            throughput: ThroughputTracker::new(),
        };
        let capture_handle = tokio::spawn(worker.run());

        Ok(PipelineHandle {
            config,
            state,
            metrics,
            latency,
            chunk_tx,
            stop_tx,
            capture_handle: Some(capture_handle),
            assembler_handle: Some(assembler_handle),
        })
    }
}

/// Handle to a running pipeline.
#[derive(Debug)]
pub struct PipelineHandle {
    config: PipelineConfig,
    state: Arc<StateManager>,
    metrics: Arc<PipelineMetrics>,
    latency: Arc<LatencyTracker>,
    chunk_tx: broadcast::Sender<ConversationalChunk>,
    stop_tx: watch::Sender<bool>,
    capture_handle: Option<JoinHandle<()>>,
    assembler_handle: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Subscribe to emitted chunks (multiple subscribers supported).
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationalChunk> {
        self.chunk_tx.subscribe()
    }

    pub fn state(&self) -> PipelineState {
        self.state.current()
    }

    pub fn subscribe_state(&self) -> crossbeam_channel::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    pub fn latency_report(&self) -> LatencyReport {
        self.latency.report()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stop creating new windows from the capture source. In-flight windows
    /// keep processing; a second `pause()` is a no-op.
    pub fn pause(&self) -> Result<(), PipelineError> {
        self.state.transition(PipelineState::Paused)
    }

    pub fn resume(&self) -> Result<(), PipelineError> {
        self.state.transition(PipelineState::Running)
    }

    /// Flush the segmenter, drain in-flight stage work (bounded by the drain
    /// timeout), settle the assembler, and transition to Stopped. No chunk
    /// is delivered after this returns; calling `stop()` again has no
    /// additional effect.
    pub async fn stop(&mut self) -> Result<(), PipelineError> {
        match self.state.current() {
            PipelineState::Stopped => return Ok(()),
            PipelineState::Error { .. } => {}
            _ => self.state.transition(PipelineState::Stopping)?,
        }

        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.capture_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.assembler_handle.take() {
            let _ = handle.await;
        }

        if !matches!(self.state.current(), PipelineState::Error { .. }) {
            self.state.transition(PipelineState::Stopped)?;
        }
        Ok(())
    }
}

/// Resolves once stop has been requested (or the handle was dropped).
async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

struct CaptureWorker {
    source: Box<dyn CaptureSource>,
    segmenter: WindowSegmenter,
    preprocess: Arc<PreprocessStage>,
    transcribe: Arc<TranscribeStage>,
    asm_tx: mpsc::Sender<AssemblerMsg>,
    semaphore: Arc<Semaphore>,
    state: Arc<StateManager>,
    stop_rx: watch::Receiver<bool>,
    metrics: Arc<PipelineMetrics>,
    drain_timeout: Duration,
    throughput: ThroughputTracker,
}

impl CaptureWorker {
    async fn run(mut self) {
        info!("Capture loop started");
        let mut tasks: JoinSet<()> = JoinSet::new();
        // Blocks that arrived in the same poll as a pause request; windowed
        // only after resume so pause never creates new windows.
        let mut backlog: Vec<Vec<f32>> = Vec::new();

        'capture: loop {
            match self.state.current() {
                PipelineState::Running => {
                    for samples in std::mem::take(&mut backlog) {
                        if !self.ingest(&samples, &mut tasks).await {
                            break 'capture;
                        }
                    }
                }
                PipelineState::Paused => {
                    tokio::select! {
                        _ = stop_requested(&mut self.stop_rx) => break,
                        _ = tokio::time::sleep(PAUSE_POLL) => continue,
                    }
                }
                _ => break,
            }

            let block = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop_rx) => break,
                block = self.source.next_block() => block,
            };

            match block {
                Ok(Some(samples)) => {
                    if matches!(self.state.current(), PipelineState::Paused) {
                        backlog.push(samples);
                        continue;
                    }
                    if !self.ingest(&samples, &mut tasks).await {
                        break;
                    }
                }
                Ok(None) => {
                    info!("Capture source ended");
                    break;
                }
                Err(e) if e.is_fatal() => {
                    error!("Capture source failed: {}", e);
                    let _ = self.state.transition(PipelineState::Error {
                        message: e.to_string(),
                    });
                    break;
                }
                Err(e) => {
                    warn!("Transient capture error: {}", e);
                }
            }
        }

        // Settle audio captured while paused, then the tail window left in
        // the segmenter when capture stopped mid-window
        if !matches!(self.state.current(), PipelineState::Error { .. }) {
            for samples in std::mem::take(&mut backlog) {
                if !self.ingest(&samples, &mut tasks).await {
                    break;
                }
            }
            if let Some(tail) = self.segmenter.flush() {
                self.dispatch(tail, &mut tasks).await;
            }
        }
        self.source.close();

        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            warn!(
                "In-flight stage work exceeded the drain deadline, aborting {} tasks",
                tasks.len()
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        info!("Capture loop stopped");
    }

    /// Window a block of samples and dispatch every full window it yields.
    /// Returns false when stop was requested mid-dispatch.
    async fn ingest(&mut self, samples: &[f32], tasks: &mut JoinSet<()>) -> bool {
        for window in self.segmenter.push(samples) {
            if !self.dispatch(window, tasks).await {
                return false;
            }
        }
        true
    }

    /// Register the window with the assembler, wait for an in-flight slot
    /// (FIFO by sequence index), and spawn the preprocess→transcribe chain.
    /// Returns false when stop was requested while waiting for a slot.
    async fn dispatch(&mut self, window: AudioWindow, tasks: &mut JoinSet<()>) -> bool {
        if let Some(rate) = self.throughput.tick() {
            self.metrics.update_window_rate(rate);
        }

        let registered = self
            .asm_tx
            .send(AssemblerMsg::Register {
                sequence_index: window.sequence_index,
                start_ms: window.start_ms,
                end_ms: window.end_ms,
            })
            .await;
        if registered.is_err() {
            return false;
        }

        let semaphore = self.semaphore.clone();
        let permit = tokio::select! {
            biased;
            _ = stop_requested(&mut self.stop_rx) => None,
            permit = semaphore.acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            debug!(
                sequence_index = window.sequence_index,
                "Stop requested before dispatch, dropping window"
            );
            return false;
        };

        let preprocess = self.preprocess.clone();
        let transcribe = self.transcribe.clone();
        let asm_tx = self.asm_tx.clone();
        let metrics = self.metrics.clone();
        metrics.window_entered_flight();

        tasks.spawn(async move {
            let _permit = permit;
            let cleaned = preprocess.process(&window).await;
            if asm_tx
                .send(AssemblerMsg::Audio(cleaned.clone()))
                .await
                .is_err()
            {
                metrics.window_left_flight();
                return;
            }
            let transcript = transcribe.process(&cleaned).await;
            let _ = asm_tx.send(AssemblerMsg::Transcript(transcript)).await;
            metrics.window_left_flight();
        });
        true
    }
}

async fn run_assembler(
    mut assembler: ChunkAssembler,
    mut rx: mpsc::Receiver<AssemblerMsg>,
    chunk_tx: broadcast::Sender<ConversationalChunk>,
    tick: Duration,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(AssemblerMsg::Register { sequence_index, start_ms, end_ms }) => {
                    assembler.register_window(sequence_index, start_ms, end_ms);
                }
                Some(AssemblerMsg::Audio(cleaned)) => {
                    emit(&chunk_tx, assembler.offer_audio(cleaned));
                }
                Some(AssemblerMsg::Transcript(transcript)) => {
                    emit(&chunk_tx, assembler.offer_transcript(transcript));
                }
                None => {
                    // All stage senders gone: settle leftovers and finish
                    emit(&chunk_tx, assembler.force_drain());
                    break;
                }
            },
            _ = ticker.tick() => {
                emit(&chunk_tx, assembler.poll_timeouts());
            }
        }
    }
    info!("Assembler task stopped");
}

fn emit(chunk_tx: &broadcast::Sender<ConversationalChunk>, chunks: Vec<ConversationalChunk>) {
    for chunk in chunks {
        // A broadcast send fails only when nobody is subscribed; the chunk
        // stream is fire-and-forget from the pipeline's perspective.
        if chunk_tx.send(chunk).is_err() {
            debug!("No active chunk subscribers");
        }
    }
}
