use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::mpsc;

use voxflow_app::runtime::{PipelineEngines, PipelineHandle, PipelineOrchestrator};
use voxflow_app::{ConversationalChunk, PipelineConfig};
use voxflow_audio::capture::ChannelSource;
use voxflow_denoise::{DenoiseEngine, DenoiseError, DenoiseOutput, EnergyDenoiser};
use voxflow_foundation::error::PipelineError;
use voxflow_foundation::state::PipelineState;
use voxflow_stt::{NoOpEngine, SpeechEngine, SttError, Transcription};

const SAMPLE_RATE: u32 = 16_000;

fn samples_ms(ms: u64, amplitude: f32) -> Vec<f32> {
    vec![amplitude; (SAMPLE_RATE as u64 * ms / 1000) as usize]
}

fn test_config(window_ms: u32, max_in_flight: usize) -> PipelineConfig {
    PipelineConfig {
        window_duration_ms: window_ms,
        sample_rate_hz: SAMPLE_RATE,
        max_in_flight,
        // Generous enough that healthy tests never promote partials
        assembly_grace_ms: Some(2_000),
        discard_timeout_ms: Some(8_000),
        drain_timeout_ms: 2_000,
        ..Default::default()
    }
}

async fn collect_chunks(
    rx: &mut broadcast::Receiver<ConversationalChunk>,
    count: usize,
    deadline: Duration,
) -> Vec<ConversationalChunk> {
    let mut chunks = Vec::new();
    let _ = tokio::time::timeout(deadline, async {
        while chunks.len() < count {
            match rx.recv().await {
                Ok(chunk) => chunks.push(chunk),
                Err(_) => break,
            }
        }
    })
    .await;
    chunks
}

/// Counts concurrent entries across both stages; `max` observes the high
/// water mark the semaphore must bound.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

struct GaugedDenoise {
    gauge: Arc<Gauge>,
    delay: Duration,
}

#[async_trait]
impl DenoiseEngine for GaugedDenoise {
    async fn process(&self, samples: &[f32]) -> Result<DenoiseOutput, DenoiseError> {
        self.gauge.enter();
        tokio::time::sleep(self.delay).await;
        self.gauge.exit();
        Ok(DenoiseOutput {
            samples: samples.to_vec(),
            vad_score: 0.9,
        })
    }
}

struct FailingDenoise;

#[async_trait]
impl DenoiseEngine for FailingDenoise {
    async fn process(&self, _samples: &[f32]) -> Result<DenoiseOutput, DenoiseError> {
        Err(DenoiseError::Engine("always broken".into()))
    }
}

struct CountingStt {
    calls: AtomicU64,
    delay: Duration,
    gauge: Option<Arc<Gauge>>,
}

impl CountingStt {
    fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicU64::new(0),
            delay,
            gauge: None,
        }
    }
}

#[async_trait]
impl SpeechEngine for CountingStt {
    async fn transcribe(
        &self,
        _samples: &[f32],
        _language_hint: Option<&str>,
    ) -> Result<Transcription, SttError> {
        if let Some(g) = &self.gauge {
            g.enter();
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        // Uneven latency scrambles completion order across windows
        let jitter = if n % 2 == 0 { self.delay * 3 } else { self.delay };
        tokio::time::sleep(jitter).await;
        if let Some(g) = &self.gauge {
            g.exit();
        }
        Ok(Transcription {
            text: format!("utterance {n}"),
            segments: None,
        })
    }
}

struct FailingStt;

#[async_trait]
impl SpeechEngine for FailingStt {
    async fn transcribe(
        &self,
        _samples: &[f32],
        _language_hint: Option<&str>,
    ) -> Result<Transcription, SttError> {
        Err(SttError::Engine("no model".into()))
    }
}

/// Stalls forever on windows whose first sample matches `hang_on`, making
/// the stuck window deterministic regardless of task scheduling.
struct SelectiveHangStt {
    hang_on: f32,
}

#[async_trait]
impl SpeechEngine for SelectiveHangStt {
    async fn transcribe(
        &self,
        samples: &[f32],
        _language_hint: Option<&str>,
    ) -> Result<Transcription, SttError> {
        if samples.first().map(|&s| (s - self.hang_on).abs() < 1e-6) == Some(true) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(Transcription {
            text: "spoken".into(),
            segments: None,
        })
    }
}

fn start_pipeline(
    config: PipelineConfig,
    denoise: Arc<dyn DenoiseEngine>,
    stt: Arc<dyn SpeechEngine>,
) -> (mpsc::Sender<Vec<f32>>, PipelineHandle) {
    let (tx, source) = ChannelSource::channel(64);
    let handle =
        PipelineOrchestrator::start(config, Box::new(source), PipelineEngines { denoise, stt })
            .expect("pipeline should start");
    (tx, handle)
}

#[tokio::test]
async fn chunks_emit_in_order_despite_scrambled_completion() {
    let (tx, mut handle) = start_pipeline(
        test_config(500, 3),
        Arc::new(EnergyDenoiser::new()),
        Arc::new(CountingStt::new(Duration::from_millis(20))),
    );
    let mut rx = handle.subscribe();

    // 2.25s: four full 500ms windows plus a 250ms tail on source end
    tx.send(samples_ms(2250, 0.2)).await.unwrap();
    drop(tx);

    let chunks = collect_chunks(&mut rx, 5, Duration::from_secs(5)).await;
    assert_eq!(chunks.len(), 5);

    let indices: Vec<u64> = chunks.iter().map(|c| c.sequence_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    assert!(chunks.iter().all(|c| c.is_complete));
    assert_eq!(chunks[0].id, "chunk-000000");
    assert_eq!(chunks[4].duration_ms(), 250, "tail window is shorter");
    assert!(chunks.iter().all(|c| c.audio.is_some()));

    handle.stop().await.unwrap();
    assert_eq!(handle.state(), PipelineState::Stopped);
}

#[tokio::test]
async fn in_flight_windows_respect_the_concurrency_bound() {
    let gauge = Arc::new(Gauge::default());
    let denoise = Arc::new(GaugedDenoise {
        gauge: gauge.clone(),
        delay: Duration::from_millis(80),
    });
    let mut stt = CountingStt::new(Duration::from_millis(20));
    stt.gauge = Some(gauge.clone());

    let (tx, mut handle) = start_pipeline(test_config(500, 2), denoise, Arc::new(stt));
    let mut rx = handle.subscribe();

    // Five windows delivered instantly
    tx.send(samples_ms(2500, 0.2)).await.unwrap();
    drop(tx);

    let chunks = collect_chunks(&mut rx, 5, Duration::from_secs(10)).await;
    assert_eq!(chunks.len(), 5);
    assert!(
        gauge.max.load(Ordering::SeqCst) <= 2,
        "observed {} concurrent stage entries with max_in_flight=2",
        gauge.max.load(Ordering::SeqCst)
    );

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn preprocess_failure_never_blocks_transcription() {
    let (tx, mut handle) = start_pipeline(
        test_config(500, 3),
        Arc::new(FailingDenoise),
        Arc::new(CountingStt::new(Duration::from_millis(5))),
    );
    let mut rx = handle.subscribe();

    tx.send(samples_ms(1500, 0.2)).await.unwrap();
    drop(tx);

    let chunks = collect_chunks(&mut rx, 3, Duration::from_secs(5)).await;
    assert_eq!(chunks.len(), 3);
    for chunk in &chunks {
        assert_eq!(chunk.vad_score, 0.0);
        assert!(
            chunk.is_complete,
            "completeness is determined by the transcript when preprocess degrades"
        );
        assert!(!chunk.transcript.is_empty());
    }
    assert_eq!(
        handle.metrics().preprocess_failures.load(Ordering::Relaxed),
        3
    );

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn both_stages_failing_still_emits_incomplete_chunks() {
    let (tx, mut handle) = start_pipeline(
        test_config(500, 3),
        Arc::new(FailingDenoise),
        Arc::new(FailingStt),
    );
    let mut rx = handle.subscribe();

    tx.send(samples_ms(1000, 0.2)).await.unwrap();
    drop(tx);

    let chunks = collect_chunks(&mut rx, 2, Duration::from_secs(5)).await;
    assert_eq!(chunks.len(), 2);
    for chunk in &chunks {
        assert!(!chunk.is_complete);
        assert_eq!(chunk.transcript, "");
        assert_eq!(chunk.vad_score, 0.0);
    }

    handle.stop().await.unwrap();
    assert_eq!(handle.state(), PipelineState::Stopped);
}

#[tokio::test]
async fn stop_is_idempotent_and_pause_is_a_no_op_when_paused() {
    let (tx, mut handle) = start_pipeline(
        test_config(500, 3),
        Arc::new(EnergyDenoiser::new()),
        Arc::new(NoOpEngine::new()),
    );

    handle.pause().unwrap();
    handle.pause().unwrap();
    assert_eq!(handle.state(), PipelineState::Paused);
    handle.resume().unwrap();

    handle.stop().await.unwrap();
    assert_eq!(handle.state(), PipelineState::Stopped);
    handle.stop().await.unwrap();
    assert_eq!(handle.state(), PipelineState::Stopped);
    drop(tx);
}

#[tokio::test]
async fn pause_stops_window_creation_until_resume() {
    let (tx, mut handle) = start_pipeline(
        test_config(200, 3),
        Arc::new(EnergyDenoiser::new()),
        Arc::new(NoOpEngine::new()),
    );
    let mut rx = handle.subscribe();

    handle.pause().unwrap();
    tx.send(samples_ms(1000, 0.2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        rx.try_recv().is_err(),
        "no chunks may be created while paused"
    );

    handle.resume().unwrap();
    let chunks = collect_chunks(&mut rx, 5, Duration::from_secs(5)).await;
    assert_eq!(chunks.len(), 5, "paused audio is windowed after resume");

    drop(tx);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn silent_input_scores_below_the_vad_threshold() {
    let config = test_config(500, 3);
    let vad_threshold = config.vad_threshold;
    let (tx, mut handle) = start_pipeline(
        config,
        Arc::new(EnergyDenoiser::new()),
        Arc::new(NoOpEngine::new()),
    );
    let mut rx = handle.subscribe();

    tx.send(samples_ms(500, 0.0)).await.unwrap();
    drop(tx);

    let chunks = collect_chunks(&mut rx, 1, Duration::from_secs(5)).await;
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].vad_score < vad_threshold);
    assert!(chunks[0].transcript.is_empty());

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn grace_period_promotes_a_stuck_window_in_order() {
    let mut config = test_config(500, 4);
    config.assembly_grace_ms = Some(300);
    config.drain_timeout_ms = 500;

    // Window 3 carries amplitude 0.4; its transcription never finishes
    let (tx, mut handle) = start_pipeline(
        config,
        Arc::new(EnergyDenoiser::new()),
        Arc::new(SelectiveHangStt { hang_on: 0.4 }),
    );
    let mut rx = handle.subscribe();

    for k in 0..5u64 {
        tx.send(samples_ms(500, 0.1 * (k + 1) as f32)).await.unwrap();
    }
    drop(tx);

    let chunks = collect_chunks(&mut rx, 5, Duration::from_secs(10)).await;
    assert_eq!(chunks.len(), 5);

    let indices: Vec<u64> = chunks.iter().map(|c| c.sequence_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4], "promotion preserves ordering");

    let stuck = &chunks[3];
    assert!(!stuck.is_complete);
    assert_eq!(stuck.transcript, "");
    assert!(stuck.audio.is_some(), "the audio half was promoted alone");

    for chunk in chunks.iter().filter(|c| c.sequence_index != 3) {
        assert!(chunk.is_complete);
        assert_eq!(chunk.transcript, "spoken");
    }

    handle.stop().await.unwrap();
    assert_eq!(
        handle.metrics().chunks_incomplete.load(Ordering::Relaxed),
        1
    );
}

#[tokio::test]
async fn invalid_configuration_is_rejected_before_start() {
    let (_tx, source) = ChannelSource::channel(4);
    let engines = PipelineEngines {
        denoise: Arc::new(EnergyDenoiser::new()),
        stt: Arc::new(NoOpEngine::new()),
    };
    let config = PipelineConfig {
        window_duration_ms: 0,
        ..Default::default()
    };
    let err = PipelineOrchestrator::start(config, Box::new(source), engines).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
}

#[tokio::test]
async fn latency_report_covers_every_stage() {
    let (tx, mut handle) = start_pipeline(
        test_config(500, 3),
        Arc::new(EnergyDenoiser::new()),
        Arc::new(CountingStt::new(Duration::from_millis(10))),
    );
    let mut rx = handle.subscribe();

    tx.send(samples_ms(1500, 0.2)).await.unwrap();
    drop(tx);

    let chunks = collect_chunks(&mut rx, 3, Duration::from_secs(5)).await;
    assert_eq!(chunks.len(), 3);
    handle.stop().await.unwrap();

    let report = handle.latency_report();
    assert_eq!(report.preprocess.samples, 3);
    assert_eq!(report.transcribe.samples, 3);
    assert_eq!(report.assemble.samples, 3);
    assert!(report.p95_ms as f64 >= report.average_ms);
    assert!(report.p99_ms >= report.p95_ms);
    assert!(report.transcribe.average_ms >= 10.0);
}
