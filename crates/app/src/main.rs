use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use voxflow_app::runtime::{PipelineEngines, PipelineOrchestrator};
use voxflow_app::PipelineConfig;
use voxflow_audio::capture::ChannelSource;
use voxflow_denoise::EnergyDenoiser;
use voxflow_foundation::shutdown::ShutdownHandler;
use voxflow_stt::NoOpEngine;

#[derive(Parser, Debug)]
#[command(
    name = "voxflow",
    about = "Chunked streaming voice pipeline demo: synthetic capture through preprocess, transcribe, and ordered chunk assembly"
)]
struct Cli {
    /// Window duration in milliseconds
    #[arg(long)]
    window_ms: Option<u32>,

    /// Maximum windows concurrently in flight
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Seconds of synthetic audio to feed before stopping
    #[arg(long, default_value_t = 12)]
    run_secs: u64,

    /// Optional TOML config file; CLI flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print chunks as JSON lines instead of the human-readable form
    #[arg(long)]
    json: bool,
}

fn init_logging() -> anyhow::Result<()> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "voxflow.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr.and(non_blocking_file))
        .with_env_filter(log_level)
        .init();
    std::mem::forget(guard);
    Ok(())
}

/// Feed alternating seconds of tone and silence at real-time pace, 100ms
/// blocks. The sender is dropped when the run ends, which ends the capture
/// source naturally.
fn spawn_synthetic_source(run_secs: u64, sample_rate_hz: u32) -> ChannelSource {
    let (tx, source) = ChannelSource::channel(64);
    tokio::spawn(async move {
        let block_len = (sample_rate_hz / 10) as usize;
        let mut phase: f32 = 0.0;
        let step = 2.0 * std::f32::consts::PI * 220.0 / sample_rate_hz as f32;

        for block_idx in 0..run_secs * 10 {
            let speaking = (block_idx / 10) % 2 == 0;
            let samples: Vec<f32> = if speaking {
                (0..block_len)
                    .map(|_| {
                        phase += step;
                        phase.sin() * 0.4
                    })
                    .collect()
            } else {
                vec![0.0; block_len]
            };
            if tx.send(samples).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });
    source
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    info!("Starting VoxFlow pipeline demo");

    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            PipelineConfig::from_toml_str(&raw)?
        }
        None => PipelineConfig::default(),
    };
    if let Some(window_ms) = cli.window_ms {
        config.window_duration_ms = window_ms;
    }
    if let Some(max_in_flight) = cli.max_in_flight {
        config.max_in_flight = max_in_flight;
    }

    let source = spawn_synthetic_source(cli.run_secs, config.sample_rate_hz);
    let engines = PipelineEngines {
        denoise: Arc::new(EnergyDenoiser::new()),
        stt: Arc::new(NoOpEngine::new()),
    };
    let vad_threshold = config.vad_threshold;
    let mut handle = PipelineOrchestrator::start(config, Box::new(source), engines)?;

    let mut chunks = handle.subscribe();
    let json = cli.json;
    let printer = tokio::spawn(async move {
        while let Ok(chunk) = chunks.recv().await {
            if json {
                if let Ok(line) = serde_json::to_string(&chunk) {
                    println!("{line}");
                }
            } else {
                println!(
                    "[{}] {:>6}..{:<6}ms vad={:.2} complete={} latency={}ms{}",
                    chunk.id,
                    chunk.start_ms,
                    chunk.end_ms,
                    chunk.vad_score,
                    chunk.is_complete,
                    chunk.processing_latency_ms,
                    if chunk.vad_score < vad_threshold {
                        " (silence)"
                    } else {
                        ""
                    }
                );
            }
        }
    });

    let shutdown = ShutdownHandler::new().install().await;
    tokio::select! {
        _ = shutdown.wait() => info!("Interrupted, shutting down"),
        _ = tokio::time::sleep(Duration::from_secs(cli.run_secs + 2)) => {}
    }

    handle.stop().await?;
    printer.abort();

    let report = handle.latency_report();
    let metrics = handle.metrics();
    info!(
        "Latency: avg={:.1}ms p95={}ms p99={}ms target_met={} trend={:?}",
        report.average_ms, report.p95_ms, report.p99_ms, report.target_met, report.trend
    );
    info!(
        "Stages: preprocess avg={:.1}ms, transcribe avg={:.1}ms, assemble avg={:.1}ms",
        report.preprocess.average_ms, report.transcribe.average_ms, report.assemble.average_ms
    );
    info!(
        "Chunks: emitted={} incomplete={} discarded={}",
        metrics
            .chunks_emitted
            .load(std::sync::atomic::Ordering::Relaxed),
        metrics
            .chunks_incomplete
            .load(std::sync::atomic::Ordering::Relaxed),
        metrics
            .chunks_discarded
            .load(std::sync::atomic::Ordering::Relaxed),
    );
    Ok(())
}
