use anyhow::{Context, Result};
use avrecorder::capture::{SourceHub, TestPatternSource, ToneSource};
use avrecorder::{Config, Recorder, RecordingEvent};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about = "Record a synthetic tone and test pattern", long_about = None)]
struct CliArgs {
    /// TOML config file
    #[arg(short, long, value_name = "FILE_PATH")]
    config: Option<PathBuf>,

    /// Seconds to record
    #[arg(short, long, default_value_t = 5.0)]
    duration: f64,

    /// Overrides [recording] output_dir
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Tone frequency in Hz
    #[arg(long, default_value_t = 440.0)]
    tone: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    avrecorder::init_tracing();
    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = args.output_dir {
        config.recording.output_dir = dir;
    }
    config.validate()?;

    let origin = Instant::now();
    let hub = SourceHub::new()
        .with_source(Arc::new(TestPatternSource::new(&config.video.params, origin)))
        .with_source(Arc::new(ToneSource::new(
            args.tone,
            config.audio.params.clone(),
            origin,
        )));

    let recorder = Recorder::new(config, Arc::new(hub));
    let mut events = recorder.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RecordingEvent::TrackReady { track, kind, .. } => {
                    tracing::info!(%track, %kind, "Track ready")
                }
                RecordingEvent::Error { message, .. } => tracing::error!(%message, "Recording error"),
                _ => tracing::debug!(?event, "Recording event"),
            }
        }
    });

    let session = recorder.start().context("Failed to start recording")?;
    tracing::info!(path = %session.output_path.display(), seconds = args.duration, "Recording");

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(args.duration.max(0.0))) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    let Some(handle) = recorder.stop() else {
        anyhow::bail!("Recording was not active");
    };
    let summary = handle.finalized().await;

    for track in &summary.index.tracks {
        tracing::info!(
            track = %track.name,
            samples = track.samples,
            bytes = track.bytes,
            duration_ms = track.duration_us() / 1000,
            failed = track.failed,
            "Track summary"
        );
    }
    match summary.phase {
        avrecorder::container::WriterPhase::Closed => {
            println!("{}", session.output_path.display());
            Ok(())
        }
        phase => anyhow::bail!("Recording ended {phase:?}, no output written"),
    }
}
