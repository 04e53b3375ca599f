//! AVP Player - Main entry point
//!
//! Plays one media source: a file path (symphonia) or a `testsrc:` URI.
//!
//! Exit status: 0 after a normal run, 1 on a fatal startup error, 2 on a
//! usage error.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use avp_player::audio::CpalDevice;
use avp_player::media::{open_source, DefaultDecoders};
use avp_player::signal::SignalWatcher;
use avp_player::video::HeadlessSurface;
use avp_player::{logging, Pipeline, PipelineReport, PlayerConfig};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Command-line arguments for avp-player
#[derive(Parser, Debug)]
#[command(name = "avp-player")]
#[command(about = "Audio/video playback pipeline")]
#[command(version)]
struct Args {
    /// Media file path, or a synthetic source such as
    /// testsrc:duration=2,rate=48000,channels=2,fps=25,size=320x240
    #[arg(required_unless_present = "list_devices")]
    source: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long, env = "AVP_CONFIG")]
    config: Option<PathBuf>,

    /// List audio output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let (config, config_path) = match PlayerConfig::load(args.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("avp-player: {}", e);
            return ExitCode::from(1);
        }
    };

    let log_file = match logging::init(&config.logging) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("avp-player: {}", e);
            return ExitCode::from(1);
        }
    };

    info!("Starting avp-player v{}", env!("CARGO_PKG_VERSION"));
    info!("Media backends: symphonia (files), synthetic (testsrc:), cpal audio, headless video");
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }
    if let Some(path) = &log_file {
        info!("Logging to {}", path.display());
    }

    match run(args, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(args: Args, config: PlayerConfig) -> Result<()> {
    if args.list_devices {
        for name in CpalDevice::list_devices().context("Failed to list audio devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let uri = args.source.context("No source given")?;

    let quit = CancellationToken::new();
    let watcher = SignalWatcher::spawn(quit.clone()).context("Failed to start signal watcher")?;

    let source = open_source(&uri).with_context(|| format!("Failed to open {}", uri))?;
    let mut pipeline = Pipeline::init(config.clone(), source, &DefaultDecoders)
        .context("Failed to initialize pipeline")?;

    if pipeline.audio_stream().is_some() {
        let device = CpalDevice::open(
            config.audio.device.as_deref(),
            pipeline.preferred_audio_format(),
            config.audio.buffer_frames,
        )
        .context("Failed to open audio device")?;
        pipeline
            .attach_audio(Box::new(device))
            .context("Failed to start audio output")?;
    }

    pipeline.start().context("Failed to start pipeline")?;

    let mut surface = HeadlessSurface::new(quit);
    let video = pipeline.run(&mut surface, &CancellationToken::new());
    let report = pipeline.stop();
    watcher.shutdown();

    info!(
        frames_presented = video.frames_presented,
        frames_failed = video.frames_failed,
        exit = ?video.exit,
        "Playback finished"
    );
    log_report(&report);

    Ok(())
}

fn log_report(report: &PipelineReport) {
    if let Some(demux) = &report.demux {
        info!(
            packets = demux.packets_read,
            audio = demux.audio,
            video = demux.video,
            discarded = demux.discarded,
            "Demux summary"
        );
    }
    for (name, decode) in [("audio", &report.audio_decode), ("video", &report.video_decode)] {
        if let Some(decode) = decode {
            info!(
                stream = name,
                packets = decode.packets_decoded,
                frames = decode.frames_produced,
                "Decode summary"
            );
        }
    }
    if let Some(audio) = &report.audio {
        info!(
            callbacks = audio.callbacks,
            frames = audio.frames_consumed,
            underruns = audio.underruns,
            silence_bytes = audio.silence_bytes,
            conversions = audio.resampler_rebuilds,
            "Audio summary"
        );
    }
    for (stage, status) in &report.stages {
        info!(stage, %status, "Stage status");
    }
    for (stage, reason) in report.failures() {
        warn!(stage, reason, "Stage ended with an error");
    }
    info!(
        "Remaining queues: audio packets={}, video packets={}, audio frames={}, video frames={}",
        report.remaining.audio_packets,
        report.remaining.video_packets,
        report.remaining.audio_frames,
        report.remaining.video_frames
    );
}
