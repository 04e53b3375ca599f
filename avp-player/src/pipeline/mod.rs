//! Playback pipeline
//!
//! Thread topology:
//! ```text
//! demux thread ──► audio packets ──► audio-decode thread ──► audio frames ──► device callback
//!              └─► video packets ──► video-decode thread ──► video frames ──► presentation loop
//! ```
//! The device callback writes the `SyncClock`; the presentation loop reads it.
//! Stages share nothing else: every item moves through a `HandoffQueue`.
//!
//! **Startup:** `init` (queues, clock, demux, decoders) → `attach_audio` →
//! `start` (demux, audio decode, video decode) → `run` on the presentation
//! thread.
//!
//! **Shutdown:** `stop` closes audio (recording a device stream error as an
//! `audio-output` failure), then stops video decode, audio decode
//! and demux, and returns a `PipelineReport`.

pub mod decode;
pub mod demux;
pub mod health;

pub use decode::{DecodeReport, DecodeStage, AUDIO_DECODE_STAGE, VIDEO_DECODE_STAGE};
pub use demux::{DemuxReport, DemuxStage, PacketQueue, DEMUX_STAGE};
pub use health::{PipelineHealth, StageExit, StageStatus};

use crate::audio::{AudioDevice, AudioOutput, AudioStats, AudioStatsSnapshot};
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::media::{
    AudioFrame, AudioParams, CodecParameters, DecoderFactory, DemuxSource, SampleFormat,
    StreamInfo, StreamKind, VideoFrame,
};
use crate::video::{VideoOutput, VideoReport, VideoSurface};
use avp_common::{HandoffQueue, SyncClock, TimeBase};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Health registry name of the audio device callback.
pub const AUDIO_OUTPUT_STAGE: &str = "audio-output";

/// Point-in-time lengths of the four pipeline queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSizes {
    pub audio_packets: usize,
    pub video_packets: usize,
    pub audio_frames: usize,
    pub video_frames: usize,
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub demux: Option<DemuxReport>,
    pub audio_decode: Option<DecodeReport>,
    pub video_decode: Option<DecodeReport>,
    pub audio: Option<AudioStatsSnapshot>,
    /// Final status of every stage, in registration order
    pub stages: Vec<(&'static str, StageStatus)>,
    /// Queue lengths after every stage was joined, before they were cleared
    pub remaining: QueueSizes,
}

impl PipelineReport {
    pub fn failures(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.stages.iter().filter_map(|(name, status)| match status {
            StageStatus::Failed(reason) => Some((*name, reason.as_str())),
            _ => None,
        })
    }
}

/// The assembled pipeline, owned by the presentation thread.
pub struct Pipeline {
    config: PlayerConfig,
    clock: Arc<SyncClock>,
    health: Arc<PipelineHealth>,

    audio_packets: Arc<PacketQueue>,
    video_packets: Arc<PacketQueue>,
    audio_frames: Arc<HandoffQueue<AudioFrame>>,
    video_frames: Arc<HandoffQueue<VideoFrame>>,

    demux: DemuxStage,
    audio_decode: Option<DecodeStage<AudioFrame>>,
    video_decode: Option<DecodeStage<VideoFrame>>,

    device: Option<Box<dyn AudioDevice>>,
    audio_stats: Option<Arc<AudioStats>>,
    started: bool,
    stopped: bool,
}

impl Pipeline {
    /// Create queues and clock, take the source, and open a decoder per
    /// selected stream. No thread is started.
    ///
    /// # Errors
    /// Fatal startup errors: invalid configuration, no playable stream,
    /// decoder open failure.
    pub fn init(
        config: PlayerConfig,
        source: Box<dyn DemuxSource>,
        decoders: &dyn DecoderFactory,
    ) -> Result<Self> {
        config.validate()?;

        let depth = config.pipeline.packet_queue_depth;
        let queue_wait = config.pipeline.queue_wait();
        let audio_packets = Arc::new(PacketQueue::with_capacity(depth));
        let video_packets = Arc::new(PacketQueue::with_capacity(depth));
        let audio_frames: Arc<HandoffQueue<AudioFrame>> = Arc::new(HandoffQueue::new());
        let video_frames: Arc<HandoffQueue<VideoFrame>> = Arc::new(HandoffQueue::new());
        let clock = Arc::new(SyncClock::new());
        let health = Arc::new(PipelineHealth::new());

        let mut demux = DemuxStage::new(
            Arc::clone(&audio_packets),
            Arc::clone(&video_packets),
            config.pipeline.backpressure_sleep(),
            Arc::clone(&health),
        );
        demux.init(source)?;

        if !config.audio.enabled && demux.audio_stream().is_some() {
            info!("Audio disabled by configuration");
            demux.ignore(StreamKind::Audio)?;
        }

        let audio_decode = demux
            .audio_stream()
            .map(|stream| {
                DecodeStage::init(
                    decoders,
                    stream,
                    Arc::clone(&audio_packets),
                    Arc::clone(&audio_frames),
                    queue_wait,
                    Arc::clone(&health),
                )
            })
            .transpose()?;

        let video_decode = demux
            .video_stream()
            .map(|stream| {
                DecodeStage::init(
                    decoders,
                    stream,
                    Arc::clone(&video_packets),
                    Arc::clone(&video_frames),
                    queue_wait,
                    Arc::clone(&health),
                )
            })
            .transpose()?;

        if video_decode.is_none() {
            video_frames.finish();
        }
        if audio_decode.is_none() {
            audio_frames.finish();
        }

        info!(
            audio = ?demux.audio_stream().map(|s| s.index),
            video = ?demux.video_stream().map(|s| s.index),
            packet_queue_depth = depth,
            "Pipeline initialized"
        );

        Ok(Self {
            config,
            clock,
            health,
            audio_packets,
            video_packets,
            audio_frames,
            video_frames,
            demux,
            audio_decode,
            video_decode,
            device: None,
            audio_stats: None,
            started: false,
            stopped: false,
        })
    }

    pub fn audio_stream(&self) -> Option<&StreamInfo> {
        self.demux.audio_stream()
    }

    pub fn video_stream(&self) -> Option<&StreamInfo> {
        self.demux.video_stream()
    }

    /// Format to request from the audio device: the stream's rate and
    /// channel count as interleaved signed 16-bit.
    pub fn preferred_audio_format(&self) -> Option<AudioParams> {
        match &self.audio_stream()?.params {
            CodecParameters::Audio(params) if params.sample_rate > 0 && params.channels > 0 => {
                Some(AudioParams {
                    sample_rate: params.sample_rate,
                    channels: params.channels,
                    format: SampleFormat::S16,
                })
            }
            _ => None,
        }
    }

    /// Connect the audio device and start its callback.
    ///
    /// Without an audio stream the device is closed and ignored.
    pub fn attach_audio(&mut self, mut device: Box<dyn AudioDevice>) -> Result<()> {
        if self.device.is_some() {
            return Err(Error::InvalidState("audio device already attached".to_string()));
        }

        let Some(stream) = self.demux.audio_stream() else {
            info!("No audio stream, audio device not used");
            device.close();
            return Ok(());
        };

        let spec = device.spec();
        let mut output = AudioOutput::new(
            Arc::clone(&self.audio_frames),
            Arc::clone(&self.clock),
            stream.time_base,
            spec,
            self.config.pipeline.queue_wait(),
            self.config.audio.underrun_chunk_bytes,
        );
        let stats = output.stats();
        device.start(Box::new(move |buffer: &mut [u8]| output.fill(buffer)))?;

        info!(device_format = %spec, "Audio output attached");
        self.health.register(AUDIO_OUTPUT_STAGE);
        self.health.update(AUDIO_OUTPUT_STAGE, StageStatus::Running);
        self.audio_stats = Some(stats);
        self.device = Some(device);
        Ok(())
    }

    /// Start demux, then audio decode, then video decode.
    ///
    /// An audio stream without an attached device is dropped first, so the
    /// run is video-only and the clock free-runs.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::InvalidState("pipeline already started".to_string()));
        }

        if self.device.is_none() {
            if let Some(mut stage) = self.audio_decode.take() {
                warn!("No audio device attached, playing without audio");
                self.demux.ignore(StreamKind::Audio)?;
                stage.stop();
                self.audio_frames.finish();
            }
        }

        self.started = true;
        let result = self.start_stages();
        if result.is_err() {
            self.stop();
        }
        result
    }

    fn start_stages(&mut self) -> Result<()> {
        self.demux.start()?;
        if let Some(stage) = self.audio_decode.as_mut() {
            stage.start()?;
        }
        if let Some(stage) = self.video_decode.as_mut() {
            stage.start()?;
        }
        info!("Pipeline started");
        Ok(())
    }

    /// Run the presentation loop on the calling thread until quit,
    /// cancellation or (if configured) end of playback.
    pub fn run(&self, surface: &mut dyn VideoSurface, cancel: &CancellationToken) -> VideoReport {
        let time_base = self
            .video_stream()
            .map(|s| s.time_base)
            .unwrap_or(TimeBase::MILLISECONDS);

        let mut video = VideoOutput::new(
            Arc::clone(&self.video_frames),
            Arc::clone(&self.clock),
            time_base,
            self.config.video.max_rest(),
            self.config.video.idle_rest(),
        );
        if self.config.video.exit_on_end {
            let audio = self
                .device
                .as_ref()
                .map(|_| Arc::clone(&self.audio_frames));
            video = video.exit_on_end(audio);
        }

        video.run(surface, cancel)
    }

    /// Stop every stage in shutdown order. Safe to call more than once;
    /// later calls return an empty report.
    pub fn stop(&mut self) -> PipelineReport {
        if self.stopped {
            return self.empty_report();
        }
        self.stopped = true;

        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.pause() {
                warn!(error = %e, "Failed to pause audio device");
            }
            device.close();
            let status = if device.has_error() {
                StageStatus::Failed("audio device stream error".to_string())
            } else {
                StageStatus::Completed
            };
            self.health.update(AUDIO_OUTPUT_STAGE, status);
        }

        let video_decode = self.video_decode.as_mut().and_then(|stage| stage.stop());
        let audio_decode = self.audio_decode.as_mut().and_then(|stage| stage.stop());
        let demux = self.demux.stop();

        let remaining = self.queue_sizes();
        let discarded = self.audio_packets.clear()
            + self.video_packets.clear()
            + self.audio_frames.clear()
            + self.video_frames.clear();
        if discarded > 0 {
            debug!(discarded, "Released queued items");
        }

        for (stage, reason) in self.health.failures() {
            warn!(stage, reason = %reason, "Stage failed during playback");
        }

        info!(
            audio_packets = remaining.audio_packets,
            video_packets = remaining.video_packets,
            audio_frames = remaining.audio_frames,
            video_frames = remaining.video_frames,
            "Pipeline stopped"
        );

        PipelineReport {
            demux,
            audio_decode,
            video_decode,
            audio: self.audio_stats.as_ref().map(|stats| stats.snapshot()),
            stages: self.health.snapshot(),
            remaining,
        }
    }

    fn empty_report(&self) -> PipelineReport {
        PipelineReport {
            demux: None,
            audio_decode: None,
            video_decode: None,
            audio: self.audio_stats.as_ref().map(|stats| stats.snapshot()),
            stages: self.health.snapshot(),
            remaining: self.queue_sizes(),
        }
    }

    pub fn queue_sizes(&self) -> QueueSizes {
        QueueSizes {
            audio_packets: self.audio_packets.len(),
            video_packets: self.video_packets.len(),
            audio_frames: self.audio_frames.len(),
            video_frames: self.video_frames.len(),
        }
    }

    pub fn clock(&self) -> Arc<SyncClock> {
        Arc::clone(&self.clock)
    }

    pub fn health(&self) -> Arc<PipelineHealth> {
        Arc::clone(&self.health)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.started && !self.stopped {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::synthetic::{SyntheticSource, SyntheticSpec};
    use crate::media::DefaultDecoders;

    fn synthetic(spec: SyntheticSpec) -> Box<dyn DemuxSource> {
        Box::new(SyntheticSource::new(spec).unwrap())
    }

    #[test]
    fn test_init_opens_decoders() {
        let pipeline = Pipeline::init(
            PlayerConfig::default(),
            synthetic(SyntheticSpec::default()),
            &DefaultDecoders,
        )
        .unwrap();

        assert_eq!(pipeline.audio_stream().map(|s| s.index), Some(0));
        assert_eq!(pipeline.video_stream().map(|s| s.index), Some(1));
        assert_eq!(
            pipeline.preferred_audio_format(),
            Some(AudioParams {
                sample_rate: 48000,
                channels: 2,
                format: SampleFormat::S16,
            })
        );
        assert_eq!(pipeline.queue_sizes(), QueueSizes::default());
    }

    #[test]
    fn test_audio_disabled_by_config() {
        let mut config = PlayerConfig::default();
        config.audio.enabled = false;

        let pipeline =
            Pipeline::init(config, synthetic(SyntheticSpec::default()), &DefaultDecoders).unwrap();
        assert!(pipeline.audio_stream().is_none());
        assert!(pipeline.preferred_audio_format().is_none());
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let mut config = PlayerConfig::default();
        config.pipeline.packet_queue_depth = 0;

        let result = Pipeline::init(config, synthetic(SyntheticSpec::default()), &DefaultDecoders);
        let err = result.err().unwrap();
        assert!(err.is_fatal_init());
    }

    #[test]
    fn test_video_only_run_without_device() {
        let spec = SyntheticSpec {
            duration: std::time::Duration::from_millis(200),
            fps: 50,
            ..Default::default()
        };
        let mut pipeline =
            Pipeline::init(PlayerConfig::default(), synthetic(spec), &DefaultDecoders).unwrap();
        pipeline.start().unwrap();
        assert!(pipeline.audio_stream().is_none());

        let mut surface = crate::video::HeadlessSurface::new(CancellationToken::new());
        let video = pipeline.run(&mut surface, &CancellationToken::new());
        let report = pipeline.stop();

        assert_eq!(video.exit, crate::video::ExitReason::EndOfStream);
        assert_eq!(video.frames_presented, 10);
        assert_eq!(report.remaining, QueueSizes::default());
        assert!(report.audio.is_none());
        assert_eq!(report.failures().count(), 0);

        // Second stop is harmless
        assert!(pipeline.stop().demux.is_none());
    }
}
