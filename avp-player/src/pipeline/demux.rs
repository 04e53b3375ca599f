//! Demux stage
//!
//! One thread reading packets from the source and routing them to the audio
//! and video packet queues.
//!
//! **Lifecycle:** Idle → `init(source)` → Ready → `start()` → Running →
//! `stop()` → Stopped
//!
//! **Backpressure:** while either packet queue is above its high-water mark
//! the loop sleeps and issues no reads. A packet read just before a queue
//! saturates is held and retried with `try_push`, so nothing is pushed past
//! the mark unobserved.
//!
//! **Cancellation:** checked at every loop iteration. A read in progress
//! cannot be interrupted, so shutdown takes at most one read.

use crate::error::{Error, Result};
use crate::media::{DemuxSource, Packet, ReadOutcome, StreamInfo, StreamKind};
use crate::pipeline::health::{PipelineHealth, StageExit, StageStatus};
use avp_common::HandoffQueue;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Stage name used for the thread and in the health registry.
pub const DEMUX_STAGE: &str = "demux";

/// Queue of compressed packets between demux and one decode stage.
pub type PacketQueue = HandoffQueue<Packet>;

/// Counters returned when the demux loop exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemuxReport {
    /// Packets read from the source
    pub packets_read: u64,
    /// Packets routed to the audio queue
    pub audio: u64,
    /// Packets routed to the video queue
    pub video: u64,
    /// Packets of unselected streams, dropped
    pub discarded: u64,
    pub exit: StageExit,
}

/// Stream indices the loop routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRouting {
    pub audio: Option<u32>,
    pub video: Option<u32>,
}

impl StreamRouting {
    pub fn classify(&self, stream_index: u32) -> StreamKind {
        if self.audio == Some(stream_index) {
            StreamKind::Audio
        } else if self.video == Some(stream_index) {
            StreamKind::Video
        } else {
            StreamKind::Other
        }
    }
}

/// Pick the stream of `kind` to play: the source's default, else the first.
pub fn select_stream(streams: &[StreamInfo], kind: StreamKind) -> Option<&StreamInfo> {
    let mut candidates = streams.iter().filter(|s| s.kind() == kind);
    let first = candidates.next()?;
    if first.is_default {
        return Some(first);
    }
    Some(candidates.find(|s| s.is_default).unwrap_or(first))
}

/// Everything the demux loop needs, owned by its thread.
pub struct DemuxLoop {
    pub source: Box<dyn DemuxSource>,
    pub routing: StreamRouting,
    pub audio_queue: Arc<PacketQueue>,
    pub video_queue: Arc<PacketQueue>,
    pub backpressure_sleep: Duration,
    pub cancel: CancellationToken,
}

impl DemuxLoop {
    /// Run until end of stream, a read error, or cancellation.
    ///
    /// Both packet queues are finished on exit so the decode stages can
    /// drain and complete.
    pub fn run(mut self) -> DemuxReport {
        let mut report = DemuxReport {
            packets_read: 0,
            audio: 0,
            video: 0,
            discarded: 0,
            exit: StageExit::Completed,
        };
        let mut held: Option<Packet> = None;

        report.exit = loop {
            if self.cancel.is_cancelled() {
                break StageExit::Cancelled;
            }

            if let Some(packet) = held.take() {
                let queue = self.queue_for(packet.kind);
                if let Err(packet) = queue.try_push(packet) {
                    trace!(queue_len = queue.len(), "Packet queue saturated, holding packet");
                    held = Some(packet);
                    thread::sleep(self.backpressure_sleep);
                }
                continue;
            }

            if self.audio_queue.is_saturated() || self.video_queue.is_saturated() {
                trace!(
                    audio_len = self.audio_queue.len(),
                    video_len = self.video_queue.len(),
                    "Packet queues saturated, backing off"
                );
                thread::sleep(self.backpressure_sleep);
                continue;
            }

            match self.source.read_next_packet() {
                Ok(ReadOutcome::Packet(mut packet)) => {
                    report.packets_read += 1;
                    packet.kind = self.routing.classify(packet.stream_index);
                    match packet.kind {
                        StreamKind::Audio => report.audio += 1,
                        StreamKind::Video => report.video += 1,
                        StreamKind::Other => {
                            report.discarded += 1;
                            continue;
                        }
                    }
                    held = Some(packet);
                }
                Ok(ReadOutcome::EndOfStream) => {
                    debug!(packets = report.packets_read, "Demux reached end of stream");
                    break StageExit::Completed;
                }
                Err(e) => {
                    error!(error = %e, "Demux read failed, stopping");
                    break StageExit::Failed(e.to_string());
                }
            }
        };

        self.audio_queue.finish();
        self.video_queue.finish();
        self.source.close();

        info!(
            packets_read = report.packets_read,
            audio = report.audio,
            video = report.video,
            discarded = report.discarded,
            exit = ?report.exit,
            "Demux stage exited"
        );

        report
    }

    fn queue_for(&self, kind: StreamKind) -> &PacketQueue {
        match kind {
            StreamKind::Audio => &self.audio_queue,
            _ => &self.video_queue,
        }
    }
}

enum DemuxState {
    Idle,
    Ready(Box<dyn DemuxSource>),
    Running(JoinHandle<DemuxReport>),
    Stopped,
}

/// Demux stage handle, owned by the pipeline.
pub struct DemuxStage {
    state: DemuxState,
    routing: StreamRouting,
    audio_stream: Option<StreamInfo>,
    video_stream: Option<StreamInfo>,
    audio_queue: Arc<PacketQueue>,
    video_queue: Arc<PacketQueue>,
    backpressure_sleep: Duration,
    cancel: CancellationToken,
    health: Arc<PipelineHealth>,
}

impl DemuxStage {
    pub fn new(
        audio_queue: Arc<PacketQueue>,
        video_queue: Arc<PacketQueue>,
        backpressure_sleep: Duration,
        health: Arc<PipelineHealth>,
    ) -> Self {
        health.register(DEMUX_STAGE);
        Self {
            state: DemuxState::Idle,
            routing: StreamRouting {
                audio: None,
                video: None,
            },
            audio_stream: None,
            video_stream: None,
            audio_queue,
            video_queue,
            backpressure_sleep,
            cancel: CancellationToken::new(),
            health,
        }
    }

    /// Take ownership of an opened source and select the streams to play.
    ///
    /// The queue of a kind the source lacks is finished immediately.
    ///
    /// # Errors
    /// - `InvalidState` unless the stage is Idle
    /// - `NoPlayableStream` when the source has neither audio nor video
    pub fn init(&mut self, source: Box<dyn DemuxSource>) -> Result<()> {
        if !matches!(self.state, DemuxState::Idle) {
            return Err(Error::InvalidState("demux already initialized".to_string()));
        }

        let streams = source.streams();
        let audio = select_stream(streams, StreamKind::Audio).cloned();
        let video = select_stream(streams, StreamKind::Video).cloned();

        if audio.is_none() && video.is_none() {
            return Err(Error::NoPlayableStream);
        }

        for stream in streams {
            let selected = Some(stream.index) == audio.as_ref().map(|s| s.index)
                || Some(stream.index) == video.as_ref().map(|s| s.index);
            debug!(
                index = stream.index,
                kind = %stream.kind(),
                time_base = %stream.time_base,
                selected,
                "Source stream"
            );
        }

        if audio.is_none() {
            info!("Source has no audio stream");
            self.audio_queue.finish();
        }
        if video.is_none() {
            info!("Source has no video stream");
            self.video_queue.finish();
        }

        self.routing = StreamRouting {
            audio: audio.as_ref().map(|s| s.index),
            video: video.as_ref().map(|s| s.index),
        };
        self.audio_stream = audio;
        self.video_stream = video;
        self.state = DemuxState::Ready(source);
        Ok(())
    }

    /// Stop routing the selected stream of `kind`; its packets are discarded
    /// and its queue finished.
    ///
    /// # Errors
    /// - `InvalidState` unless the stage is Ready
    /// - `NoPlayableStream` if no selected stream would remain
    pub fn ignore(&mut self, kind: StreamKind) -> Result<()> {
        if !matches!(self.state, DemuxState::Ready(_)) {
            return Err(Error::InvalidState(
                "streams can only be deselected before start".to_string(),
            ));
        }

        let remaining = match kind {
            StreamKind::Audio => self.video_stream.is_some(),
            StreamKind::Video => self.audio_stream.is_some(),
            StreamKind::Other => return Ok(()),
        };
        if !remaining {
            return Err(Error::NoPlayableStream);
        }

        match kind {
            StreamKind::Audio => {
                self.routing.audio = None;
                self.audio_stream = None;
                self.audio_queue.finish();
            }
            _ => {
                self.routing.video = None;
                self.video_stream = None;
                self.video_queue.finish();
            }
        }
        info!(%kind, "Stream deselected");
        Ok(())
    }

    /// Selected audio stream, once initialized.
    pub fn audio_stream(&self) -> Option<&StreamInfo> {
        self.audio_stream.as_ref()
    }

    /// Selected video stream, once initialized.
    pub fn video_stream(&self) -> Option<&StreamInfo> {
        self.video_stream.as_ref()
    }

    /// Spawn the demux thread.
    pub fn start(&mut self) -> Result<()> {
        let source = match std::mem::replace(&mut self.state, DemuxState::Stopped) {
            DemuxState::Ready(source) => source,
            other => {
                self.state = other;
                return Err(Error::InvalidState("demux is not ready to start".to_string()));
            }
        };

        let demux = DemuxLoop {
            source,
            routing: self.routing,
            audio_queue: Arc::clone(&self.audio_queue),
            video_queue: Arc::clone(&self.video_queue),
            backpressure_sleep: self.backpressure_sleep,
            cancel: self.cancel.clone(),
        };
        let health = Arc::clone(&self.health);

        let handle = thread::Builder::new()
            .name(DEMUX_STAGE.to_string())
            .spawn(move || {
                health.update(DEMUX_STAGE, StageStatus::Running);
                let report = demux.run();
                health.update(DEMUX_STAGE, report.exit.clone().into());
                report
            })?;

        info!("Demux stage started");
        self.state = DemuxState::Running(handle);
        Ok(())
    }

    /// True while the demux thread has been started and not yet joined.
    pub fn is_running(&self) -> bool {
        matches!(self.state, DemuxState::Running(_))
    }

    /// Cancel and join the demux thread. Safe to call more than once.
    ///
    /// # Returns
    /// The loop's report, if the thread was running and exited normally.
    pub fn stop(&mut self) -> Option<DemuxReport> {
        self.cancel.cancel();

        match std::mem::replace(&mut self.state, DemuxState::Stopped) {
            DemuxState::Running(handle) => match handle.join() {
                Ok(report) => {
                    debug!("Demux thread joined");
                    Some(report)
                }
                Err(e) => {
                    error!("Demux thread panicked: {:?}", e);
                    self.health
                        .update(DEMUX_STAGE, StageStatus::Failed("thread panicked".to_string()));
                    self.audio_queue.finish();
                    self.video_queue.finish();
                    None
                }
            },
            DemuxState::Ready(mut source) => {
                source.close();
                self.health.update(DEMUX_STAGE, StageStatus::Cancelled);
                None
            }
            DemuxState::Idle | DemuxState::Stopped => None,
        }
    }
}

impl Drop for DemuxStage {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("Demux stage dropped while running, stopping");
            self.stop();
        }
    }
}
