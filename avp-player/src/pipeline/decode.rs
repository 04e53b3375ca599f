//! Decode stage
//!
//! One thread per elementary stream: pops packets (bounded wait, the
//! cancellation poll point), submits each to the decoder, and drains every
//! frame the decoder will produce before popping the next packet. Frames are
//! pushed to the frame queue as soon as they are produced.
//!
//! Opening the decoder happens in `init` and is a fatal startup error. A
//! decode error at runtime ends only this stage: the frame queue is finished,
//! the packet queue closed (the demux then discards this stream) and the
//! failure recorded in the health registry, so playback can still end.

use crate::error::{Error, Result};
use crate::media::{Decoded, DecodedFrame, Decoder, DecoderFactory, Packet, StreamInfo, StreamKind};
use crate::pipeline::health::{PipelineHealth, StageExit, StageStatus};
use avp_common::HandoffQueue;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

pub const AUDIO_DECODE_STAGE: &str = "audio-decode";
pub const VIDEO_DECODE_STAGE: &str = "video-decode";

/// Stage name for decoders producing `F`.
pub fn stage_name<F: DecodedFrame>() -> &'static str {
    match F::KIND {
        StreamKind::Audio => AUDIO_DECODE_STAGE,
        StreamKind::Video => VIDEO_DECODE_STAGE,
        StreamKind::Other => "decode",
    }
}

/// Counters returned when a decode loop exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeReport {
    pub packets_decoded: u64,
    pub frames_produced: u64,
    pub exit: StageExit,
}

/// The decode loop, owned by its thread.
pub struct DecodeLoop<F: DecodedFrame> {
    pub decoder: Box<dyn Decoder<Frame = F>>,
    pub packets: Arc<HandoffQueue<Packet>>,
    pub frames: Arc<HandoffQueue<F>>,
    pub queue_wait: Duration,
    pub cancel: CancellationToken,
}

impl<F: DecodedFrame> DecodeLoop<F> {
    /// Run until the packet queue is drained, a decode error, or cancellation.
    pub fn run(mut self) -> DecodeReport {
        let name = stage_name::<F>();
        let mut report = DecodeReport {
            packets_decoded: 0,
            frames_produced: 0,
            exit: StageExit::Completed,
        };

        report.exit = loop {
            if self.cancel.is_cancelled() {
                break StageExit::Cancelled;
            }

            match self.packets.pop(self.queue_wait) {
                Some(packet) => {
                    trace!(stage = name, pts = packet.pts, "Decoding packet");
                    let result = self
                        .decoder
                        .submit(packet)
                        .and_then(|()| self.drain(&mut report));
                    if let Err(e) = result {
                        error!(stage = name, error = %e, "Decode failed, stopping stage");
                        break StageExit::Failed(e.to_string());
                    }
                    report.packets_decoded += 1;
                }
                None if self.packets.is_drained() => {
                    debug!(stage = name, "Packet queue drained, flushing decoder");
                    let result = self.decoder.flush().and_then(|()| self.drain(&mut report));
                    match result {
                        Ok(()) => break StageExit::Completed,
                        Err(e) => {
                            error!(stage = name, error = %e, "Decoder flush failed");
                            break StageExit::Failed(e.to_string());
                        }
                    }
                }
                None => {
                    if self.queue_wait.is_zero() {
                        thread::yield_now();
                    }
                }
            }
        };

        if matches!(report.exit, StageExit::Failed(_)) {
            // No consumer remains for this stream
            let dropped = self.packets.close();
            warn!(stage = name, dropped, "Packet queue closed after failure");
        }
        self.frames.finish();
        self.decoder.close();

        info!(
            stage = name,
            exit = ?report.exit,
            "decoded {} packets -> {} frames",
            report.packets_decoded,
            report.frames_produced
        );

        report
    }

    /// Push every frame the decoder is currently willing to produce.
    fn drain(&mut self, report: &mut DecodeReport) -> Result<()> {
        loop {
            match self.decoder.try_receive_frame()? {
                Decoded::Frame(frame) => {
                    self.frames.push(frame);
                    report.frames_produced += 1;
                }
                Decoded::NeedMoreInput => return Ok(()),
            }
        }
    }
}

enum DecodeState<F: DecodedFrame> {
    Ready(Box<dyn Decoder<Frame = F>>),
    Running(JoinHandle<DecodeReport>),
    Stopped,
}

/// Decode stage handle for one stream.
pub struct DecodeStage<F: DecodedFrame> {
    name: &'static str,
    state: DecodeState<F>,
    packets: Arc<HandoffQueue<Packet>>,
    frames: Arc<HandoffQueue<F>>,
    queue_wait: Duration,
    cancel: CancellationToken,
    health: Arc<PipelineHealth>,
}

impl<F: DecodedFrame> DecodeStage<F> {
    /// Open a decoder for `stream`.
    ///
    /// # Errors
    /// `DecoderOpen` when no decoder matches the stream's codec parameters.
    pub fn init(
        factory: &dyn DecoderFactory,
        stream: &StreamInfo,
        packets: Arc<HandoffQueue<Packet>>,
        frames: Arc<HandoffQueue<F>>,
        queue_wait: Duration,
        health: Arc<PipelineHealth>,
    ) -> Result<Self> {
        if stream.kind() != F::KIND {
            return Err(Error::DecoderOpen(format!(
                "stream {} is {}, expected {}",
                stream.index,
                stream.kind(),
                F::KIND
            )));
        }

        let name = stage_name::<F>();
        let decoder = F::open_decoder(factory, stream)?;
        health.register(name);
        debug!(stage = name, stream = stream.index, "Decoder opened");

        Ok(Self {
            name,
            state: DecodeState::Ready(decoder),
            packets,
            frames,
            queue_wait,
            cancel: CancellationToken::new(),
            health,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spawn the decode thread.
    pub fn start(&mut self) -> Result<()> {
        let decoder = match std::mem::replace(&mut self.state, DecodeState::Stopped) {
            DecodeState::Ready(decoder) => decoder,
            other => {
                self.state = other;
                return Err(Error::InvalidState(format!(
                    "{} is not ready to start",
                    self.name
                )));
            }
        };

        let decode = DecodeLoop {
            decoder,
            packets: Arc::clone(&self.packets),
            frames: Arc::clone(&self.frames),
            queue_wait: self.queue_wait,
            cancel: self.cancel.clone(),
        };
        let health = Arc::clone(&self.health);
        let name = self.name;

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                health.update(name, StageStatus::Running);
                let report = decode.run();
                health.update(name, report.exit.clone().into());
                report
            })?;

        info!(stage = name, "Decode stage started");
        self.state = DecodeState::Running(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, DecodeState::Running(_))
    }

    /// Cancel and join the decode thread. Safe to call more than once.
    pub fn stop(&mut self) -> Option<DecodeReport> {
        self.cancel.cancel();

        match std::mem::replace(&mut self.state, DecodeState::Stopped) {
            DecodeState::Running(handle) => match handle.join() {
                Ok(report) => {
                    debug!(stage = self.name, "Decode thread joined");
                    Some(report)
                }
                Err(e) => {
                    error!(stage = self.name, "Decode thread panicked: {:?}", e);
                    self.health
                        .update(self.name, StageStatus::Failed("thread panicked".to_string()));
                    self.packets.close();
                    self.frames.finish();
                    None
                }
            },
            DecodeState::Ready(mut decoder) => {
                decoder.close();
                self.health.update(self.name, StageStatus::Cancelled);
                None
            }
            DecodeState::Stopped => None,
        }
    }
}

impl<F: DecodedFrame> Drop for DecodeStage<F> {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}
