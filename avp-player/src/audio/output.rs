//! Audio output stage
//!
//! `AudioOutput::fill` is the body of the device's pull callback. It runs on
//! the device's thread, so it only ever waits on the frame queue with a
//! bounded timeout and never takes a lock shared with the presentation loop.
//!
//! Per callback:
//! 1. Copy from the staging buffer, refilling it from the frame queue when
//!    exhausted (converted through the resampler unless the frame already
//!    matches the device format)
//! 2. If no frame arrives within the wait, write a chunk of silence and
//!    retry; later refills in the same callback do not wait
//! 3. Once the request is satisfied, set the clock to the timestamp of the
//!    last frame consumed (audio is the timing master)

use crate::audio::resampler::Resampler;
use crate::media::{AudioFrame, AudioParams};
use avp_common::{HandoffQueue, SyncClock, TimeBase};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, trace, warn};

/// Counters updated by the audio callback, readable from any thread.
#[derive(Debug, Default)]
pub struct AudioStats {
    callbacks: AtomicU64,
    frames_consumed: AtomicU64,
    underruns: AtomicU64,
    silence_bytes: AtomicU64,
    resampler_rebuilds: AtomicU64,
}

/// Point-in-time copy of `AudioStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStatsSnapshot {
    pub callbacks: u64,
    pub frames_consumed: u64,
    /// Callbacks that wrote at least one chunk of silence
    pub underruns: u64,
    pub silence_bytes: u64,
    pub resampler_rebuilds: u64,
}

impl AudioStats {
    pub fn snapshot(&self) -> AudioStatsSnapshot {
        AudioStatsSnapshot {
            callbacks: self.callbacks.load(Ordering::Relaxed),
            frames_consumed: self.frames_consumed.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            silence_bytes: self.silence_bytes.load(Ordering::Relaxed),
            resampler_rebuilds: self.resampler_rebuilds.load(Ordering::Relaxed),
        }
    }
}

/// Consumer side of the audio frame queue.
pub struct AudioOutput {
    frames: Arc<HandoffQueue<AudioFrame>>,
    clock: Arc<SyncClock>,
    time_base: TimeBase,
    output: AudioParams,
    queue_wait: Duration,
    underrun_chunk: usize,

    staging: Vec<u8>,
    staging_pos: usize,
    resampler: Option<Resampler>,
    stats: Arc<AudioStats>,
}

impl AudioOutput {
    /// Create the output stage for a device negotiated to `output`.
    ///
    /// # Arguments
    /// - `time_base`: time base of the audio stream's timestamps
    /// - `queue_wait`: longest wait for a frame per callback
    /// - `underrun_chunk_bytes`: silence written per empty pop, rounded down
    ///   to whole sample frames (at least one)
    pub fn new(
        frames: Arc<HandoffQueue<AudioFrame>>,
        clock: Arc<SyncClock>,
        time_base: TimeBase,
        output: AudioParams,
        queue_wait: Duration,
        underrun_chunk_bytes: usize,
    ) -> Self {
        let frame_bytes = output.bytes_per_frame().max(1);
        let underrun_chunk = (underrun_chunk_bytes / frame_bytes).max(1) * frame_bytes;

        Self {
            frames,
            clock,
            time_base,
            output,
            queue_wait,
            underrun_chunk,
            staging: Vec::new(),
            staging_pos: 0,
            resampler: None,
            stats: Arc::new(AudioStats::default()),
        }
    }

    /// Shared handle to this output's counters.
    pub fn stats(&self) -> Arc<AudioStats> {
        Arc::clone(&self.stats)
    }

    /// Fill `out` completely with interleaved samples in the device format.
    pub fn fill(&mut self, out: &mut [u8]) {
        self.stats.callbacks.fetch_add(1, Ordering::Relaxed);

        let mut written = 0;
        let mut wait = self.queue_wait;
        let mut last_pts = None;
        let mut underrun = false;

        while written < out.len() {
            if self.staging_pos >= self.staging.len() {
                match self.frames.pop(wait) {
                    Some(frame) => {
                        self.stats.frames_consumed.fetch_add(1, Ordering::Relaxed);
                        last_pts = Some(frame.pts);
                        self.stage(frame);
                        continue;
                    }
                    None => {
                        let n = self.underrun_chunk.min(out.len() - written);
                        out[written..written + n].fill(0);
                        written += n;
                        self.stats.silence_bytes.fetch_add(n as u64, Ordering::Relaxed);
                        underrun = true;
                        wait = Duration::ZERO;
                        continue;
                    }
                }
            }

            let n = (self.staging.len() - self.staging_pos).min(out.len() - written);
            out[written..written + n]
                .copy_from_slice(&self.staging[self.staging_pos..self.staging_pos + n]);
            written += n;
            self.staging_pos += n;
        }

        if underrun {
            self.stats.underruns.fetch_add(1, Ordering::Relaxed);
            trace!(queue_len = self.frames.len(), "Audio underrun, wrote silence");
        }

        if let Some(pts) = last_pts {
            let position = self.time_base.ticks_to_duration(pts);
            self.clock.set(position);
            trace!(pts, pts_ms = position.as_millis() as u64, "Audio clock updated");
        }
    }

    /// Replace the staging buffer with `frame` in the output format.
    fn stage(&mut self, frame: AudioFrame) {
        self.staging_pos = 0;

        if frame.params == self.output {
            self.staging = frame.planes.into_iter().next().unwrap_or_default();
            return;
        }

        let needs_rebuild = self
            .resampler
            .as_ref()
            .map_or(true, |r| r.input() != frame.params);

        if needs_rebuild {
            match Resampler::new(frame.params, self.output) {
                Ok(resampler) => {
                    info!(input = %frame.params, output = %self.output, "Audio converter (re)built");
                    self.stats.resampler_rebuilds.fetch_add(1, Ordering::Relaxed);
                    self.resampler = Some(resampler);
                }
                Err(e) => {
                    warn!(error = %e, "Cannot convert audio frame, substituting silence");
                    self.resampler = None;
                    self.stage_silence_for(&frame);
                    return;
                }
            }
        }

        let converted = match self.resampler.as_mut() {
            Some(resampler) => resampler.convert(&frame),
            None => return self.stage_silence_for(&frame),
        };

        match converted {
            Ok(bytes) => self.staging = bytes,
            Err(e) => {
                warn!(error = %e, pts = frame.pts, "Audio conversion failed, substituting silence");
                self.stage_silence_for(&frame);
            }
        }
    }

    /// Stage silence lasting as long as `frame` would at the output rate.
    fn stage_silence_for(&mut self, frame: &AudioFrame) {
        let out_frames = frame.samples as u64 * self.output.sample_rate as u64
            / frame.params.sample_rate.max(1) as u64;
        let bytes = out_frames as usize * self.output.bytes_per_frame();
        self.stats.silence_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.staging = vec![0; bytes];
    }
}
