//! Video output stage
//!
//! Runs on the thread that owns the presentation surface. Each iteration:
//! 1. Handle pending surface events (quit / escape end the loop)
//! 2. Inspect the head frame without removing it
//! 3. `delta = frame time - clock`; if positive, sleep `min(delta, max_rest)`
//!    and look again, otherwise pop the frame and present it
//!
//! Pacing is drop-free: a late frame is presented immediately, so a backlog
//! plays back-to-back until it catches up with the clock.

use crate::media::{AudioFrame, VideoFrame};
use crate::video::surface::{Key, SurfaceEvent, VideoSurface};
use avp_common::{HandoffQueue, SyncClock, TimeBase};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Why the presentation loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Quit event or escape key from the surface
    Quit,
    /// External cancellation token
    Cancelled,
    /// Every output queue drained
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoReport {
    pub frames_presented: u64,
    /// Frames the surface failed to present
    pub frames_failed: u64,
    pub exit: ExitReason,
}

/// Presentation loop state.
pub struct VideoOutput {
    frames: Arc<HandoffQueue<VideoFrame>>,
    clock: Arc<SyncClock>,
    time_base: TimeBase,
    max_rest: Duration,
    idle_rest: Duration,
    exit_on_end: bool,
    /// Audio frames still to play; playback has not ended until drained
    audio_frames: Option<Arc<HandoffQueue<AudioFrame>>>,
}

impl VideoOutput {
    pub fn new(
        frames: Arc<HandoffQueue<VideoFrame>>,
        clock: Arc<SyncClock>,
        time_base: TimeBase,
        max_rest: Duration,
        idle_rest: Duration,
    ) -> Self {
        Self {
            frames,
            clock,
            time_base,
            max_rest,
            idle_rest,
            exit_on_end: false,
            audio_frames: None,
        }
    }

    /// End the loop once the video queue (and `audio_frames`, if given) is
    /// finished and empty.
    pub fn exit_on_end(mut self, audio_frames: Option<Arc<HandoffQueue<AudioFrame>>>) -> Self {
        self.exit_on_end = true;
        self.audio_frames = audio_frames;
        self
    }

    /// Run the presentation loop on the calling thread.
    pub fn run(&self, surface: &mut dyn VideoSurface, cancel: &CancellationToken) -> VideoReport {
        let mut presented = 0u64;
        let mut failed = 0u64;

        info!(time_base = %self.time_base, "Presentation loop started");

        let exit = loop {
            if let Some(reason) = self.poll_events(surface) {
                break reason;
            }
            if cancel.is_cancelled() {
                break ExitReason::Cancelled;
            }

            let head_ns = self
                .frames
                .peek_with(|frame| self.time_base.ticks_to_nanos(frame.pts));

            let Some(head_ns) = head_ns else {
                if self.exit_on_end && self.playback_ended() {
                    break ExitReason::EndOfStream;
                }
                thread::sleep(self.idle_rest);
                continue;
            };

            let delta_ns = head_ns - self.clock.get_nanos() as i128;
            if delta_ns > 0 {
                let rest = Duration::from_nanos(delta_ns.min(u64::MAX as i128) as u64);
                trace!(delta_ms = (delta_ns / 1_000_000) as i64, "Frame not due yet");
                thread::sleep(rest.min(self.max_rest));
                continue;
            }

            // Only this thread pops the video queue, so the head is still there
            let Some(frame) = self.frames.pop(Duration::ZERO) else {
                continue;
            };

            match surface.upload_and_present(&frame.planes, frame.width, frame.height) {
                Ok(()) => {
                    presented += 1;
                    debug!(
                        pts = frame.pts,
                        pts_ms = (head_ns / 1_000_000) as i64,
                        late_ms = (-delta_ns / 1_000_000) as i64,
                        "Presented frame"
                    );
                }
                Err(e) => {
                    failed += 1;
                    warn!(pts = frame.pts, error = %e, "Failed to present frame");
                }
            }
        };

        info!(
            frames_presented = presented,
            frames_failed = failed,
            exit = ?exit,
            "Presentation loop exited"
        );

        VideoReport {
            frames_presented: presented,
            frames_failed: failed,
            exit,
        }
    }

    fn poll_events(&self, surface: &mut dyn VideoSurface) -> Option<ExitReason> {
        while let Some(event) = surface.poll_event() {
            match event {
                SurfaceEvent::Quit | SurfaceEvent::KeyDown(Key::Escape) => {
                    debug!(?event, "Quit requested from surface");
                    return Some(ExitReason::Quit);
                }
                SurfaceEvent::KeyDown(key) => debug!(?key, "Ignoring key"),
            }
        }
        None
    }

    fn playback_ended(&self) -> bool {
        self.frames.is_drained()
            && self
                .audio_frames
                .as_ref()
                .map_or(true, |audio| audio.is_drained())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::media::{PixelFormat, Plane};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedSurface {
        events: VecDeque<SurfaceEvent>,
        presented: Vec<(u32, u32)>,
        fail: bool,
    }

    impl VideoSurface for ScriptedSurface {
        fn upload_and_present(&mut self, _: &[Plane], width: u32, height: u32) -> Result<()> {
            if self.fail {
                return Err(crate::error::Error::Surface("lost device".into()));
            }
            self.presented.push((width, height));
            Ok(())
        }

        fn poll_event(&mut self) -> Option<SurfaceEvent> {
            self.events.pop_front()
        }
    }

    fn frame(pts: i64) -> VideoFrame {
        VideoFrame {
            pts,
            width: 2,
            height: 2,
            format: PixelFormat::Rgb24,
            planes: vec![Plane {
                data: vec![0; 12],
                stride: 6,
            }],
        }
    }

    fn output(frames: &Arc<HandoffQueue<VideoFrame>>) -> VideoOutput {
        VideoOutput::new(
            Arc::clone(frames),
            Arc::new(SyncClock::new()),
            TimeBase::MILLISECONDS,
            Duration::from_millis(10),
            Duration::from_millis(1),
        )
    }

    #[test]
    fn test_escape_key_quits() {
        let frames = Arc::new(HandoffQueue::new());
        let mut surface = ScriptedSurface::default();
        surface.events.push_back(SurfaceEvent::KeyDown(Key::Space));
        surface.events.push_back(SurfaceEvent::KeyDown(Key::Escape));

        let report = output(&frames).run(&mut surface, &CancellationToken::new());
        assert_eq!(report.exit, ExitReason::Quit);
        assert_eq!(report.frames_presented, 0);
    }

    #[test]
    fn test_cancel_token_stops_loop() {
        let frames = Arc::new(HandoffQueue::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = output(&frames).run(&mut ScriptedSurface::default(), &cancel);
        assert_eq!(report.exit, ExitReason::Cancelled);
    }

    #[test]
    fn test_presents_due_frames_then_ends() {
        let frames = Arc::new(HandoffQueue::new());
        frames.push(frame(0));
        frames.push(frame(0));
        frames.finish();

        let mut surface = ScriptedSurface::default();
        let report = output(&frames)
            .exit_on_end(None)
            .run(&mut surface, &CancellationToken::new());

        assert_eq!(report.exit, ExitReason::EndOfStream);
        assert_eq!(report.frames_presented, 2);
        assert_eq!(surface.presented, vec![(2, 2), (2, 2)]);
    }

    #[test]
    fn test_waits_for_audio_queue_before_ending() {
        let frames = Arc::new(HandoffQueue::<VideoFrame>::new());
        frames.finish();
        let audio = Arc::new(HandoffQueue::<AudioFrame>::new());

        let finisher = {
            let audio = Arc::clone(&audio);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                audio.finish();
            })
        };

        let start = std::time::Instant::now();
        let report = output(&frames)
            .exit_on_end(Some(Arc::clone(&audio)))
            .run(&mut ScriptedSurface::default(), &CancellationToken::new());
        finisher.join().unwrap();

        assert_eq!(report.exit, ExitReason::EndOfStream);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_failed_presentation_counted() {
        let frames = Arc::new(HandoffQueue::new());
        frames.push(frame(0));
        frames.finish();

        let mut surface = ScriptedSurface {
            fail: true,
            ..Default::default()
        };
        let report = output(&frames)
            .exit_on_end(None)
            .run(&mut surface, &CancellationToken::new());

        assert_eq!(report.frames_presented, 0);
        assert_eq!(report.frames_failed, 1);
        assert!(frames.is_drained());
    }
}
