//! Audio device and presentation surface doubles

use avp_common::SyncClock;
use avp_player::audio::{AudioDevice, FillCallback};
use avp_player::error::{Error, Result};
use avp_player::media::{AudioParams, Plane};
use avp_player::video::{SurfaceEvent, VideoSurface};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Audio device whose "hardware" is a thread pulling `buffer_bytes` every
/// `period`.
pub struct ManualAudioDevice {
    spec: AudioParams,
    buffer_bytes: usize,
    period: Duration,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    callbacks: Arc<AtomicU64>,
    nonzero_bytes: Arc<AtomicU64>,
    error_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ManualAudioDevice {
    pub fn new(spec: AudioParams, buffer_frames: usize, period: Duration) -> Self {
        Self {
            spec,
            buffer_bytes: buffer_frames * spec.bytes_per_frame(),
            period,
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            callbacks: Arc::new(AtomicU64::new(0)),
            nonzero_bytes: Arc::new(AtomicU64::new(0)),
            error_flag: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Device pulling in real time: `period` worth of frames per callback.
    pub fn realtime(spec: AudioParams, period: Duration) -> Self {
        let frames = spec.sample_rate as u128 * period.as_micros() / 1_000_000;
        Self::new(spec, frames as usize, period)
    }

    pub fn callbacks(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.callbacks)
    }

    /// Count of non-silent bytes handed to the "hardware".
    pub fn nonzero_bytes(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.nonzero_bytes)
    }

    /// Setting this flag simulates a stream error reported by the backend.
    pub fn error_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.error_flag)
    }
}

impl AudioDevice for ManualAudioDevice {
    fn spec(&self) -> AudioParams {
        self.spec
    }

    fn start(&mut self, mut fill: FillCallback) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::InvalidState("device already started".to_string()));
        }
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let paused = Arc::clone(&self.paused);
        let callbacks = Arc::clone(&self.callbacks);
        let nonzero = Arc::clone(&self.nonzero_bytes);
        let mut buffer = vec![0u8; self.buffer_bytes];
        let period = self.period;

        self.handle = Some(
            thread::Builder::new()
                .name("manual-audio".to_string())
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        if !paused.load(Ordering::SeqCst) {
                            fill(&mut buffer);
                            callbacks.fetch_add(1, Ordering::SeqCst);
                            let loud = buffer.iter().filter(|b| **b != 0).count();
                            nonzero.fetch_add(loud as u64, Ordering::SeqCst);
                        }
                        thread::sleep(period);
                    }
                })?,
        );
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ManualAudioDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// One presented picture.
#[derive(Debug, Clone, Copy)]
pub struct Presentation {
    /// First byte of the first plane
    pub tag: u8,
    /// Clock reading when the picture was presented
    pub clock_ns: i64,
}

/// Surface recording every presentation; optionally quits after a number of
/// pictures.
pub struct RecordingSurface {
    clock: Arc<SyncClock>,
    quit_after: Option<usize>,
    pub presented: Arc<Mutex<Vec<Presentation>>>,
}

impl RecordingSurface {
    pub fn new(clock: Arc<SyncClock>) -> Self {
        Self {
            clock,
            quit_after: None,
            presented: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn quit_after(mut self, pictures: usize) -> Self {
        self.quit_after = Some(pictures);
        self
    }

    pub fn tags(&self) -> Vec<u8> {
        self.presented.lock().iter().map(|p| p.tag).collect()
    }
}

impl VideoSurface for RecordingSurface {
    fn upload_and_present(&mut self, planes: &[Plane], _width: u32, _height: u32) -> Result<()> {
        let tag = planes
            .first()
            .and_then(|plane| plane.data.first())
            .copied()
            .unwrap_or(0);
        self.presented.lock().push(Presentation {
            tag,
            clock_ns: self.clock.get_nanos(),
        });
        Ok(())
    }

    fn poll_event(&mut self) -> Option<SurfaceEvent> {
        match self.quit_after {
            Some(limit) if self.presented.lock().len() >= limit => Some(SurfaceEvent::Quit),
            _ => None,
        }
    }
}
