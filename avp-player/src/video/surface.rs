//! Presentation surface interface and the headless implementation

use crate::error::{Error, Result};
use crate::media::Plane;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Keys the presentation loop distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Space,
    Char(char),
    Other(u32),
}

/// User or window-system event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    Quit,
    KeyDown(Key),
}

/// Where decoded pictures are shown.
///
/// Used only from the thread running the presentation loop.
pub trait VideoSurface {
    /// Upload the picture planes (each with its row stride) and present.
    fn upload_and_present(&mut self, planes: &[Plane], width: u32, height: u32) -> Result<()>;

    /// Next pending event, without blocking.
    fn poll_event(&mut self) -> Option<SurfaceEvent>;
}

/// Surface without a window: validates and counts pictures.
///
/// Reports `Quit` once its quit token is cancelled (e.g. by the Ctrl+C
/// watcher).
pub struct HeadlessSurface {
    quit: CancellationToken,
    quit_reported: bool,
    presented: u64,
    size: Option<(u32, u32)>,
}

impl HeadlessSurface {
    pub fn new(quit: CancellationToken) -> Self {
        Self {
            quit,
            quit_reported: false,
            presented: 0,
            size: None,
        }
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl VideoSurface for HeadlessSurface {
    fn upload_and_present(&mut self, planes: &[Plane], width: u32, height: u32) -> Result<()> {
        if planes.is_empty() || width == 0 || height == 0 {
            return Err(Error::Surface(format!(
                "empty picture ({} planes, {}x{})",
                planes.len(),
                width,
                height
            )));
        }
        if let Some((index, plane)) = planes
            .iter()
            .enumerate()
            .find(|(_, plane)| plane.stride == 0 || plane.data.len() < plane.stride)
        {
            return Err(Error::Surface(format!(
                "plane {} holds {} bytes with stride {}",
                index,
                plane.data.len(),
                plane.stride
            )));
        }

        if self.size != Some((width, height)) {
            info!(width, height, "Presentation size set");
            self.size = Some((width, height));
        }

        self.presented += 1;
        Ok(())
    }

    fn poll_event(&mut self) -> Option<SurfaceEvent> {
        if !self.quit_reported && self.quit.is_cancelled() {
            self.quit_reported = true;
            debug!(presented = self.presented, "Quit requested");
            return Some(SurfaceEvent::Quit);
        }
        None
    }
}
