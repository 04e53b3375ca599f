//! Video presentation: the clock-paced consumer of decoded pictures

pub mod output;
pub mod surface;

pub use output::{ExitReason, VideoOutput, VideoReport};
pub use surface::{HeadlessSurface, Key, SurfaceEvent, VideoSurface};
