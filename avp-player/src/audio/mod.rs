//! Audio output: the device-driven consumer of decoded audio
//!
//! - `output`: fills device buffers from the frame queue and drives the clock
//! - `resampler`: sample format, channel and rate conversion
//! - `device`: device abstraction and the cpal backend

pub mod device;
pub mod output;
pub mod resampler;

pub use device::{AudioDevice, CpalDevice, FillCallback};
pub use output::{AudioOutput, AudioStats, AudioStatsSnapshot};
pub use resampler::Resampler;
