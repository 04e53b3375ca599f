//! # AVP Player Library (avp-player)
//!
//! Concurrent audio/video playback pipeline.
//!
//! **Purpose:** Demux a media source, decode each stream on its own thread,
//! play audio from the device callback and present video paced against the
//! audio clock.
//!
//! **Architecture:** demux thread → packet queues → decode threads → frame
//! queues → audio callback (clock master) / presentation loop (clock slave).
//! Backends: symphonia (files), synthetic test source, cpal (audio device),
//! headless surface.

pub mod audio;
pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod signal;
pub mod video;

pub use config::PlayerConfig;
pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineReport};
