//! Test helpers for avp-player integration tests
//!
//! Provides scripted stand-ins for the pipeline's collaborators:
//! - FakeSource: packet script with a read counter
//! - FakeDecoders: one frame per packet, payload passed through
//! - ManualAudioDevice: callback thread pulling fixed-size buffers
//! - RecordingSurface: records presentations against the clock

#![allow(dead_code)]

pub mod devices;
pub mod media;

pub use devices::{ManualAudioDevice, Presentation, RecordingSurface};
pub use media::{
    audio_packet, audio_stream_info, video_packet, video_stream_info, FakeDecoders, FakeSource,
    TEST_AUDIO,
};
