//! # AVP Common Library
//!
//! Shared primitives for the media pipeline:
//! - `HandoffQueue`: the thread-safe FIFO every stage hands work through
//! - `SyncClock`: presentation clock written by audio, read by video
//! - `TimeBase`: per-stream tick to duration conversion
//! - Configuration file loading and logging configuration

pub mod clock;
pub mod config;
pub mod error;
pub mod queue;
pub mod time_base;

pub use clock::SyncClock;
pub use error::{Error, Result};
pub use queue::HandoffQueue;
pub use time_base::TimeBase;
