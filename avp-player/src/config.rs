//! Configuration for avp-player
//!
//! Loaded once at startup from a TOML file (see `avp_common::config` for the
//! resolution order). Every setting has a built-in default, so an empty or
//! missing file yields a working configuration.
//!
//! ```toml
//! [pipeline]
//! packet_queue_depth = 200
//!
//! [audio]
//! device = "pulse"
//!
//! [video]
//! max_rest_ms = 10
//!
//! [logging]
//! level = "debug"
//! file = "/var/log/avp"
//! ```

use crate::error::{Error, Result};
use avp_common::config::{load_or_default, LoggingConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-user configuration directory.
pub const APP_NAME: &str = "avp";

/// Complete player configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlayerConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub video: VideoConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Queue and stage-loop tuning
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Packet queue length above which the demux stage stops reading
    ///
    /// Default: 200
    #[serde(default = "default_packet_queue_depth")]
    pub packet_queue_depth: usize,

    /// Demux sleep while a packet queue is saturated
    ///
    /// Default: 10ms
    #[serde(default = "default_backpressure_sleep_ms")]
    pub backpressure_sleep_ms: u64,

    /// Bounded wait of every queue pop (decode stages, audio callback)
    ///
    /// Default: 10ms. 0 makes every pop a non-blocking try.
    #[serde(default = "default_queue_wait_ms")]
    pub queue_wait_ms: u64,
}

/// Audio output settings
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Play the audio stream (false = video only, clock free-runs)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Output device name (None = system default)
    #[serde(default)]
    pub device: Option<String>,

    /// Device buffer size in sample frames (None = device default)
    #[serde(default)]
    pub buffer_frames: Option<u32>,

    /// Silence written per underrun chunk
    ///
    /// Default: 512 bytes
    #[serde(default = "default_underrun_chunk_bytes")]
    pub underrun_chunk_bytes: usize,
}

/// Video presentation settings
#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    /// Longest sleep while waiting for a frame to become due
    ///
    /// Default: 10ms
    #[serde(default = "default_max_rest_ms")]
    pub max_rest_ms: u64,

    /// Sleep when no frame is queued
    ///
    /// Default: 10ms
    #[serde(default = "default_idle_rest_ms")]
    pub idle_rest_ms: u64,

    /// Leave the presentation loop once every output queue is drained
    #[serde(default = "default_true")]
    pub exit_on_end: bool,
}

fn default_packet_queue_depth() -> usize {
    200
}

fn default_backpressure_sleep_ms() -> u64 {
    10
}

fn default_queue_wait_ms() -> u64 {
    10
}

fn default_underrun_chunk_bytes() -> usize {
    512
}

fn default_max_rest_ms() -> u64 {
    10
}

fn default_idle_rest_ms() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            packet_queue_depth: default_packet_queue_depth(),
            backpressure_sleep_ms: default_backpressure_sleep_ms(),
            queue_wait_ms: default_queue_wait_ms(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: None,
            buffer_frames: None,
            underrun_chunk_bytes: default_underrun_chunk_bytes(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            max_rest_ms: default_max_rest_ms(),
            idle_rest_ms: default_idle_rest_ms(),
            exit_on_end: true,
        }
    }
}

impl PipelineConfig {
    pub fn backpressure_sleep(&self) -> Duration {
        Duration::from_millis(self.backpressure_sleep_ms)
    }

    pub fn queue_wait(&self) -> Duration {
        Duration::from_millis(self.queue_wait_ms)
    }
}

impl VideoConfig {
    pub fn max_rest(&self) -> Duration {
        Duration::from_millis(self.max_rest_ms)
    }

    pub fn idle_rest(&self) -> Duration {
        Duration::from_millis(self.idle_rest_ms)
    }
}

impl PlayerConfig {
    /// Resolve, load and validate the configuration.
    ///
    /// # Returns
    /// The configuration and the file it was read from (None = defaults).
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let (config, path): (Self, _) = load_or_default(explicit, APP_NAME)?;
        config.validate()?;
        Ok((config, path))
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = avp_common::config::parse_toml(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges the stages rely on.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.packet_queue_depth == 0 {
            return Err(Error::Config(
                "pipeline.packet_queue_depth must be at least 1".to_string(),
            ));
        }
        if self.pipeline.backpressure_sleep_ms == 0 {
            return Err(Error::Config(
                "pipeline.backpressure_sleep_ms must be non-zero".to_string(),
            ));
        }
        if self.audio.underrun_chunk_bytes == 0 {
            return Err(Error::Config(
                "audio.underrun_chunk_bytes must be non-zero".to_string(),
            ));
        }
        if self.audio.buffer_frames == Some(0) {
            return Err(Error::Config(
                "audio.buffer_frames must be non-zero when set".to_string(),
            ));
        }
        if self.video.max_rest_ms == 0 || self.video.idle_rest_ms == 0 {
            return Err(Error::Config(
                "video.max_rest_ms and video.idle_rest_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.pipeline.packet_queue_depth, 200);
        assert_eq!(config.pipeline.queue_wait(), Duration::from_millis(10));
        assert!(config.audio.enabled);
        assert_eq!(config.audio.underrun_chunk_bytes, 512);
        assert_eq!(config.video.max_rest(), Duration::from_millis(10));
        assert!(config.video.exit_on_end);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_matches_defaults() {
        let config = PlayerConfig::from_toml("").unwrap();
        assert_eq!(config.pipeline.packet_queue_depth, 200);
        assert_eq!(config.video.idle_rest_ms, 10);
    }

    #[test]
    fn test_partial_sections() {
        let config = PlayerConfig::from_toml(
            r#"
            [pipeline]
            packet_queue_depth = 50

            [audio]
            device = "hw:1"
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.packet_queue_depth, 50);
        assert_eq!(config.pipeline.backpressure_sleep_ms, 10);
        assert_eq!(config.audio.device.as_deref(), Some("hw:1"));
        assert!(config.audio.enabled);
    }

    #[test]
    fn test_zero_queue_depth_rejected() {
        let result = PlayerConfig::from_toml("[pipeline]\npacket_queue_depth = 0");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_queue_wait_allowed() {
        let config = PlayerConfig::from_toml("[pipeline]\nqueue_wait_ms = 0").unwrap();
        assert_eq!(config.pipeline.queue_wait(), Duration::ZERO);
    }

    #[test]
    fn test_malformed_document_rejected() {
        let result = PlayerConfig::from_toml("[video\nmax_rest_ms = 5");
        assert!(result.is_err());
    }
}
