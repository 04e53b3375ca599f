//! Error types for avp-player
//!
//! Defines module-specific error types using thiserror. Variants follow the
//! pipeline's failure taxonomy:
//! - fatal at initialization: surfaced to the caller before any thread starts
//! - fatal at runtime: logged and end only the owning stage
//!
//! Expected conditions (queue timeout, decoder needs more input, end of
//! stream, audio underrun) are not errors and never appear here.

use thiserror::Error;

/// Main error type for avp-player
#[derive(Error, Debug)]
pub enum Error {
    /// Media source could not be opened or probed
    #[error("Failed to open source '{source_uri}': {reason}")]
    SourceOpen { source_uri: String, reason: String },

    /// Source contains neither an audio nor a video stream we can route
    #[error("No playable audio or video stream in source")]
    NoPlayableStream,

    /// No decoder for the stream's codec, or the decoder failed to open
    #[error("Decoder open error: {0}")]
    DecoderOpen(String),

    /// Audio output device could not be opened or started
    #[error("Audio device open error: {0}")]
    DeviceOpen(String),

    /// Unrecoverable packet read error (other than end of stream)
    #[error("Read error: {0}")]
    Read(String),

    /// Decoder rejected a packet or failed to produce a frame
    #[error("Decode error: {0}")]
    Decode(String),

    /// Sample format, channel or rate conversion failed
    #[error("Resample error: {0}")]
    Resample(String),

    /// Audio device error after startup
    #[error("Audio device error: {0}")]
    Device(String),

    /// Presentation surface error
    #[error("Surface error: {0}")]
    Surface(String),

    /// Operation not valid in the component's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the shared primitives
    #[error(transparent)]
    Common(#[from] avp_common::Error),
}

impl Error {
    /// True for errors that abort startup (nothing is running yet).
    pub fn is_fatal_init(&self) -> bool {
        matches!(
            self,
            Error::SourceOpen { .. }
                | Error::NoPlayableStream
                | Error::DecoderOpen(_)
                | Error::DeviceOpen(_)
                | Error::Config(_)
        )
    }
}

/// Convenience Result type using avp-player Error
pub type Result<T> = std::result::Result<T, Error>;
