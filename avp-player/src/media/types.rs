//! Core media data types
//!
//! Packets flow from the demux source to the decoders, frames flow from the
//! decoders to the outputs. Both carry a presentation timestamp in ticks of
//! their stream's `TimeBase`. Ownership moves with the value through each
//! queue; nothing here is shared.

use avp_common::TimeBase;
use std::fmt;

/// Logical stream a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Audio,
    Video,
    /// Subtitle, data or any stream the pipeline does not route
    Other,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Video => write!(f, "video"),
            StreamKind::Other => write!(f, "other"),
        }
    }
}

/// Compressed elementary-stream unit.
#[derive(Debug)]
pub struct Packet {
    /// Index of the source stream this packet was read from
    pub stream_index: u32,

    /// Routing tag, assigned by the demux stage
    pub kind: StreamKind,

    /// Presentation timestamp in stream time-base ticks
    pub pts: i64,

    /// Duration in ticks (0 if unknown)
    pub duration: u64,

    /// Compressed payload
    pub data: Box<[u8]>,
}

impl Packet {
    /// Create an untagged packet as read from a source.
    pub fn new(stream_index: u32, pts: i64, duration: u64, data: Box<[u8]>) -> Self {
        Self {
            stream_index,
            kind: StreamKind::Other,
            pts,
            duration,
            data,
        }
    }
}

/// PCM sample encoding.
///
/// Interleaved formats hold all channels in one plane (`L R L R ...`);
/// planar formats hold one plane per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    S16,
    S32,
    F32,
    S16Planar,
    S32Planar,
    F32Planar,
}

impl SampleFormat {
    /// Size of one sample of one channel.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::S16 | SampleFormat::S16Planar => 2,
            SampleFormat::S32 | SampleFormat::S32Planar => 4,
            SampleFormat::F32 | SampleFormat::F32Planar => 4,
        }
    }

    pub fn is_planar(&self) -> bool {
        matches!(
            self,
            SampleFormat::S16Planar | SampleFormat::S32Planar | SampleFormat::F32Planar
        )
    }

    /// The interleaved format with the same sample encoding.
    pub fn packed(&self) -> SampleFormat {
        match self {
            SampleFormat::S16Planar => SampleFormat::S16,
            SampleFormat::S32Planar => SampleFormat::S32,
            SampleFormat::F32Planar => SampleFormat::F32,
            other => *other,
        }
    }
}

/// Sample rate, channel count and sample format of a PCM stream.
///
/// Channels are identified by count; the conventional layout for that count
/// is assumed (1 = mono, 2 = stereo left/right, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl AudioParams {
    /// Bytes occupied by one sample of every channel (interleaved frame).
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }
}

impl fmt::Display for AudioParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz {}ch {:?}",
            self.sample_rate, self.channels, self.format
        )
    }
}

/// Decoded PCM unit.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Presentation timestamp in stream time-base ticks
    pub pts: i64,

    /// Layout of `planes`
    pub params: AudioParams,

    /// Samples per channel
    pub samples: usize,

    /// One plane for interleaved formats, one per channel for planar formats
    pub planes: Vec<Vec<u8>>,
}

impl AudioFrame {
    /// Build a frame from one interleaved buffer.
    pub fn interleaved(pts: i64, params: AudioParams, data: Vec<u8>) -> Self {
        let samples = data.len() / params.bytes_per_frame().max(1);
        Self {
            pts,
            params,
            samples,
            planes: vec![data],
        }
    }

    /// Build a frame from one buffer per channel.
    pub fn planar(pts: i64, params: AudioParams, planes: Vec<Vec<u8>>) -> Self {
        let samples = planes
            .first()
            .map(|plane| plane.len() / params.format.bytes_per_sample())
            .unwrap_or(0);
        Self {
            pts,
            params,
            samples,
            planes,
        }
    }

    /// Total payload size across all planes.
    pub fn byte_len(&self) -> usize {
        self.planes.iter().map(Vec::len).sum()
    }
}

/// Picture layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Planar Y, U, V with 2x2 chroma subsampling
    Yuv420p,
    /// Packed 8-bit R, G, B
    Rgb24,
    /// Packed 8-bit R, G, B, A
    Rgba,
}

impl PixelFormat {
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Yuv420p => 3,
            PixelFormat::Rgb24 | PixelFormat::Rgba => 1,
        }
    }
}

/// One picture plane: pixel rows of `stride` bytes.
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
}

/// Decoded picture.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Presentation timestamp in stream time-base ticks
    pub pts: i64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
}

/// Codec parameters for an audio stream.
#[derive(Debug, Clone)]
pub struct AudioCodecParameters {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,

    /// Samples per packet, when the container declares it
    pub frame_size: Option<u32>,
}

/// Audio codec identity, carrying whatever the decoder backend needs.
#[derive(Debug, Clone)]
pub enum AudioCodec {
    /// Codec handled by symphonia; keeps the full parameters for decoder setup
    Symphonia(Box<::symphonia::core::codecs::CodecParameters>),
    /// Generated test tone
    SyntheticTone { format: SampleFormat },
    /// Codec no backend recognizes
    Unknown(String),
}

/// Codec parameters for a video stream.
#[derive(Debug, Clone)]
pub struct VideoCodecParameters {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

/// Video codec identity.
#[derive(Debug, Clone)]
pub enum VideoCodec {
    /// Generated colour bars
    SyntheticBars,
    /// Codec no backend recognizes
    Unknown(String),
}

/// Codec parameters of any stream.
#[derive(Debug, Clone)]
pub enum CodecParameters {
    Audio(AudioCodecParameters),
    Video(VideoCodecParameters),
    /// Non audio/video stream (subtitles, metadata, ...)
    Data(String),
}

impl CodecParameters {
    pub fn kind(&self) -> StreamKind {
        match self {
            CodecParameters::Audio(_) => StreamKind::Audio,
            CodecParameters::Video(_) => StreamKind::Video,
            CodecParameters::Data(_) => StreamKind::Other,
        }
    }
}

/// Stream metadata reported by a demux source.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Index carried by this stream's packets
    pub index: u32,

    /// Tick duration for packet and frame timestamps
    pub time_base: TimeBase,

    pub params: CodecParameters,

    /// Source marks this as the preferred stream of its kind
    pub is_default: bool,
}

impl StreamInfo {
    pub fn kind(&self) -> StreamKind {
        self.params.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_format_sizes() {
        assert_eq!(SampleFormat::S16.bytes_per_sample(), 2);
        assert_eq!(SampleFormat::F32Planar.bytes_per_sample(), 4);
        assert!(SampleFormat::S32Planar.is_planar());
        assert_eq!(SampleFormat::S16Planar.packed(), SampleFormat::S16);
        assert_eq!(SampleFormat::F32.packed(), SampleFormat::F32);
    }

    #[test]
    fn test_interleaved_frame_sample_count() {
        let params = AudioParams {
            sample_rate: 48000,
            channels: 2,
            format: SampleFormat::S16,
        };
        let frame = AudioFrame::interleaved(0, params, vec![0u8; 4096]);
        assert_eq!(frame.samples, 1024);
        assert_eq!(frame.byte_len(), 4096);
    }

    #[test]
    fn test_planar_frame_sample_count() {
        let params = AudioParams {
            sample_rate: 44100,
            channels: 2,
            format: SampleFormat::F32Planar,
        };
        let frame = AudioFrame::planar(0, params, vec![vec![0u8; 400], vec![0u8; 400]]);
        assert_eq!(frame.samples, 100);
        assert_eq!(frame.byte_len(), 800);
    }

    #[test]
    fn test_packet_starts_untagged() {
        let packet = Packet::new(3, 10, 1, vec![1, 2, 3].into_boxed_slice());
        assert_eq!(packet.kind, StreamKind::Other);
        assert_eq!(packet.stream_index, 3);
    }
}
