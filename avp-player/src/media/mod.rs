//! Media model and the collaborator interfaces the pipeline drives
//!
//! The pipeline never parses containers or decodes codecs itself. It talks to:
//! - a `DemuxSource` that yields packets tagged by stream index
//! - a `Decoder` per stream, opened through a `DecoderFactory`
//!
//! Backends:
//! - `symphonia_backend`: audio files (containers and codecs supported by symphonia)
//! - `synthetic`: generated tone + colour bars (`testsrc:` URIs)

pub mod registry;
pub mod symphonia_backend;
pub mod synthetic;
pub mod types;

pub use registry::{open_source, DefaultDecoders};
pub use types::{
    AudioCodec, AudioCodecParameters, AudioFrame, AudioParams, CodecParameters, Packet,
    PixelFormat, Plane, SampleFormat, StreamInfo, StreamKind, VideoCodec, VideoCodecParameters,
    VideoFrame,
};

use crate::error::Result;

/// Result of one read from a demux source.
#[derive(Debug)]
pub enum ReadOutcome {
    Packet(Packet),
    EndOfStream,
}

/// Container reader yielding elementary-stream packets.
///
/// Opening is backend-specific (see `open_source`); once open the source
/// reports its streams and hands out packets in file order.
pub trait DemuxSource: Send {
    /// Streams found when the source was opened.
    fn streams(&self) -> &[StreamInfo];

    /// Read the next packet of any stream.
    ///
    /// May block for the duration of the underlying read.
    fn read_next_packet(&mut self) -> Result<ReadOutcome>;

    /// Release the underlying container. Further reads are not expected.
    fn close(&mut self) {}
}

/// Result of asking a decoder for output.
#[derive(Debug)]
pub enum Decoded<F> {
    Frame(F),
    /// Nothing more until another packet is submitted
    NeedMoreInput,
}

/// Packet in, frames out.
pub trait Decoder: Send {
    type Frame: Send + 'static;

    /// Hand one packet to the decoder.
    fn submit(&mut self, packet: Packet) -> Result<()>;

    /// Take the next frame the decoder is willing to produce.
    fn try_receive_frame(&mut self) -> Result<Decoded<Self::Frame>>;

    /// Signal end of input so buffered frames become receivable.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}
}

pub type AudioDecoder = Box<dyn Decoder<Frame = AudioFrame>>;
pub type VideoDecoder = Box<dyn Decoder<Frame = VideoFrame>>;

/// Resolves a decoder for a stream's codec parameters.
pub trait DecoderFactory: Send + Sync {
    fn open_audio(&self, stream: &StreamInfo) -> Result<AudioDecoder>;
    fn open_video(&self, stream: &StreamInfo) -> Result<VideoDecoder>;
}

/// Frame type a decode stage produces; picks the matching factory method.
pub trait DecodedFrame: Send + Sized + 'static {
    const KIND: StreamKind;

    fn open_decoder(
        factory: &dyn DecoderFactory,
        stream: &StreamInfo,
    ) -> Result<Box<dyn Decoder<Frame = Self>>>;
}

impl DecodedFrame for AudioFrame {
    const KIND: StreamKind = StreamKind::Audio;

    fn open_decoder(factory: &dyn DecoderFactory, stream: &StreamInfo) -> Result<AudioDecoder> {
        factory.open_audio(stream)
    }
}

impl DecodedFrame for VideoFrame {
    const KIND: StreamKind = StreamKind::Video;

    fn open_decoder(factory: &dyn DecoderFactory, stream: &StreamInfo) -> Result<VideoDecoder> {
        factory.open_video(stream)
    }
}
