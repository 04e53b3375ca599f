//! Backend selection for sources and decoders

use crate::error::{Error, Result};
use crate::media::symphonia_backend::{SymphoniaDecoder, SymphoniaSource};
use crate::media::synthetic::{BarsDecoder, SyntheticSource, SyntheticSpec, ToneDecoder};
use crate::media::{
    AudioCodec, AudioDecoder, AudioParams, CodecParameters, DecoderFactory, DemuxSource,
    StreamInfo, VideoCodec, VideoDecoder,
};
use std::path::Path;
use tracing::debug;

/// Open a demux source for `uri`.
///
/// `testsrc:` URIs select the synthetic generator; anything else is treated
/// as a file path and probed with symphonia.
pub fn open_source(uri: &str) -> Result<Box<dyn DemuxSource>> {
    if let Some(spec) = SyntheticSpec::parse_uri(uri)? {
        debug!(?spec, "Using synthetic source");
        return Ok(Box::new(SyntheticSource::new(spec)?));
    }

    Ok(Box::new(SymphoniaSource::open(Path::new(uri))?))
}

/// Decoder factory covering every built-in backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDecoders;

impl DecoderFactory for DefaultDecoders {
    fn open_audio(&self, stream: &StreamInfo) -> Result<AudioDecoder> {
        let params = match &stream.params {
            CodecParameters::Audio(params) => params,
            _ => {
                return Err(Error::DecoderOpen(format!(
                    "stream {} is not an audio stream",
                    stream.index
                )))
            }
        };

        match &params.codec {
            AudioCodec::Symphonia(codec_params) => {
                Ok(Box::new(SymphoniaDecoder::open(codec_params)?))
            }
            AudioCodec::SyntheticTone { format } => Ok(Box::new(ToneDecoder::new(AudioParams {
                sample_rate: params.sample_rate,
                channels: params.channels,
                format: *format,
            })?)),
            AudioCodec::Unknown(name) => Err(Error::DecoderOpen(format!(
                "no decoder for audio codec '{}'",
                name
            ))),
        }
    }

    fn open_video(&self, stream: &StreamInfo) -> Result<VideoDecoder> {
        let params = match &stream.params {
            CodecParameters::Video(params) => params,
            _ => {
                return Err(Error::DecoderOpen(format!(
                    "stream {} is not a video stream",
                    stream.index
                )))
            }
        };

        match &params.codec {
            VideoCodec::SyntheticBars => Ok(Box::new(BarsDecoder::new(params.width, params.height)?)),
            VideoCodec::Unknown(name) => Err(Error::DecoderOpen(format!(
                "no decoder for video codec '{}'",
                name
            ))),
        }
    }
}
