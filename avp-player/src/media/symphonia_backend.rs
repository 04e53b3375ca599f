//! Audio file demuxing and decoding using symphonia
//!
//! `SymphoniaSource` probes a file (extension used as a format hint) and
//! reports every track with a known codec as an audio stream. symphonia has
//! no video codecs, so files read through this backend never carry a video
//! stream.
//!
//! `SymphoniaDecoder` decodes one packet into one frame, interleaved as S16
//! when the codec produces 16-bit samples and F32 otherwise.

use crate::error::{Error, Result};
use crate::media::{
    AudioCodec, AudioCodecParameters, AudioFrame, AudioParams, CodecParameters, Decoded,
    Decoder, DemuxSource, Packet, ReadOutcome, SampleFormat, StreamInfo,
};
use avp_common::TimeBase;
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

/// Demux source for files symphonia can probe.
pub struct SymphoniaSource {
    format: Box<dyn FormatReader>,
    streams: Vec<StreamInfo>,
}

impl SymphoniaSource {
    /// Open and probe a media file.
    ///
    /// # Errors
    /// - File cannot be opened
    /// - No registered format recognizes the content
    pub fn open(path: &Path) -> Result<Self> {
        let open_error = |reason: String| Error::SourceOpen {
            source_uri: path.display().to_string(),
            reason,
        };

        let file = File::open(path).map_err(|e| open_error(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // Create a hint to help the format registry guess the format
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| open_error(format!("failed to probe format: {}", e)))?;

        let format = probed.format;
        let default_track = format.default_track().map(|track| track.id);

        let streams = format
            .tracks()
            .iter()
            .map(|track| {
                let params = &track.codec_params;
                let is_default = Some(track.id) == default_track;

                if params.codec == CODEC_TYPE_NULL {
                    return Ok(StreamInfo {
                        index: track.id,
                        time_base: TimeBase::MILLISECONDS,
                        params: CodecParameters::Data("unknown".to_string()),
                        is_default,
                    });
                }

                let sample_rate = params.sample_rate.unwrap_or(0);
                let time_base = match params.time_base {
                    Some(tb) => TimeBase::new(tb.numer, tb.denom)?,
                    None => TimeBase::from_rate(sample_rate).map_err(|_| {
                        open_error(format!("track {} has no time base or sample rate", track.id))
                    })?,
                };

                Ok(StreamInfo {
                    index: track.id,
                    time_base,
                    params: CodecParameters::Audio(AudioCodecParameters {
                        codec: AudioCodec::Symphonia(Box::new(params.clone())),
                        sample_rate,
                        channels: params.channels.map(|c| c.count() as u16).unwrap_or(0),
                        frame_size: params.max_frames_per_packet.map(|n| n as u32),
                    }),
                    is_default,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            path = %path.display(),
            tracks = streams.len(),
            "Opened media source"
        );

        Ok(Self { format, streams })
    }
}

impl DemuxSource for SymphoniaSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_next_packet(&mut self) -> Result<ReadOutcome> {
        match self.format.next_packet() {
            Ok(packet) => {
                let track_id = packet.track_id();
                let pts = i64::try_from(packet.ts()).unwrap_or(i64::MAX);
                let duration = packet.dur();
                Ok(ReadOutcome::Packet(Packet::new(
                    track_id,
                    pts,
                    duration,
                    packet.data,
                )))
            }
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                Ok(ReadOutcome::EndOfStream)
            }
            Err(e) => Err(Error::Read(e.to_string())),
        }
    }
}

/// One-packet-in, one-frame-out decoder backed by symphonia's codec registry.
pub struct SymphoniaDecoder {
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    pending: VecDeque<AudioFrame>,
    skipped_packets: u64,
}

impl SymphoniaDecoder {
    /// Open a decoder for the given track parameters.
    pub fn open(params: &symphonia::core::codecs::CodecParameters) -> Result<Self> {
        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| Error::DecoderOpen(format!("Failed to create decoder: {}", e)))?;

        debug!(codec = %decoder.codec_params().codec, "Opened symphonia decoder");

        Ok(Self {
            decoder,
            pending: VecDeque::new(),
            skipped_packets: 0,
        })
    }
}

impl Decoder for SymphoniaDecoder {
    type Frame = AudioFrame;

    fn submit(&mut self, packet: Packet) -> Result<()> {
        let pts = packet.pts;
        let packet = symphonia::core::formats::Packet::new_from_boxed_slice(
            packet.stream_index,
            pts.max(0) as u64,
            packet.duration,
            packet.data,
        );

        match self.decoder.decode(&packet) {
            Ok(decoded) => {
                self.pending.push_back(convert_buffer(pts, decoded));
                Ok(())
            }
            Err(SymphoniaError::DecodeError(reason)) => {
                // Corrupt packet: skip it, the stream stays decodable
                self.skipped_packets += 1;
                warn!(pts, reason, "Decode error in packet, skipping");
                Ok(())
            }
            Err(e) => Err(Error::Decode(e.to_string())),
        }
    }

    fn try_receive_frame(&mut self) -> Result<Decoded<AudioFrame>> {
        Ok(match self.pending.pop_front() {
            Some(frame) => Decoded::Frame(frame),
            None => Decoded::NeedMoreInput,
        })
    }

    fn close(&mut self) {
        if self.skipped_packets > 0 {
            info!(skipped = self.skipped_packets, "Decoder closed after skipping corrupt packets");
        }
        self.pending.clear();
    }
}

/// Convert symphonia's planar buffer into an interleaved frame.
fn convert_buffer(pts: i64, decoded: AudioBufferRef<'_>) -> AudioFrame {
    let spec = *decoded.spec();
    let capacity = decoded.capacity() as u64;
    let channels = spec.channels.count() as u16;

    if matches!(decoded, AudioBufferRef::S16(_)) {
        let mut buffer = SampleBuffer::<i16>::new(capacity, spec);
        buffer.copy_interleaved_ref(decoded);
        let data = buffer.samples().iter().flat_map(|s| s.to_ne_bytes()).collect();
        let params = AudioParams {
            sample_rate: spec.rate,
            channels,
            format: SampleFormat::S16,
        };
        AudioFrame::interleaved(pts, params, data)
    } else {
        let mut buffer = SampleBuffer::<f32>::new(capacity, spec);
        buffer.copy_interleaved_ref(decoded);
        let data = buffer.samples().iter().flat_map(|s| s.to_ne_bytes()).collect();
        let params = AudioParams {
            sample_rate: spec.rate,
            channels,
            format: SampleFormat::F32,
        };
        AudioFrame::interleaved(pts, params, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::audio::{AudioBuffer, Channels, Signal, SignalSpec};

    #[test]
    fn test_open_missing_file_is_source_error() {
        let result = SymphoniaSource::open(Path::new("/no/such/file.flac"));
        assert!(matches!(result, Err(Error::SourceOpen { .. })));
    }

    #[test]
    fn test_convert_s16_buffer_interleaves() {
        let spec = SignalSpec::new(8000, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        let mut buffer = AudioBuffer::<i16>::new(4, spec);
        buffer.render_reserved(Some(2));
        buffer.chan_mut(0).copy_from_slice(&[1, 2]);
        buffer.chan_mut(1).copy_from_slice(&[-1, -2]);

        let frame = convert_buffer(77, AudioBufferRef::S16(std::borrow::Cow::Borrowed(&buffer)));

        assert_eq!(frame.pts, 77);
        assert_eq!(frame.params.format, SampleFormat::S16);
        assert_eq!(frame.params.channels, 2);
        assert_eq!(frame.samples, 2);

        let samples: Vec<i16> = frame.planes[0]
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![1, -1, 2, -2]);
    }
}
