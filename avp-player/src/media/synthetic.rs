//! Generated test source: tone audio, colour-bar video, auxiliary data
//!
//! Selected with a `testsrc:` URI, for example
//! `testsrc:duration=2,rate=48000,channels=2,fps=25,size=320x240`.
//!
//! Packets carry only the position to synthesize (first sample and count,
//! or frame number); the matching decoders render the actual samples and
//! pictures. Packets of all streams are returned interleaved by timestamp,
//! the way a muxed container would store them.

use crate::error::{Error, Result};
use crate::media::{
    AudioCodec, AudioCodecParameters, AudioFrame, AudioParams, CodecParameters, Decoded,
    Decoder, DemuxSource, Packet, PixelFormat, Plane, ReadOutcome, SampleFormat, StreamInfo,
    VideoCodec, VideoCodecParameters, VideoFrame,
};
use avp_common::TimeBase;
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::time::Duration;
use tracing::{debug, info};

/// URI scheme selecting the synthetic source.
pub const SCHEME: &str = "testsrc";

const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 0.25;
const DATA_INTERVAL_MS: i64 = 500;

pub const AUDIO_STREAM: u32 = 0;
pub const VIDEO_STREAM: u32 = 1;
pub const DATA_STREAM: u32 = 2;

/// Parameters of a generated source.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSpec {
    pub duration: Duration,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    /// Samples per channel in each audio packet
    pub samples_per_packet: u32,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub audio: bool,
    pub video: bool,
    pub data: bool,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(2),
            sample_rate: 48000,
            channels: 2,
            format: SampleFormat::S16,
            samples_per_packet: 1024,
            fps: 25,
            width: 320,
            height: 240,
            audio: true,
            video: true,
            data: true,
        }
    }
}

impl SyntheticSpec {
    /// Parse a `testsrc:` URI.
    ///
    /// # Returns
    /// `Ok(None)` when the URI uses another scheme.
    pub fn parse_uri(uri: &str) -> Result<Option<Self>> {
        let rest = match uri.strip_prefix(SCHEME) {
            Some("") => return Ok(Some(Self::default())),
            Some(rest) => match rest.strip_prefix(':') {
                Some(rest) => rest,
                None => return Ok(None),
            },
            None => return Ok(None),
        };

        let invalid = |reason: String| Error::SourceOpen {
            source_uri: uri.to_string(),
            reason,
        };

        let mut spec = Self::default();
        for option in rest.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = option
                .split_once('=')
                .ok_or_else(|| invalid(format!("expected key=value, got '{}'", option)))?;

            let number = |v: &str| -> Result<u32> {
                v.parse::<u32>()
                    .map_err(|_| invalid(format!("invalid value for {}: '{}'", key, v)))
            };
            let flag = |v: &str| -> Result<bool> {
                match v {
                    "1" | "true" | "on" => Ok(true),
                    "0" | "false" | "off" => Ok(false),
                    _ => Err(invalid(format!("invalid value for {}: '{}'", key, v))),
                }
            };

            match key {
                "duration" => {
                    spec.duration = value
                        .parse::<f64>()
                        .ok()
                        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                        .ok_or_else(|| invalid(format!("invalid duration '{}'", value)))?;
                }
                "rate" => spec.sample_rate = number(value)?,
                "channels" => {
                    spec.channels = u16::try_from(number(value)?)
                        .map_err(|_| invalid(format!("too many channels: {}", value)))?
                }
                "format" => spec.format = parse_sample_format(value).ok_or_else(|| {
                    invalid(format!("unknown sample format '{}'", value))
                })?,
                "packet" => spec.samples_per_packet = number(value)?,
                "fps" => spec.fps = number(value)?,
                "size" => {
                    let (w, h) = value
                        .split_once('x')
                        .ok_or_else(|| invalid(format!("size must be WxH, got '{}'", value)))?;
                    spec.width = number(w)?;
                    spec.height = number(h)?;
                }
                "audio" => spec.audio = flag(value)?,
                "video" => spec.video = flag(value)?,
                "data" => spec.data = flag(value)?,
                _ => return Err(invalid(format!("unknown option '{}'", key))),
            }
        }

        if spec.audio && (spec.sample_rate == 0 || spec.channels == 0 || spec.samples_per_packet == 0)
        {
            return Err(invalid("audio rate, channels and packet size must be non-zero".into()));
        }
        if spec.video && (spec.fps == 0 || spec.width == 0 || spec.height == 0) {
            return Err(invalid("video fps and size must be non-zero".into()));
        }

        Ok(Some(spec))
    }

    fn total_samples(&self) -> u64 {
        (self.duration.as_secs_f64() * self.sample_rate as f64).round() as u64
    }

    fn total_frames(&self) -> u64 {
        (self.duration.as_secs_f64() * self.fps as f64).round() as u64
    }

    fn audio_params(&self) -> AudioParams {
        AudioParams {
            sample_rate: self.sample_rate,
            channels: self.channels,
            format: self.format,
        }
    }
}

fn parse_sample_format(name: &str) -> Option<SampleFormat> {
    match name {
        "s16" => Some(SampleFormat::S16),
        "s32" => Some(SampleFormat::S32),
        "f32" => Some(SampleFormat::F32),
        "s16p" => Some(SampleFormat::S16Planar),
        "s32p" => Some(SampleFormat::S32Planar),
        "f32p" => Some(SampleFormat::F32Planar),
        _ => None,
    }
}

/// Demux source producing generated packets.
pub struct SyntheticSource {
    spec: SyntheticSpec,
    streams: Vec<StreamInfo>,
    next_sample: u64,
    next_frame: u64,
    next_data_ms: i64,
}

impl SyntheticSource {
    pub fn new(spec: SyntheticSpec) -> Result<Self> {
        let mut streams = Vec::new();

        if spec.audio {
            streams.push(StreamInfo {
                index: AUDIO_STREAM,
                time_base: TimeBase::from_rate(spec.sample_rate)?,
                params: CodecParameters::Audio(AudioCodecParameters {
                    codec: AudioCodec::SyntheticTone {
                        format: spec.format,
                    },
                    sample_rate: spec.sample_rate,
                    channels: spec.channels,
                    frame_size: Some(spec.samples_per_packet),
                }),
                is_default: true,
            });
        }

        if spec.video {
            streams.push(StreamInfo {
                index: VIDEO_STREAM,
                time_base: TimeBase::from_rate(spec.fps)?,
                params: CodecParameters::Video(VideoCodecParameters {
                    codec: VideoCodec::SyntheticBars,
                    width: spec.width,
                    height: spec.height,
                    pixel_format: PixelFormat::Yuv420p,
                }),
                is_default: true,
            });
        }

        if spec.data {
            streams.push(StreamInfo {
                index: DATA_STREAM,
                time_base: TimeBase::MILLISECONDS,
                params: CodecParameters::Data("synthetic-ticks".to_string()),
                is_default: false,
            });
        }

        info!(
            duration_ms = spec.duration.as_millis() as u64,
            audio = spec.audio,
            video = spec.video,
            "Opened synthetic source"
        );

        Ok(Self {
            spec,
            streams,
            next_sample: 0,
            next_frame: 0,
            next_data_ms: 0,
        })
    }

    /// Position of the next packet of every unfinished stream, as (nanoseconds, stream index).
    fn pending_positions(&self) -> impl Iterator<Item = (i128, u32)> + '_ {
        let audio = (self.spec.audio && self.next_sample < self.spec.total_samples()).then(|| {
            let nanos = self.next_sample as i128 * 1_000_000_000 / self.spec.sample_rate as i128;
            (nanos, AUDIO_STREAM)
        });
        let video = (self.spec.video && self.next_frame < self.spec.total_frames()).then(|| {
            let nanos = self.next_frame as i128 * 1_000_000_000 / self.spec.fps as i128;
            (nanos, VIDEO_STREAM)
        });
        let data = (self.spec.data
            && (self.next_data_ms as u128) < self.spec.duration.as_millis())
        .then(|| (self.next_data_ms as i128 * 1_000_000, DATA_STREAM));

        audio.into_iter().chain(video).chain(data)
    }
}

impl DemuxSource for SyntheticSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_next_packet(&mut self) -> Result<ReadOutcome> {
        // Ties go to the lowest stream index
        let next = self.pending_positions().min_by_key(|&(nanos, index)| (nanos, index));

        let packet = match next {
            None => return Ok(ReadOutcome::EndOfStream),
            Some((_, AUDIO_STREAM)) => {
                let remaining = self.spec.total_samples() - self.next_sample;
                let count = remaining.min(self.spec.samples_per_packet as u64);
                let mut payload = Vec::with_capacity(12);
                payload.extend_from_slice(&self.next_sample.to_le_bytes());
                payload.extend_from_slice(&(count as u32).to_le_bytes());
                let packet = Packet::new(
                    AUDIO_STREAM,
                    self.next_sample as i64,
                    count,
                    payload.into_boxed_slice(),
                );
                self.next_sample += count;
                packet
            }
            Some((_, VIDEO_STREAM)) => {
                let packet = Packet::new(
                    VIDEO_STREAM,
                    self.next_frame as i64,
                    1,
                    self.next_frame.to_le_bytes().to_vec().into_boxed_slice(),
                );
                self.next_frame += 1;
                packet
            }
            Some(_) => {
                let packet = Packet::new(
                    DATA_STREAM,
                    self.next_data_ms,
                    DATA_INTERVAL_MS as u64,
                    b"tick".to_vec().into_boxed_slice(),
                );
                self.next_data_ms += DATA_INTERVAL_MS;
                packet
            }
        };

        Ok(ReadOutcome::Packet(packet))
    }

    fn close(&mut self) {
        debug!(
            samples = self.next_sample,
            frames = self.next_frame,
            "Synthetic source closed"
        );
    }
}

fn malformed(kind: &str, len: usize) -> Error {
    Error::Decode(format!("malformed synthetic {} packet ({} bytes)", kind, len))
}

/// Renders a sine tone for audio packets from `SyntheticSource`.
pub struct ToneDecoder {
    params: AudioParams,
    pending: VecDeque<AudioFrame>,
}

impl ToneDecoder {
    pub fn new(params: AudioParams) -> Result<Self> {
        if params.sample_rate == 0 || params.channels == 0 {
            return Err(Error::DecoderOpen(format!(
                "invalid tone parameters: {}",
                params
            )));
        }
        Ok(Self {
            params,
            pending: VecDeque::new(),
        })
    }

    fn render(&self, pts: i64, first: u64, count: usize) -> AudioFrame {
        let channels = self.params.channels as usize;
        let format = self.params.format;
        let width = format.bytes_per_sample();

        let value = |n: u64| {
            let t = n as f64 / self.params.sample_rate as f64;
            TONE_AMPLITUDE * (2.0 * PI * TONE_HZ * t).sin()
        };

        if format.is_planar() {
            let mut planes = vec![Vec::with_capacity(count * width); channels];
            for i in 0..count {
                let sample = value(first + i as u64);
                for plane in planes.iter_mut() {
                    write_sample(plane, format, sample);
                }
            }
            AudioFrame::planar(pts, self.params, planes)
        } else {
            let mut data = Vec::with_capacity(count * channels * width);
            for i in 0..count {
                let sample = value(first + i as u64);
                for _ in 0..channels {
                    write_sample(&mut data, format, sample);
                }
            }
            AudioFrame::interleaved(pts, self.params, data)
        }
    }
}

fn write_sample(out: &mut Vec<u8>, format: SampleFormat, sample: f64) {
    match format.packed() {
        SampleFormat::S16 => {
            out.extend_from_slice(&((sample * i16::MAX as f64) as i16).to_ne_bytes())
        }
        SampleFormat::S32 => {
            out.extend_from_slice(&((sample * i32::MAX as f64) as i32).to_ne_bytes())
        }
        _ => out.extend_from_slice(&(sample as f32).to_ne_bytes()),
    }
}

impl Decoder for ToneDecoder {
    type Frame = AudioFrame;

    fn submit(&mut self, packet: Packet) -> Result<()> {
        let data = &packet.data;
        if data.len() != 12 {
            return Err(malformed("audio", data.len()));
        }
        let mut first = [0u8; 8];
        first.copy_from_slice(&data[..8]);
        let mut count = [0u8; 4];
        count.copy_from_slice(&data[8..]);

        let frame = self.render(
            packet.pts,
            u64::from_le_bytes(first),
            u32::from_le_bytes(count) as usize,
        );
        self.pending.push_back(frame);
        Ok(())
    }

    fn try_receive_frame(&mut self) -> Result<Decoded<AudioFrame>> {
        Ok(match self.pending.pop_front() {
            Some(frame) => Decoded::Frame(frame),
            None => Decoded::NeedMoreInput,
        })
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}

// BT.601 limited-range colour bars: white, yellow, cyan, green, magenta, red, blue, black
const BARS_YUV: [(u8, u8, u8); 8] = [
    (235, 128, 128),
    (210, 16, 146),
    (170, 166, 16),
    (145, 54, 34),
    (106, 202, 222),
    (81, 90, 240),
    (41, 240, 110),
    (16, 128, 128),
];

/// Renders scrolling colour bars for video packets from `SyntheticSource`.
pub struct BarsDecoder {
    width: u32,
    height: u32,
    pending: VecDeque<VideoFrame>,
}

impl BarsDecoder {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::DecoderOpen(format!(
                "invalid picture size {}x{}",
                width, height
            )));
        }
        Ok(Self {
            width,
            height,
            pending: VecDeque::new(),
        })
    }

    fn render(&self, pts: i64, frame_number: u64) -> VideoFrame {
        let width = self.width as usize;
        let height = self.height as usize;
        let chroma_width = width.div_ceil(2);
        let chroma_height = height.div_ceil(2);
        let shift = frame_number as usize * 4;

        let bar_at = |x: usize| BARS_YUV[((x + shift) % width) * BARS_YUV.len() / width];

        let row_y: Vec<u8> = (0..width).map(|x| bar_at(x).0).collect();
        let row_u: Vec<u8> = (0..chroma_width).map(|x| bar_at(x * 2).1).collect();
        let row_v: Vec<u8> = (0..chroma_width).map(|x| bar_at(x * 2).2).collect();

        VideoFrame {
            pts,
            width: self.width,
            height: self.height,
            format: PixelFormat::Yuv420p,
            planes: vec![
                Plane {
                    data: row_y.repeat(height),
                    stride: width,
                },
                Plane {
                    data: row_u.repeat(chroma_height),
                    stride: chroma_width,
                },
                Plane {
                    data: row_v.repeat(chroma_height),
                    stride: chroma_width,
                },
            ],
        }
    }
}

impl Decoder for BarsDecoder {
    type Frame = VideoFrame;

    fn submit(&mut self, packet: Packet) -> Result<()> {
        let data = &packet.data;
        if data.len() != 8 {
            return Err(malformed("video", data.len()));
        }
        let mut number = [0u8; 8];
        number.copy_from_slice(data);
        let frame = self.render(packet.pts, u64::from_le_bytes(number));
        self.pending.push_back(frame);
        Ok(())
    }

    fn try_receive_frame(&mut self) -> Result<Decoded<VideoFrame>> {
        Ok(match self.pending.pop_front() {
            Some(frame) => Decoded::Frame(frame),
            None => Decoded::NeedMoreInput,
        })
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}
