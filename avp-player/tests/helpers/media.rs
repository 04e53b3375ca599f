//! Scripted demux source and pass-through decoders

use avp_common::TimeBase;
use avp_player::error::{Error, Result};
use avp_player::media::{
    AudioCodec, AudioCodecParameters, AudioDecoder, AudioFrame, AudioParams, CodecParameters,
    Decoded, Decoder, DecoderFactory, DemuxSource, Packet, PixelFormat, Plane, ReadOutcome,
    SampleFormat, StreamInfo, VideoCodec, VideoCodecParameters, VideoDecoder, VideoFrame,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Stereo 48kHz signed 16-bit
pub const TEST_AUDIO: AudioParams = AudioParams {
    sample_rate: 48000,
    channels: 2,
    format: SampleFormat::S16,
};

pub fn audio_stream_info(index: u32) -> StreamInfo {
    StreamInfo {
        index,
        time_base: TimeBase::from_rate(TEST_AUDIO.sample_rate).unwrap(),
        params: CodecParameters::Audio(AudioCodecParameters {
            codec: AudioCodec::Unknown("fake-pcm".to_string()),
            sample_rate: TEST_AUDIO.sample_rate,
            channels: TEST_AUDIO.channels,
            frame_size: None,
        }),
        is_default: false,
    }
}

/// Video stream with millisecond timestamps.
pub fn video_stream_info(index: u32) -> StreamInfo {
    StreamInfo {
        index,
        time_base: TimeBase::MILLISECONDS,
        params: CodecParameters::Video(VideoCodecParameters {
            codec: VideoCodec::Unknown("fake-rgb".to_string()),
            width: 2,
            height: 2,
            pixel_format: PixelFormat::Rgb24,
        }),
        is_default: false,
    }
}

/// Audio packet whose payload decodes to `samples` frames of `value`.
pub fn audio_packet(index: u32, pts: i64, samples: usize, value: u8) -> Packet {
    let data = vec![value; samples * TEST_AUDIO.bytes_per_frame()];
    Packet::new(index, pts, samples as u64, data.into_boxed_slice())
}

/// Video packet carrying `tag` so the presented picture can be identified.
pub fn video_packet(index: u32, pts_ms: i64, tag: u8) -> Packet {
    Packet::new(index, pts_ms, 40, vec![tag].into_boxed_slice())
}

/// Demux source replaying a fixed packet list.
pub struct FakeSource {
    streams: Vec<StreamInfo>,
    packets: VecDeque<Packet>,
    /// Fail with a read error once this many packets were read
    fail_after: Option<usize>,
    reads: Arc<AtomicUsize>,
}

impl FakeSource {
    pub fn new(streams: Vec<StreamInfo>, packets: Vec<Packet>) -> Self {
        Self {
            streams,
            packets: packets.into(),
            fail_after: None,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_after(mut self, packets: usize) -> Self {
        self.fail_after = Some(packets);
        self
    }

    /// Counter of `read_next_packet` calls, shared with the test.
    pub fn reads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

impl DemuxSource for FakeSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_next_packet(&mut self) -> Result<ReadOutcome> {
        let count = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_after == Some(count) {
            return Err(Error::Read("scripted read failure".to_string()));
        }
        Ok(match self.packets.pop_front() {
            Some(packet) => ReadOutcome::Packet(packet),
            None => ReadOutcome::EndOfStream,
        })
    }
}

/// Decoders producing one frame per packet.
///
/// Audio payloads are taken as `TEST_AUDIO` samples; a video payload's first
/// byte fills a 2x2 RGB picture.
#[derive(Default)]
pub struct FakeDecoders {
    /// Audio decoder fails every submit after this many packets
    pub audio_fail_after: Option<u64>,
    /// Video decoder fails every submit after this many packets
    pub video_fail_after: Option<u64>,
}

impl DecoderFactory for FakeDecoders {
    fn open_audio(&self, _stream: &StreamInfo) -> Result<AudioDecoder> {
        Ok(Box::new(PassthroughDecoder::<AudioFrame>::new(
            self.audio_fail_after,
            |packet: Packet| AudioFrame::interleaved(packet.pts, TEST_AUDIO, packet.data.into_vec()),
        )))
    }

    fn open_video(&self, _stream: &StreamInfo) -> Result<VideoDecoder> {
        Ok(Box::new(PassthroughDecoder::<VideoFrame>::new(
            self.video_fail_after,
            |packet: Packet| {
                let tag = packet.data.first().copied().unwrap_or(0);
                VideoFrame {
                    pts: packet.pts,
                    width: 2,
                    height: 2,
                    format: PixelFormat::Rgb24,
                    planes: vec![Plane {
                        data: vec![tag; 12],
                        stride: 6,
                    }],
                }
            },
        )))
    }
}

struct PassthroughDecoder<F> {
    pending: VecDeque<F>,
    convert: fn(Packet) -> F,
    submitted: u64,
    fail_after: Option<u64>,
}

impl<F> PassthroughDecoder<F> {
    fn new(fail_after: Option<u64>, convert: fn(Packet) -> F) -> Self {
        Self {
            pending: VecDeque::new(),
            convert,
            submitted: 0,
            fail_after,
        }
    }
}

impl<F: Send + 'static> Decoder for PassthroughDecoder<F> {
    type Frame = F;

    fn submit(&mut self, packet: Packet) -> Result<()> {
        if self.fail_after.is_some_and(|limit| self.submitted >= limit) {
            return Err(Error::Decode("scripted decode failure".to_string()));
        }
        self.submitted += 1;
        self.pending.push_back((self.convert)(packet));
        Ok(())
    }

    fn try_receive_frame(&mut self) -> Result<Decoded<F>> {
        Ok(match self.pending.pop_front() {
            Some(frame) => Decoded::Frame(frame),
            None => Decoded::NeedMoreInput,
        })
    }
}
