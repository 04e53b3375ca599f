//! Audio format conversion using rubato
//!
//! Converts decoded frames to the output device's format: sample encoding,
//! channel count and sample rate. A `Resampler` is built for one input
//! format; the audio output rebuilds it whenever a frame arrives in a
//! different format.
//!
//! Rate conversion runs on fixed input chunks. Samples that do not fill a
//! whole chunk are carried over to the next frame.

use crate::error::{Error, Result};
use crate::media::{AudioFrame, AudioParams, SampleFormat};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Input frames per rate-conversion chunk
pub const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Rate conversion state: the rubato resampler and the partial input chunk.
struct RateConverter {
    resampler: FastFixedIn<f32>,
    carry: Vec<Vec<f32>>,
}

/// Converts frames of one input format to the output format.
pub struct Resampler {
    input: AudioParams,
    output: AudioParams,
    rate: Option<RateConverter>,
}

impl Resampler {
    /// Create a converter from `input` to `output`.
    ///
    /// # Errors
    /// - A zero sample rate or channel count on either side
    /// - A planar output format (devices take interleaved samples)
    pub fn new(input: AudioParams, output: AudioParams) -> Result<Self> {
        if input.sample_rate == 0 || input.channels == 0 {
            return Err(Error::Resample(format!("invalid input format {}", input)));
        }
        if output.sample_rate == 0 || output.channels == 0 {
            return Err(Error::Resample(format!("invalid output format {}", output)));
        }
        if output.format.is_planar() {
            return Err(Error::Resample(format!(
                "output format must be interleaved, got {:?}",
                output.format
            )));
        }

        let rate = if input.sample_rate != output.sample_rate {
            Some(RateConverter {
                resampler: Self::create_resampler(
                    input.sample_rate,
                    output.sample_rate,
                    output.channels,
                    RESAMPLE_CHUNK_FRAMES,
                )?,
                carry: vec![Vec::with_capacity(RESAMPLE_CHUNK_FRAMES); output.channels as usize],
            })
        } else {
            None
        };

        debug!(%input, %output, resampling = rate.is_some(), "Created audio converter");

        Ok(Self {
            input,
            output,
            rate,
        })
    }

    /// Format of the frames this converter accepts.
    pub fn input(&self) -> AudioParams {
        self.input
    }

    pub fn output(&self) -> AudioParams {
        self.output
    }

    /// Convert one frame to interleaved output bytes.
    ///
    /// May return fewer (or more) sample frames than the rate ratio implies
    /// for this frame alone, because partial chunks carry over.
    pub fn convert(&mut self, frame: &AudioFrame) -> Result<Vec<u8>> {
        if frame.params != self.input {
            return Err(Error::Resample(format!(
                "frame format {} does not match converter input {}",
                frame.params, self.input
            )));
        }

        let planar = Self::to_planar(frame)?;
        let planar = Self::remix(planar, self.output.channels as usize);

        let planar = match self.rate.as_mut() {
            Some(rate) => rate.process(planar)?,
            None => planar,
        };

        Ok(encode_interleaved(&Self::interleave(planar), self.output.format))
    }

    /// Decode a frame's planes to one f32 buffer per channel.
    fn to_planar(frame: &AudioFrame) -> Result<Vec<Vec<f32>>> {
        let format = frame.params.format;
        let channels = frame.params.channels as usize;

        if format.is_planar() {
            if frame.planes.len() != channels {
                return Err(Error::Resample(format!(
                    "expected {} planes, frame has {}",
                    channels,
                    frame.planes.len()
                )));
            }
            Ok(frame
                .planes
                .iter()
                .map(|plane| decode_samples(plane, format))
                .collect())
        } else {
            let plane = frame
                .planes
                .first()
                .ok_or_else(|| Error::Resample("interleaved frame has no data".to_string()))?;
            Ok(Self::deinterleave(&decode_samples(plane, format), channels))
        }
    }

    /// Map channels: mono is duplicated, downmix to mono averages, other
    /// layouts keep the leading channels and pad with silence.
    fn remix(planar: Vec<Vec<f32>>, out_channels: usize) -> Vec<Vec<f32>> {
        let in_channels = planar.len();
        if in_channels == out_channels || in_channels == 0 {
            return planar;
        }

        let frames = planar[0].len();
        if in_channels == 1 {
            return vec![planar[0].clone(); out_channels];
        }
        if out_channels == 1 {
            let mixed = (0..frames)
                .map(|i| planar.iter().map(|ch| ch[i]).sum::<f32>() / in_channels as f32)
                .collect();
            return vec![mixed];
        }

        let mut out = planar;
        out.truncate(out_channels);
        out.resize(out_channels, vec![0.0; frames]);
        out
    }

    /// Create a rubato resampler.
    ///
    /// FastFixedIn with septic interpolation: good quality at a cost the
    /// device callback can afford.
    fn create_resampler(
        input_rate: u32,
        output_rate: u32,
        channels: u16,
        chunk_size: usize,
    ) -> Result<FastFixedIn<f32>> {
        FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0, // max_relative_ratio (no runtime changes)
            PolynomialDegree::Septic,
            chunk_size,
            channels as usize,
        )
        .map_err(|e| Error::Resample(format!("Failed to create resampler: {}", e)))
    }

    /// Convert interleaved samples to planar format.
    ///
    /// Input:  [L, R, L, R, L, R, ...]
    /// Output: [[L, L, L, ...], [R, R, R, ...]]
    fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
        let frames = samples.len() / channels;
        let mut planar = vec![Vec::with_capacity(frames); channels];

        for frame in samples.chunks_exact(channels) {
            for (plane, sample) in planar.iter_mut().zip(frame) {
                plane.push(*sample);
            }
        }

        planar
    }

    /// Convert planar samples to interleaved format.
    ///
    /// Input:  [[L, L, L, ...], [R, R, R, ...]]
    /// Output: [L, R, L, R, L, R, ...]
    fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
        let Some(first) = planar.first() else {
            return Vec::new();
        };

        let frames = first.len();
        let mut interleaved = Vec::with_capacity(frames * planar.len());
        for i in 0..frames {
            for channel in &planar {
                interleaved.push(channel.get(i).copied().unwrap_or(0.0));
            }
        }

        interleaved
    }
}

impl RateConverter {
    /// Append input and resample every complete chunk.
    fn process(&mut self, planar: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
        for (carry, input) in self.carry.iter_mut().zip(planar) {
            carry.extend(input);
        }

        let mut output: Vec<Vec<f32>> = vec![Vec::new(); self.carry.len()];
        loop {
            let needed = self.resampler.input_frames_next();
            if self.carry.first().map_or(0, Vec::len) < needed {
                break;
            }

            let chunk: Vec<&[f32]> = self.carry.iter().map(|c| &c[..needed]).collect();
            let resampled = self
                .resampler
                .process(&chunk, None)
                .map_err(|e| Error::Resample(format!("Resampling failed: {}", e)))?;

            for (out, channel) in output.iter_mut().zip(resampled) {
                out.extend(channel);
            }
            for carry in self.carry.iter_mut() {
                carry.drain(..needed);
            }
        }

        Ok(output)
    }
}

/// Decode raw bytes of `format` to normalized f32 samples.
pub fn decode_samples(bytes: &[u8], format: SampleFormat) -> Vec<f32> {
    match format.packed() {
        SampleFormat::S16 => bytes
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect(),
        SampleFormat::S32 => bytes
            .chunks_exact(4)
            .map(|b| (i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f64 / 2_147_483_648.0) as f32)
            .collect(),
        _ => bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    }
}

/// Encode normalized f32 samples as raw bytes of `format`, clamping to full scale.
pub fn encode_interleaved(samples: &[f32], format: SampleFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * format.bytes_per_sample());
    for &sample in samples {
        let sample = sample.clamp(-1.0, 1.0);
        match format.packed() {
            SampleFormat::S16 => out.extend_from_slice(&((sample * 32767.0) as i16).to_ne_bytes()),
            SampleFormat::S32 => {
                out.extend_from_slice(&((sample as f64 * i32::MAX as f64) as i32).to_ne_bytes())
            }
            _ => out.extend_from_slice(&sample.to_ne_bytes()),
        }
    }
    out
}
