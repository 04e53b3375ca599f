//! Audio device interface and the cpal implementation
//!
//! The device owns the callback thread. It negotiates an interleaved output
//! format, then calls the registered fill callback whenever it needs more
//! bytes of that format.

use crate::error::{Error, Result};
use crate::media::{AudioParams, SampleFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat as CpalFormat, SizedSample, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Pull callback: fill the whole buffer with interleaved bytes in the
/// device's negotiated format.
pub type FillCallback = Box<dyn FnMut(&mut [u8]) + Send + 'static>;

/// Output device driven by its own callback thread.
pub trait AudioDevice {
    /// Negotiated output format.
    fn spec(&self) -> AudioParams;

    /// Register the fill callback and begin playback.
    fn start(&mut self, fill: FillCallback) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    /// True once the device reported a stream error.
    fn has_error(&self) -> bool {
        false
    }

    /// Stop playback and release the device. The callback is not called
    /// again once this returns.
    fn close(&mut self);
}

/// Sample types the cpal stream may be built with.
trait NativeSample: SizedSample + Send + 'static {
    const WIDTH: usize;
    fn from_ne(bytes: &[u8]) -> Self;
}

impl NativeSample for i16 {
    const WIDTH: usize = 2;
    fn from_ne(bytes: &[u8]) -> Self {
        i16::from_ne_bytes([bytes[0], bytes[1]])
    }
}

impl NativeSample for i32 {
    const WIDTH: usize = 4;
    fn from_ne(bytes: &[u8]) -> Self {
        i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl NativeSample for f32 {
    const WIDTH: usize = 4;
    fn from_ne(bytes: &[u8]) -> Self {
        f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Audio output through cpal.
pub struct CpalDevice {
    device: Device,
    config: StreamConfig,
    sample_format: CpalFormat,
    stream: Option<Stream>,
    /// Stream error flag, set by cpal's error callback
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
}

impl CpalDevice {
    /// List available audio output devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::DeviceOpen(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device.
    ///
    /// # Arguments
    /// - `device_name`: device to use (None = default). Falls back to the
    ///   default device if the named one is missing.
    /// - `preferred`: stream format to ask for; signed 16-bit at its rate and
    ///   channel count is tried first, then 32-bit float
    /// - `buffer_frames`: device buffer size (None = device default)
    pub fn open(
        device_name: Option<&str>,
        preferred: Option<AudioParams>,
        buffer_frames: Option<u32>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let mut devices = host.output_devices().map_err(|e| {
                    Error::DeviceOpen(format!("Failed to enumerate devices: {}", e))
                })?;

                match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                    Some(dev) => {
                        info!("Found requested audio device: {}", name);
                        dev
                    }
                    None => {
                        warn!(
                            "Requested device '{}' not found, falling back to default device",
                            name
                        );
                        host.default_output_device().ok_or_else(|| {
                            Error::DeviceOpen(format!(
                                "Device '{}' not found and no default device available",
                                name
                            ))
                        })?
                    }
                }
            }
            None => host
                .default_output_device()
                .ok_or_else(|| Error::DeviceOpen("No default output device found".to_string()))?,
        };

        info!(
            "Using audio device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let (mut config, sample_format) = Self::get_best_config(&device, preferred)?;

        if let Some(size) = buffer_frames {
            config.buffer_size = cpal::BufferSize::Fixed(size);
            debug!("Using requested buffer size: {} frames", size);
        }

        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}, buffer_size={:?}",
            config.sample_rate.0, config.channels, sample_format, config.buffer_size
        );

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
            error_flag: Arc::new(AtomicBool::new(false)),
            error_count: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Pick a stream configuration: the preferred rate and channel count as
    /// I16, then as F32, then the device default if its format is usable.
    fn get_best_config(
        device: &Device,
        preferred: Option<AudioParams>,
    ) -> Result<(StreamConfig, CpalFormat)> {
        if let Some(want) = preferred {
            let supported: Vec<_> = device
                .supported_output_configs()
                .map_err(|e| Error::DeviceOpen(format!("Failed to get device configs: {}", e)))?
                .collect();

            for format in [CpalFormat::I16, CpalFormat::F32] {
                let matching = supported.iter().find(|config| {
                    config.channels() == want.channels
                        && config.min_sample_rate().0 <= want.sample_rate
                        && config.max_sample_rate().0 >= want.sample_rate
                        && config.sample_format() == format
                });
                if let Some(config) = matching {
                    let config = config
                        .clone()
                        .with_sample_rate(cpal::SampleRate(want.sample_rate))
                        .config();
                    return Ok((config, format));
                }
            }
            debug!(%want, "Preferred format not supported, using device default");
        }

        let supported_config = device
            .default_output_config()
            .map_err(|e| Error::DeviceOpen(format!("Failed to get default config: {}", e)))?;

        let sample_format = supported_config.sample_format();
        if to_sample_format(sample_format).is_none() {
            return Err(Error::DeviceOpen(format!(
                "Unsupported sample format: {:?}",
                sample_format
            )));
        }
        Ok((supported_config.config(), sample_format))
    }

    fn build_stream<T: NativeSample>(&self, mut fill: FillCallback) -> Result<Stream> {
        let error_flag = Arc::clone(&self.error_flag);
        let error_count = Arc::clone(&self.error_count);
        let mut scratch: Vec<u8> = Vec::new();

        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len() * T::WIDTH, 0);
                    fill(&mut scratch);
                    for (sample, bytes) in data.iter_mut().zip(scratch.chunks_exact(T::WIDTH)) {
                        *sample = T::from_ne(bytes);
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    error_flag.store(true, Ordering::SeqCst);
                    error_count.fetch_add(1, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::DeviceOpen(format!("Failed to build stream: {}", e)))
    }
}

fn to_sample_format(format: CpalFormat) -> Option<SampleFormat> {
    match format {
        CpalFormat::I16 => Some(SampleFormat::S16),
        CpalFormat::I32 => Some(SampleFormat::S32),
        CpalFormat::F32 => Some(SampleFormat::F32),
        _ => None,
    }
}

impl AudioDevice for CpalDevice {
    fn spec(&self) -> AudioParams {
        AudioParams {
            sample_rate: self.config.sample_rate.0,
            channels: self.config.channels,
            // Checked in get_best_config
            format: to_sample_format(self.sample_format).unwrap_or(SampleFormat::F32),
        }
    }

    fn start(&mut self, fill: FillCallback) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::InvalidState("audio stream already started".to_string()));
        }

        info!("Starting audio stream");

        let stream = match self.sample_format {
            CpalFormat::I16 => self.build_stream::<i16>(fill)?,
            CpalFormat::I32 => self.build_stream::<i32>(fill)?,
            CpalFormat::F32 => self.build_stream::<f32>(fill)?,
            sample_format => {
                return Err(Error::DeviceOpen(format!(
                    "Unsupported sample format: {:?}",
                    sample_format
                )))
            }
        };

        stream
            .play()
            .map_err(|e| Error::DeviceOpen(format!("Failed to start stream: {}", e)))?;

        self.stream = Some(stream);
        info!("Audio stream started successfully");
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream
                .pause()
                .map_err(|e| Error::Device(format!("Failed to pause stream: {}", e)))?;
            debug!("Audio stream paused");
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream
                .play()
                .map_err(|e| Error::Device(format!("Failed to resume stream: {}", e)))?;
            debug!("Audio stream resumed");
        }
        Ok(())
    }

    fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!("Pause before close failed: {}", e);
            }
            drop(stream);
            info!(
                errors = self.error_count.load(Ordering::SeqCst),
                "Audio stream closed"
            );
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}
