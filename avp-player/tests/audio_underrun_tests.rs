//! Integration tests for the audio callback filler
//!
//! An empty frame queue must yield silence within the callback's time budget
//! and leave the clock alone.

mod helpers;

use avp_common::{HandoffQueue, SyncClock, TimeBase};
use avp_player::audio::AudioOutput;
use avp_player::media::{AudioFrame, AudioParams, SampleFormat};
use helpers::TEST_AUDIO;
use serial_test::serial;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn output(
    frames: &Arc<HandoffQueue<AudioFrame>>,
    clock: &Arc<SyncClock>,
    device: AudioParams,
) -> AudioOutput {
    AudioOutput::new(
        Arc::clone(frames),
        Arc::clone(clock),
        TimeBase::from_rate(48000).unwrap(),
        device,
        Duration::from_millis(10),
        512,
    )
}

#[test]
#[serial]
fn test_empty_queue_fills_silence_within_budget() {
    let frames = Arc::new(HandoffQueue::new());
    let clock = Arc::new(SyncClock::new());
    let mut out = output(&frames, &clock, TEST_AUDIO);

    let mut buffer = vec![0xAAu8; 4096];
    let start = Instant::now();
    out.fill(&mut buffer);

    // One bounded wait, then immediate silence for the rest
    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(buffer.iter().all(|b| *b == 0));

    let stats = out.stats().snapshot();
    assert_eq!(stats.callbacks, 1);
    assert_eq!(stats.underruns, 1);
    assert_eq!(stats.silence_bytes, 4096);
    assert!(!clock.is_set());
}

#[test]
fn test_partial_frame_then_silence() {
    let frames = Arc::new(HandoffQueue::new());
    let clock = Arc::new(SyncClock::new());
    let mut out = output(&frames, &clock, TEST_AUDIO);

    // 100 stereo frames at pts 0.5s
    frames.push(AudioFrame::interleaved(24000, TEST_AUDIO, vec![3u8; 400]));

    let mut buffer = vec![0xAAu8; 1024];
    out.fill(&mut buffer);

    assert!(buffer[..400].iter().all(|b| *b == 3));
    assert!(buffer[400..].iter().all(|b| *b == 0));
    assert_eq!(clock.get_nanos() / 1_000_000, 500);
    assert_eq!(out.stats().snapshot().silence_bytes, 624);
}

#[test]
fn test_finished_queue_never_blocks() {
    let frames: Arc<HandoffQueue<AudioFrame>> = Arc::new(HandoffQueue::new());
    frames.finish();
    let clock = Arc::new(SyncClock::new());
    let mut out = AudioOutput::new(
        Arc::clone(&frames),
        Arc::clone(&clock),
        TimeBase::from_rate(48000).unwrap(),
        TEST_AUDIO,
        Duration::from_secs(5),
        512,
    );

    let mut buffer = vec![1u8; 2048];
    let start = Instant::now();
    for _ in 0..10 {
        out.fill(&mut buffer);
    }

    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(buffer.iter().all(|b| *b == 0));
}

#[test]
fn test_format_mismatch_converted_to_device_format() {
    let frames = Arc::new(HandoffQueue::new());
    let clock = Arc::new(SyncClock::new());
    let device = AudioParams {
        sample_rate: 48000,
        channels: 2,
        format: SampleFormat::F32,
    };
    let mut out = output(&frames, &clock, device);

    // Mono S16 at the device rate: one sample of full-scale positive
    let mono = AudioParams {
        sample_rate: 48000,
        channels: 1,
        format: SampleFormat::S16,
    };
    let samples: Vec<u8> = std::iter::repeat(i16::MAX.to_ne_bytes())
        .take(64)
        .flatten()
        .collect();
    frames.push(AudioFrame::interleaved(0, mono, samples));

    let mut buffer = vec![0u8; 8 * 8];
    out.fill(&mut buffer);

    let first_left = f32::from_ne_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
    let first_right = f32::from_ne_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]);
    assert!((first_left - 1.0).abs() < 0.01);
    assert!((first_right - 1.0).abs() < 0.01);
    assert_eq!(out.stats().snapshot().resampler_rebuilds, 1);
}
