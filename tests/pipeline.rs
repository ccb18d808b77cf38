mod common;

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{mic_word, packet, recorder, wait_for, FakeCapture, FakePlayback, ManualClock, TIMEOUT};
use intercom_audio::audio::{
    AudioCapture, AudioPlayback, FrameProcessor, LoopState, PassthroughProcessor, ReferenceAligner,
    ReferenceFeed,
};
use intercom_audio::config::AudioConfiguration;
use intercom_audio::constants::MIN_AUDIO_BUFFER_MS;
use intercom_audio::error::AudioError;
use intercom_audio::timing::samples_to_us;

fn playback_config() -> AudioConfiguration {
    AudioConfiguration {
        audio_buffer_ms: 100,
        playback_auto_volume_enabled: false,
        ..Default::default()
    }
}

fn capture_config(processing: bool) -> AudioConfiguration {
    AudioConfiguration {
        enable_audio_processing: processing,
        recording_auto_volume_enabled: false,
        microphone_gain_bits: 4,
        ..Default::default()
    }
}

fn source() -> SocketAddr {
    SocketAddr::from(([192, 168, 1, 30], 40000))
}

fn samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Records every fed frame and never produces output
#[derive(Default)]
struct RecordingProcessor {
    frames: Mutex<Vec<Vec<i16>>>,
}

impl FrameProcessor for RecordingProcessor {
    fn feed_chunk_samples(&self) -> usize {
        4
    }

    fn feed(&self, frame: &[i16]) {
        self.frames.lock().push(frame.to_vec());
    }

    fn fetch(&self, timeout: Duration) -> Option<Vec<i16>> {
        std::thread::sleep(timeout.min(Duration::from_millis(10)));
        None
    }
}

#[test]
fn playback_plays_lead_time_then_audio_then_stops_when_exhausted() {
    let (channel, written) = FakePlayback::new(640);
    let (channel, gate) = channel.gated();
    let preloaded = channel.preloaded_total.clone();
    let disabled = channel.disabled.clone();

    let feed = Arc::new(ReferenceFeed::new(6400));
    let playback =
        AudioPlayback::new(channel, &playback_config(), feed, ManualClock::new(1_000_000)).unwrap();

    let (playing, on_playing) = recorder::<bool>();
    playback.on_playing_changed(on_playing);
    let (exhausted, on_exhausted) = recorder::<()>();
    playback.on_buffer_exhausted(on_exhausted);

    assert!(playback.start());
    assert!(!playback.start());

    for seq in 0..5 {
        playback.add_samples(source(), &packet(seq, 320, 1000));
    }
    gate.send(()).unwrap();

    let mut blocks = Vec::new();
    while let Ok(block) = written.recv_timeout(Duration::from_millis(500)) {
        blocks.push(block);
    }

    assert!(playback.wait_stopped(TIMEOUT));
    assert_eq!(blocks.len(), 11);
    assert!(blocks.iter().all(|b| b.len() == 320));
    assert!(blocks[..5].iter().flatten().all(|&s| s == 0));
    assert!(blocks[5..10].iter().flatten().all(|&s| s == 1000));
    assert!(blocks[10].iter().all(|&s| s == 0));

    assert_eq!(*playing.lock(), vec![true, false]);
    assert_eq!(exhausted.lock().len(), 1);
    assert!(!playback.is_playing());
    assert_eq!(playback.state(), LoopState::Stopped);
    assert_eq!(preloaded.load(Ordering::SeqCst), 640);
    assert_eq!(disabled.load(Ordering::SeqCst), 1);
}

#[test]
fn playback_feeds_reference_with_speaker_timing() {
    let (channel, written) = FakePlayback::new(640);
    let (channel, gate) = channel.gated();
    let (channel, pace) = channel.paced();

    let feed = Arc::new(ReferenceFeed::new(6400));
    let playback = AudioPlayback::new(
        channel,
        &playback_config(),
        feed.clone(),
        ManualClock::new(1_000_000),
    )
    .unwrap();

    assert!(playback.start());
    for seq in 0..5 {
        playback.add_samples(source(), &packet(seq, 320, 1000));
    }
    gate.send(()).unwrap();

    // Mixer audio starts sounding once the 640 preloaded samples have played
    let first_block_us = 1_000_000 + samples_to_us(640);

    let mut blocks = Vec::new();
    for fed in 1..=11usize {
        // Block `fed` is in the feed while the speaker write is held
        assert!(wait_for(|| feed.available_samples() == fed * 320));
        assert_eq!(feed.end_time_us(), first_block_us + fed as i64 * samples_to_us(320));

        if fed == 11 {
            break;
        }
        pace.send(()).unwrap();
        blocks.push(written.recv_timeout(TIMEOUT).unwrap());
    }

    // The feed holds exactly what went to the speaker, starting at the first block
    let mut reference = vec![0i16; 11 * 320];
    let mut aligner = ReferenceAligner::new();
    assert_eq!(aligner.pull(&feed, first_block_us, &mut reference), 11 * 320);
    assert_eq!(&reference[..10 * 320], &blocks.concat()[..]);
    assert!(reference[..5 * 320].iter().all(|&s| s == 0));
    assert!(reference[5 * 320..10 * 320].iter().all(|&s| s == 1000));
    assert!(reference[10 * 320..].iter().all(|&s| s == 0));

    pace.send(()).unwrap();
    assert!(playback.wait_stopped(TIMEOUT));
    assert_eq!(feed.available_samples(), 0);
}

#[test]
fn pipelines_reject_buffer_shorter_than_a_block() {
    let config = AudioConfiguration {
        audio_buffer_ms: MIN_AUDIO_BUFFER_MS - 1,
        ..playback_config()
    };

    let (channel, _written) = FakePlayback::new(320);
    let playback = AudioPlayback::new(
        channel,
        &config,
        Arc::new(ReferenceFeed::new(6400)),
        ManualClock::new(0),
    );
    assert!(matches!(playback, Err(AudioError::InvalidConfig(_))));

    let (channel, _blocks) = FakeCapture::new();
    let capture = AudioCapture::new(
        channel,
        &config,
        Arc::new(PassthroughProcessor::new(4, 4)),
        ManualClock::new(0),
    );
    assert!(matches!(capture, Err(AudioError::InvalidConfig(_))));

    // The shortest accepted buffer plays a full block without tripping the mixer
    let (channel, written) = FakePlayback::new(320);
    let playback = AudioPlayback::new(
        channel,
        &AudioConfiguration {
            audio_buffer_ms: MIN_AUDIO_BUFFER_MS,
            ..playback_config()
        },
        Arc::new(ReferenceFeed::new(6400)),
        ManualClock::new(0),
    )
    .unwrap();
    assert!(playback.start());
    playback.add_samples(source(), &packet(0, 160, 500));
    assert!(wait_for(|| !playback.is_playing()));
    assert!(playback.wait_stopped(TIMEOUT));
    assert!(written.try_iter().flatten().any(|s| s == 500));
}

#[test]
fn playback_stop_before_running_tears_down_once() {
    let (channel, written) = FakePlayback::new(320);
    let (channel, gate) = channel.gated();
    let disabled = channel.disabled.clone();

    let playback = AudioPlayback::new(
        channel,
        &playback_config(),
        Arc::new(ReferenceFeed::new(6400)),
        ManualClock::new(0),
    )
    .unwrap();
    let (playing, on_playing) = recorder::<bool>();
    playback.on_playing_changed(on_playing);

    assert!(playback.start());
    playback.add_samples(source(), &packet(0, 320, 1000));
    assert!(wait_for(|| playback.state() == LoopState::Starting));
    assert!(playback.stop());
    assert!(!playback.stop());
    gate.send(()).unwrap();

    assert!(playback.wait_stopped(TIMEOUT));
    assert!(written.try_recv().is_err());
    assert_eq!(*playing.lock(), vec![true, false]);
    assert_eq!(disabled.load(Ordering::SeqCst), 1);
}

#[test]
fn playback_restarts_after_stopping() {
    let (channel, written) = FakePlayback::new(320);
    let playback = AudioPlayback::new(
        channel,
        &playback_config(),
        Arc::new(ReferenceFeed::new(6400)),
        ManualClock::new(0),
    )
    .unwrap();

    for round in 0..2 {
        assert!(playback.start());
        playback.add_samples(source(), &packet(round, 320, 700));
        assert!(wait_for(|| !playback.is_playing()));
        assert!(playback.wait_stopped(TIMEOUT));
    }

    let blocks: Vec<Vec<i16>> = written.try_iter().collect();
    let audible = blocks.iter().filter(|b| b.iter().all(|&s| s == 700)).count();
    assert_eq!(audible, 2);
}

#[test]
fn set_volume_clamps_and_notifies() {
    let (channel, _written) = FakePlayback::new(320);
    let playback = AudioPlayback::new(
        channel,
        &playback_config(),
        Arc::new(ReferenceFeed::new(6400)),
        ManualClock::new(0),
    )
    .unwrap();
    let (volumes, on_volume) = recorder::<f32>();
    playback.on_volume_changed(on_volume);

    assert_eq!(playback.volume(), 1.0);
    playback.set_volume(0.5);
    playback.set_volume(2.0);
    playback.set_volume(-1.0);

    assert_eq!(*volumes.lock(), vec![0.5, 1.0, 0.0]);
    assert_eq!(playback.volume(), 0.0);
}

#[test]
fn capture_without_processing_emits_microphone_frames() {
    let (channel, blocks) = FakeCapture::new();
    let enabled = channel.enabled.clone();
    let disabled = channel.disabled.clone();

    let capture = AudioCapture::new(
        channel,
        &capture_config(false),
        Arc::new(PassthroughProcessor::new(4, 4)),
        ManualClock::new(0),
    )
    .unwrap();

    let (frames, on_frame) = recorder::<Vec<i16>>();
    capture.on_data_available(move |data: &[u8]| on_frame(&samples(data)));
    let (recording, on_recording) = recorder::<bool>();
    capture.on_recording_changed(on_recording);

    assert!(capture.start());
    assert!(capture.is_recording());

    let words = |values: [i16; 4]| values.iter().map(|&v| mic_word(v, 4)).collect::<Vec<_>>();
    blocks.send(words([100, -200, 300, -400])).unwrap();
    blocks.send(words([500, 600, 700, 800])).unwrap();

    assert!(wait_for(|| frames.lock().len() == 1));
    assert_eq!(
        frames.lock()[0],
        vec![100, -200, 300, -400, 500, 600, 700, 800]
    );

    assert!(capture.stop());
    // Unblock the pending read
    blocks.send(words([0; 4])).unwrap();
    assert!(capture.wait_stopped(TIMEOUT));

    assert_eq!(*recording.lock(), vec![true, false]);
    assert_eq!(frames.lock().len(), 1);
    assert_eq!(enabled.load(Ordering::SeqCst), 1);
    assert_eq!(disabled.load(Ordering::SeqCst), 1);
}

#[test]
fn capture_feeds_processor_with_aligned_reference() {
    let (channel, blocks) = FakeCapture::new();
    let processor = Arc::new(RecordingProcessor::default());

    let mut capture = AudioCapture::new(
        channel,
        &capture_config(true),
        processor.clone(),
        ManualClock::new(0),
    )
    .unwrap();

    // Reference audio that started playing at t = 0
    let reference: Vec<i16> = (1..=16).collect();
    capture.reference_feed().feed(0, &reference);

    assert!(capture.start());
    blocks.send([10, 20, 30, 40].iter().map(|&v| mic_word(v, 4)).collect()).unwrap();
    blocks.send([50, 60, 70, 80].iter().map(|&v| mic_word(v, 4)).collect()).unwrap();

    assert!(wait_for(|| processor.frames.lock().len() == 2));
    assert_eq!(
        *processor.frames.lock(),
        vec![
            vec![10, 1, 20, 2, 30, 3, 40, 4],
            vec![50, 5, 60, 6, 70, 7, 80, 8],
        ]
    );

    capture.stop();
    drop(blocks);
    assert!(capture.wait_stopped(TIMEOUT));
    capture.shutdown();
}

#[test]
fn capture_forwards_processor_output() {
    let (channel, blocks) = FakeCapture::new();
    let capture = AudioCapture::new(
        channel,
        &capture_config(true),
        Arc::new(PassthroughProcessor::new(4, 4)),
        ManualClock::new(0),
    )
    .unwrap();

    let (frames, on_frame) = recorder::<Vec<i16>>();
    capture.on_data_available(move |data: &[u8]| on_frame(&samples(data)));

    assert!(capture.start());
    blocks.send([1, 2, 3, 4].iter().map(|&v| mic_word(v, 4)).collect()).unwrap();

    assert!(wait_for(|| frames.lock().len() == 1));
    assert_eq!(frames.lock()[0], vec![1, 2, 3, 4]);
}

#[test]
fn capture_hardware_failure_ends_recording() {
    let (channel, blocks) = FakeCapture::new();
    let capture = AudioCapture::new(
        channel,
        &capture_config(false),
        Arc::new(PassthroughProcessor::new(4, 4)),
        ManualClock::new(0),
    )
    .unwrap();

    let (recording, on_recording) = recorder::<bool>();
    capture.on_recording_changed(on_recording);

    assert!(capture.start());
    drop(blocks);

    assert!(capture.wait_stopped(TIMEOUT));
    assert!(!capture.is_recording());
    assert_eq!(*recording.lock(), vec![true, false]);
}
