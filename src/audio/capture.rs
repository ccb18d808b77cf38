//! Microphone capture
//!
//! The read loop pulls fixed-size blocks from the microphone channel, scales
//! the raw words into int16, pairs every sample with the time-aligned
//! playback reference and hands complete frames on. With audio processing
//! enabled frames go to the [`FrameProcessor`] and a forward loop relays its
//! output; otherwise microphone frames are emitted directly.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::control::{LoopControl, LoopState, RunGuard};
use crate::audio::events::Listeners;
use crate::audio::hal::{CaptureChannel, Clock};
use crate::audio::processor::FrameProcessor;
use crate::audio::reference::{ReferenceAligner, ReferenceFeed};
use crate::audio::scaling::{microphone_sample, AdaptiveScaler};
use crate::config::AudioConfiguration;
use crate::constants::FEED_CHANNELS;
use crate::error::AudioError;
use crate::timing::{ms_to_samples, samples_to_us};

/// How often the forward loop checks its running flag
const FORWARD_POLL: Duration = Duration::from_millis(100);

struct CaptureSettings {
    chunk_samples: usize,
    microphone_gain_bits: u8,
    auto_volume_enabled: bool,
    smoothing_factor: f32,
    enable_audio_processing: bool,
}

struct CaptureShared<C: CaptureChannel> {
    channel: Mutex<C>,
    control: Arc<LoopControl>,
    reference: Arc<ReferenceFeed>,
    clock: Arc<dyn Clock>,
    processor: Arc<dyn FrameProcessor>,
    settings: CaptureSettings,
    data_available: Listeners<[u8]>,
    recording_changed: Listeners<bool>,
}

/// Capture pipeline owning the microphone channel and the reference feed
pub struct AudioCapture<C: CaptureChannel> {
    shared: Arc<CaptureShared<C>>,
    forward_running: Arc<AtomicBool>,
    forward_handle: Option<JoinHandle<()>>,
}

impl<C: CaptureChannel> AudioCapture<C> {
    pub fn new(
        channel: C,
        config: &AudioConfiguration,
        processor: Arc<dyn FrameProcessor>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AudioError> {
        config.check_buffer_len()?;

        let settings = CaptureSettings {
            chunk_samples: processor.feed_chunk_samples(),
            microphone_gain_bits: config.microphone_gain_bits.min(16),
            auto_volume_enabled: config.recording_auto_volume_enabled,
            smoothing_factor: config.recording_smoothing_factor,
            enable_audio_processing: config.enable_audio_processing,
        };

        let shared = Arc::new(CaptureShared {
            channel: Mutex::new(channel),
            control: Arc::new(LoopControl::new("recording")),
            reference: Arc::new(ReferenceFeed::new(ms_to_samples(config.audio_buffer_ms * 2))),
            clock,
            processor,
            settings,
            data_available: Listeners::new(),
            recording_changed: Listeners::new(),
        });

        let forward_running = Arc::new(AtomicBool::new(true));
        let forward_handle = if shared.settings.enable_audio_processing {
            let shared = shared.clone();
            let running = forward_running.clone();
            let handle = thread::Builder::new()
                .name("capture-forward".into())
                .spawn(move || shared.forward_loop(&running))
                .map_err(|e| AudioError::StreamError(e.to_string()))?;
            Some(handle)
        } else {
            None
        };

        Ok(Self {
            shared,
            forward_running,
            forward_handle,
        })
    }

    /// Reference feed the playback pipeline writes into
    pub fn reference_feed(&self) -> Arc<ReferenceFeed> {
        self.shared.reference.clone()
    }

    pub fn on_data_available<F>(&self, listener: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.shared.data_available.add(listener);
    }

    pub fn on_recording_changed<F>(&self, listener: F)
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.shared.recording_changed.add(listener);
    }

    /// Start recording. Returns `false` if already recording.
    pub fn start(&self) -> bool {
        let Some(epoch) = self.shared.control.request_start() else {
            return false;
        };

        tracing::info!("Starting recorder");

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("capture".into())
            .spawn(move || shared.read_loop(epoch));

        if let Err(e) = spawned {
            tracing::error!("Failed to spawn capture thread: {}", e);
            self.shared.control.finish(epoch);
            return false;
        }

        self.shared.recording_changed.call(&true);
        true
    }

    /// Stop recording. Returns immediately; the loop tears down after its
    /// current block. Returns `false` if not recording.
    pub fn stop(&self) -> bool {
        if !self.shared.control.request_stop() {
            return false;
        }

        tracing::info!("Stopping recorder");
        self.shared.recording_changed.call(&false);
        true
    }

    /// Wait for the read loop to exit
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        self.shared.control.wait_stopped(timeout)
    }

    pub fn is_recording(&self) -> bool {
        self.shared.control.is_requested()
    }

    pub fn state(&self) -> LoopState {
        self.shared.control.state()
    }

    /// Stop recording and the forward loop
    pub fn shutdown(&mut self) {
        if self.is_recording() {
            self.stop();
        }

        self.forward_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.forward_handle.take() {
            let _ = handle.join();
        }
    }
}

impl<C: CaptureChannel> Drop for AudioCapture<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<C: CaptureChannel> CaptureShared<C> {
    fn read_loop(&self, epoch: u64) {
        let Some(run) = self.control.enter(epoch) else {
            return;
        };

        let mut channel = self.channel.lock();

        if let Err(e) = self.record(&mut *channel, &run, epoch) {
            tracing::error!("Recording failed: {}", e);
        }

        run.stopping();
        tracing::info!("Exiting read loop");

        if let Err(e) = channel.disable() {
            tracing::error!("Failed to disable capture channel: {}", e);
        }

        drop(channel);
        drop(run);

        if self.control.finish(epoch) {
            self.recording_changed.call(&false);
        }
    }

    fn record(&self, channel: &mut C, run: &RunGuard, epoch: u64) -> Result<(), AudioError> {
        let settings = &self.settings;
        let channels = if settings.enable_audio_processing {
            FEED_CHANNELS
        } else {
            1
        };

        let mut raw = vec![0i32; settings.chunk_samples];
        let mut reference = vec![0i16; settings.chunk_samples];
        let mut frame = vec![0i16; settings.chunk_samples * FEED_CHANNELS];
        let mut frame_offset = 0;

        let mut scaler = AdaptiveScaler::new(settings.smoothing_factor);
        let mut aligner = ReferenceAligner::new();

        channel.enable()?;

        // Samples are taken from the moment the channel is enabled.
        let mut recording_time = self.clock.now_us();
        run.running();

        while self.control.should_run(epoch) {
            let samples = channel.read(&mut raw)?.min(raw.len());

            aligner.pull(&self.reference, recording_time, &mut reference[..samples]);
            recording_time += samples_to_us(samples);

            for (&word, &reference_sample) in raw[..samples].iter().zip(&reference[..samples]) {
                let raw_sample = microphone_sample(word, settings.microphone_gain_bits);
                let sample = if settings.auto_volume_enabled {
                    scaler.scale(raw_sample)
                } else {
                    raw_sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16
                };

                frame[frame_offset] = sample;
                frame_offset += 1;
                if channels == FEED_CHANNELS {
                    frame[frame_offset] = reference_sample;
                    frame_offset += 1;
                }

                if frame_offset >= frame.len() {
                    self.emit_frame(&frame);
                    frame_offset = 0;
                }
            }
        }

        Ok(())
    }

    fn emit_frame(&self, frame: &[i16]) {
        if self.settings.enable_audio_processing {
            self.processor.feed(frame);
        } else {
            self.data_available.call(&to_bytes(frame));
        }
    }

    fn forward_loop(&self, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            if let Some(frame) = self.processor.fetch(FORWARD_POLL) {
                self.data_available.call(&to_bytes(&frame));
            }
        }
        tracing::debug!("Exiting forward loop");
    }
}

/// Little-endian PCM16 bytes
pub fn to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}
