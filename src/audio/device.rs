//! Audio device lookup and cpal-backed hardware channels
//!
//! cpal delivers and requests audio from its own callback threads. The
//! channels here bridge those callbacks to the blocking [`CaptureChannel`]
//! and [`PlaybackChannel`] calls the pipelines expect, using bounded
//! crossbeam queues. The cpal stream lives on a dedicated thread for as long
//! as the channel is enabled.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::hal::{CaptureChannel, PlaybackChannel};
use crate::constants::SAMPLE_RATE;
use crate::error::AudioError;

/// Capture blocks queued between the cpal callback and the read loop
const CAPTURE_QUEUE_BLOCKS: usize = 32;

/// Playback blocks queued between the write loop and the cpal callback
const PLAYBACK_QUEUE_BLOCKS: usize = 4;

/// How long a blocking read or write waits for the hardware
const IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Input samples are left-aligned so that full scale sits one bit below the sign bit
const CAPTURE_FULL_SCALE: f32 = (1u32 << 30) as f32;

/// Largest positive input word; 2^30 itself would wrap to negative full scale
const CAPTURE_MAX_WORD: i32 = (1 << 30) - 1;

/// Left-aligned microphone word for one float input sample
fn capture_word(sample: f32) -> i32 {
    ((sample.clamp(-1.0, 1.0) * CAPTURE_FULL_SCALE) as i32).min(CAPTURE_MAX_WORD)
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Mono-compatible input config at the intercom sample rate
    pub fn input_stream_config(&self) -> Result<StreamConfig, AudioError> {
        let default_config = self
            .inner
            .default_input_config()
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;

        Ok(StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        })
    }

    /// Output config at the intercom sample rate
    pub fn output_stream_config(&self) -> Result<StreamConfig, AudioError> {
        let default_config = self
            .inner
            .default_output_config()
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;

        Ok(StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        })
    }
}

/// Device listing entry
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
}

/// List all available audio devices
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<DeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let is_default = default_input_name.as_ref() == Some(&name);
                devices.push(DeviceInfo {
                    name,
                    is_input: true,
                    is_output: false,
                    is_default,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);

                // Duplex devices show up in both lists
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                } else {
                    devices.push(DeviceInfo {
                        name,
                        is_input: false,
                        is_output: true,
                        is_default,
                    });
                }
            }
        }
    }

    devices
}

/// Find an input device by name, or the default input device
pub fn get_input_device(name: Option<&str>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    match name {
        Some(name) => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
            find_by_name(devices, name)
        }
        None => host
            .default_input_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string())),
    }
}

/// Find an output device by name, or the default output device
pub fn get_output_device(name: Option<&str>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    match name {
        Some(name) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
            find_by_name(devices, name)
        }
        None => host
            .default_output_device()
            .map(AudioDevice::from_cpal)
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string())),
    }
}

fn find_by_name(
    devices: impl Iterator<Item = cpal::Device>,
    name: &str,
) -> Result<AudioDevice, AudioError> {
    devices
        .filter(|device| device.name().map(|n| n == name).unwrap_or(false))
        .map(AudioDevice::from_cpal)
        .next()
        .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))
}

/// Keeps a cpal stream alive on its own thread
struct StreamThread {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    /// Spawn `build` on a new thread, play the stream it returns and wait
    /// until it is up.
    fn spawn<F>(name: &str, build: F) -> Result<Self, AudioError>
    where
        F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running_for_loop = running.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::CpalError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, stopping the device
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv_timeout(IO_TIMEOUT)
            .map_err(|_| AudioError::StreamError("Audio stream did not start".to_string()))
            .and_then(|result| result);

        let stream_thread = Self { running, handle };
        match ready {
            Ok(()) => Ok(stream_thread),
            Err(e) => {
                stream_thread.stop();
                Err(e)
            }
        }
    }

    fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.handle.join();
    }
}

/// Microphone channel backed by a cpal input stream
///
/// Delivers the first input channel as left-aligned 32-bit words.
pub struct CpalCaptureChannel {
    device_name: Option<String>,
    stream: Option<StreamThread>,
    rx: Option<Receiver<Vec<i32>>>,
    pending: VecDeque<i32>,
}

impl CpalCaptureChannel {
    /// Capture from the named input device, or the default one
    pub fn new(device_name: Option<String>) -> Result<Self, AudioError> {
        // Fail early on a missing device
        let device = get_input_device(device_name.as_deref())?;
        tracing::info!("Using input device: {}", device.name);

        Ok(Self {
            device_name,
            stream: None,
            rx: None,
            pending: VecDeque::new(),
        })
    }
}

impl CaptureChannel for CpalCaptureChannel {
    fn enable(&mut self) -> Result<(), AudioError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let (tx, rx) = bounded::<Vec<i32>>(CAPTURE_QUEUE_BLOCKS);
        let device_name = self.device_name.clone();

        let stream = StreamThread::spawn("cpal-input", move || {
            let device = get_input_device(device_name.as_deref())?;
            let config = device.input_stream_config()?;
            let channels = config.channels.max(1) as usize;

            device
                .into_inner()
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let words: Vec<i32> = data
                            .chunks(channels)
                            .map(|frame| capture_word(frame[0]))
                            .collect();

                        // Drop the block if the read loop is behind
                        let _ = tx.try_send(words);
                    },
                    move |err| {
                        tracing::error!("Input stream error: {}", err);
                    },
                    None,
                )
                .map_err(|e| AudioError::CpalError(e.to_string()))
        })?;

        self.pending.clear();
        self.rx = Some(rx);
        self.stream = Some(stream);
        Ok(())
    }

    fn disable(&mut self) -> Result<(), AudioError> {
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
        self.rx = None;
        self.pending.clear();
        Ok(())
    }

    fn read(&mut self, buf: &mut [i32]) -> Result<usize, AudioError> {
        let rx = self.rx.as_ref().ok_or(AudioError::ChannelClosed)?;

        while self.pending.len() < buf.len() {
            match rx.recv_timeout(IO_TIMEOUT) {
                Ok(block) => self.pending.extend(block),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(AudioError::StreamError("Input stream timed out".to_string()));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(AudioError::ChannelClosed),
            }
        }

        let len = buf.len();
        for (slot, word) in buf.iter_mut().zip(self.pending.drain(..len)) {
            *slot = word;
        }
        Ok(buf.len())
    }
}

impl Drop for CpalCaptureChannel {
    fn drop(&mut self) {
        let _ = self.disable();
    }
}

/// Speaker channel backed by a cpal output stream
///
/// Mono blocks are duplicated to every output channel. The callback plays
/// silence when the queue runs dry.
pub struct CpalPlaybackChannel {
    device_name: Option<String>,
    stream: Option<StreamThread>,
    tx: Sender<Vec<i16>>,
    rx: Receiver<Vec<i16>>,
}

impl CpalPlaybackChannel {
    /// Play on the named output device, or the default one
    pub fn new(device_name: Option<String>) -> Result<Self, AudioError> {
        let device = get_output_device(device_name.as_deref())?;
        tracing::info!("Using output device: {}", device.name);

        let (tx, rx) = bounded(PLAYBACK_QUEUE_BLOCKS);
        Ok(Self {
            device_name,
            stream: None,
            tx,
            rx,
        })
    }
}

impl PlaybackChannel for CpalPlaybackChannel {
    fn preload(&mut self, buf: &[i16]) -> Result<usize, AudioError> {
        match self.tx.try_send(buf.to_vec()) {
            Ok(()) => Ok(buf.len()),
            Err(TrySendError::Full(_)) => Ok(0),
            Err(TrySendError::Disconnected(_)) => Err(AudioError::ChannelClosed),
        }
    }

    fn enable(&mut self) -> Result<(), AudioError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let rx = self.rx.clone();
        let device_name = self.device_name.clone();

        let stream = StreamThread::spawn("cpal-output", move || {
            let device = get_output_device(device_name.as_deref())?;
            let config = device.output_stream_config()?;
            let channels = config.channels.max(1) as usize;
            let mut pending: VecDeque<i16> = VecDeque::new();

            device
                .into_inner()
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            if pending.is_empty() {
                                if let Ok(block) = rx.try_recv() {
                                    pending.extend(block);
                                }
                            }
                            let sample = pending.pop_front().unwrap_or(0) as f32 / 32768.0;
                            frame.fill(sample);
                        }
                    },
                    move |err| {
                        tracing::error!("Output stream error: {}", err);
                    },
                    None,
                )
                .map_err(|e| AudioError::CpalError(e.to_string()))
        })?;

        self.stream = Some(stream);
        Ok(())
    }

    fn disable(&mut self) -> Result<(), AudioError> {
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
        // Discard whatever was still queued
        while self.rx.try_recv().is_ok() {}
        Ok(())
    }

    fn write(&mut self, buf: &[i16]) -> Result<(), AudioError> {
        match self.tx.send_timeout(buf.to_vec(), IO_TIMEOUT) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                Err(AudioError::StreamError("Output stream timed out".to_string()))
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(AudioError::ChannelClosed),
        }
    }
}

impl Drop for CpalPlaybackChannel {
    fn drop(&mut self) {
        let _ = self.disable();
    }
}
