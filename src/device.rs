//! Intercom endpoint
//!
//! Wires the UDP server, the playback and capture pipelines and the sender
//! into one device. Playback starts by itself when audio arrives and stops
//! when the jitter buffer runs dry. Recording is started and stopped on
//! command.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::capture::AudioCapture;
use crate::audio::events::Listeners;
use crate::audio::hal::{CaptureChannel, Clock, PlaybackChannel};
use crate::audio::mixer::MixerStats;
use crate::audio::playback::AudioPlayback;
use crate::audio::processor::FrameProcessor;
use crate::config::AppConfig;
use crate::error::Result;
use crate::network::packet::AudioPacket;
use crate::network::sender::{AudioSender, SenderStats};
use crate::network::udp::{ReceivedPacket, UdpServer, UdpStats};

/// How long shutdown waits for each loop to exit
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Externally visible device state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub playing: bool,
    pub recording: bool,
    pub volume: f32,
}

/// Combined statistics
#[derive(Debug, Clone, Default)]
pub struct IntercomStats {
    pub mixer: MixerStats,
    pub sender: SenderStats,
    pub udp: UdpStats,
}

#[derive(Default)]
struct StateCell {
    state: Mutex<DeviceState>,
    changed: Listeners<DeviceState>,
}

impl StateCell {
    fn update(&self, f: impl FnOnce(&mut DeviceState)) {
        let state = {
            let mut state = self.state.lock();
            let before = *state;
            f(&mut state);
            if *state == before {
                return;
            }
            *state
        };
        self.changed.call(&state);
    }
}

/// One intercom endpoint
pub struct Intercom<C: CaptureChannel, P: PlaybackChannel> {
    server: UdpServer,
    playback: Arc<AudioPlayback<P>>,
    capture: AudioCapture<C>,
    sender: Arc<AudioSender>,
    state: Arc<StateCell>,
}

impl<C: CaptureChannel, P: PlaybackChannel> Intercom<C, P> {
    pub fn new(
        config: &AppConfig,
        capture_channel: C,
        playback_channel: P,
        processor: Arc<dyn FrameProcessor>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.audio.validate()?;

        let capture = AudioCapture::new(capture_channel, &config.audio, processor, clock.clone())?;
        let playback = Arc::new(AudioPlayback::new(
            playback_channel,
            &config.audio,
            capture.reference_feed(),
            clock,
        )?);

        let server = UdpServer::new(
            config.network.udp_port,
            Duration::from_secs(config.network.receive_timeout_secs),
        );
        let sender = Arc::new(AudioSender::new(
            server.sender(),
            config.network.remote_endpoints.clone(),
        ));

        let state = Arc::new(StateCell::default());
        state.state.lock().volume = playback.volume();

        {
            let playback = playback.clone();
            server.on_received(move |packet: &ReceivedPacket| {
                if AudioPacket::parse(&packet.payload).is_err() {
                    tracing::debug!("Ignoring runt packet from {}", packet.source);
                    return;
                }
                if !playback.is_playing() {
                    playback.start();
                }
                playback.add_samples(packet.source, &packet.payload);
            });
        }

        {
            let weak = Arc::downgrade(&playback);
            playback.on_buffer_exhausted(move |_| {
                if let Some(playback) = weak.upgrade() {
                    playback.stop();
                }
            });
        }

        {
            let state = state.clone();
            playback.on_playing_changed(move |playing: &bool| {
                state.update(|s| s.playing = *playing);
            });
        }

        {
            let state = state.clone();
            playback.on_volume_changed(move |volume: &f32| {
                state.update(|s| s.volume = *volume);
            });
        }

        {
            let state = state.clone();
            capture.on_recording_changed(move |recording: &bool| {
                state.update(|s| s.recording = *recording);
            });
        }

        {
            let sender = sender.clone();
            capture.on_data_available(move |frame: &[u8]| {
                // Failures are counted in the sender stats
                let _ = sender.send_frame(frame);
            });
        }

        Ok(Self {
            server,
            playback,
            capture,
            sender,
            state,
        })
    }

    /// Start listening for audio
    pub fn begin(&mut self) -> Result<()> {
        self.server.begin()?;
        Ok(())
    }

    /// Port the UDP server listens on
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    pub fn on_state_changed<F>(&self, listener: F)
    where
        F: Fn(&DeviceState) + Send + Sync + 'static,
    {
        self.state.changed.add(listener);
    }

    pub fn start_recording(&self) -> bool {
        self.capture.start()
    }

    pub fn stop_recording(&self) -> bool {
        self.capture.stop()
    }

    pub fn set_volume(&self, volume: f32) {
        self.playback.set_volume(volume);
    }

    pub fn state(&self) -> DeviceState {
        *self.state.state.lock()
    }

    pub fn stats(&self) -> IntercomStats {
        IntercomStats {
            mixer: self.playback.mixer_stats(),
            sender: self.sender.stats(),
            udp: self.server.stats(),
        }
    }

    /// Stop both pipelines and the server
    pub fn shutdown(&mut self) {
        self.server.stop();

        self.capture.shutdown();
        if self.playback.is_playing() {
            self.playback.stop();
        }

        if !self.capture.wait_stopped(SHUTDOWN_TIMEOUT) {
            tracing::warn!("Recorder did not stop in time");
        }
        if !self.playback.wait_stopped(SHUTDOWN_TIMEOUT) {
            tracing::warn!("Playback did not stop in time");
        }
    }
}

impl<C: CaptureChannel, P: PlaybackChannel> Drop for Intercom<C, P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
