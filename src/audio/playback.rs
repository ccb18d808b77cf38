//! Speaker playback
//!
//! A dedicated thread drains the jitter mixer one block at a time, applies
//! automatic volume, hands the block to the speaker and publishes the exact
//! same samples, timestamped, to the echo reference feed.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::auto_volume::AutoVolume;
use crate::audio::control::{LoopControl, LoopState, RunGuard};
use crate::audio::events::Listeners;
use crate::audio::hal::{Clock, PlaybackChannel};
use crate::audio::mixer::{AudioMixer, MixerStats, PacketSourceKey};
use crate::audio::reference::ReferenceFeed;
use crate::config::AudioConfiguration;
use crate::constants::{AUDIO_CHUNK_MS, PLAYBACK_SETTLE_MS};
use crate::error::AudioError;
use crate::timing::{ms_to_samples, samples_to_us};

struct PlaybackShared<P: PlaybackChannel> {
    channel: Mutex<P>,
    control: Arc<LoopControl>,
    mixer: Mutex<AudioMixer>,
    auto_volume: Mutex<AutoVolume>,
    reference: Arc<ReferenceFeed>,
    clock: Arc<dyn Clock>,
    block_samples: usize,
    volume_scale_low: f32,
    volume_scale_high: f32,
    auto_volume_enabled: bool,
    volume: Mutex<f32>,
    playing_changed: Listeners<bool>,
    buffer_exhausted: Listeners<()>,
    volume_changed: Listeners<f32>,
}

/// Playback pipeline owning the speaker channel
pub struct AudioPlayback<P: PlaybackChannel> {
    shared: Arc<PlaybackShared<P>>,
}

impl<P: PlaybackChannel> AudioPlayback<P> {
    pub fn new(
        channel: P,
        config: &AudioConfiguration,
        reference: Arc<ReferenceFeed>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AudioError> {
        config.check_buffer_len()?;

        // Full volume until told otherwise
        let mut auto_volume = AutoVolume::new(config.playback_target_db);
        auto_volume.set_offset_db(config.volume_scale_high);

        Ok(Self {
            shared: Arc::new(PlaybackShared {
                channel: Mutex::new(channel),
                control: Arc::new(LoopControl::new("playback")),
                mixer: Mutex::new(AudioMixer::new(config.audio_buffer_ms)),
                auto_volume: Mutex::new(auto_volume),
                reference,
                clock,
                block_samples: ms_to_samples(AUDIO_CHUNK_MS),
                volume_scale_low: config.volume_scale_low,
                volume_scale_high: config.volume_scale_high,
                auto_volume_enabled: config.playback_auto_volume_enabled,
                volume: Mutex::new(1.0),
                playing_changed: Listeners::new(),
                buffer_exhausted: Listeners::new(),
                volume_changed: Listeners::new(),
            }),
        })
    }

    pub fn on_playing_changed<F>(&self, listener: F)
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.shared.playing_changed.add(listener);
    }

    pub fn on_buffer_exhausted<F>(&self, listener: F)
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.shared.buffer_exhausted.add(listener);
    }

    pub fn on_volume_changed<F>(&self, listener: F)
    where
        F: Fn(&f32) + Send + Sync + 'static,
    {
        self.shared.volume_changed.add(listener);
    }

    /// Start playing. Returns `false` if already playing.
    pub fn start(&self) -> bool {
        let Some(epoch) = self.shared.control.request_start() else {
            return false;
        };

        tracing::info!("Starting playback");
        self.shared.mixer.lock().reset();

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("playback".into())
            .spawn(move || shared.write_loop(epoch));

        if let Err(e) = spawned {
            tracing::error!("Failed to spawn playback thread: {}", e);
            self.shared.control.finish(epoch);
            return false;
        }

        self.shared.playing_changed.call(&true);
        true
    }

    /// Stop playing. Returns immediately; the loop tears down on its own.
    /// Returns `false` if not playing.
    pub fn stop(&self) -> bool {
        if !self.shared.control.request_stop() {
            return false;
        }

        tracing::info!("Stopping playback");
        self.shared.playing_changed.call(&false);
        true
    }

    /// Wait for the playback loop to exit
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        self.shared.control.wait_stopped(timeout)
    }

    pub fn is_playing(&self) -> bool {
        self.shared.control.is_requested()
    }

    pub fn state(&self) -> LoopState {
        self.shared.control.state()
    }

    /// Mix a network packet into the jitter buffer
    pub fn add_samples(&self, source: PacketSourceKey, packet: &[u8]) {
        self.shared.mixer.lock().append(source, packet);
    }

    /// Set the volume in [0, 1], mapped linearly onto the configured dB range
    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        let shared = &self.shared;
        let offset_db =
            shared.volume_scale_low + (shared.volume_scale_high - shared.volume_scale_low) * volume;

        shared.auto_volume.lock().set_offset_db(offset_db);
        *shared.volume.lock() = volume;

        tracing::debug!("Volume {:.2} ({:.1} dB)", volume, offset_db);
        shared.volume_changed.call(&volume);
    }

    pub fn volume(&self) -> f32 {
        *self.shared.volume.lock()
    }

    pub fn mixer_stats(&self) -> MixerStats {
        self.shared.mixer.lock().stats()
    }
}

impl<P: PlaybackChannel> Drop for AudioPlayback<P> {
    fn drop(&mut self) {
        if self.is_playing() {
            self.stop();
        }
    }
}

impl<P: PlaybackChannel> PlaybackShared<P> {
    fn write_loop(&self, epoch: u64) {
        let Some(run) = self.control.enter(epoch) else {
            return;
        };

        let mut channel = self.channel.lock();

        if let Err(e) = self.play(&mut *channel, &run, epoch) {
            tracing::error!("Playback failed: {}", e);
        }

        run.stopping();
        tracing::info!("Exiting playback loop");

        self.reference.reset();
        if let Err(e) = channel.disable() {
            tracing::error!("Failed to disable playback channel: {}", e);
        }

        drop(channel);
        drop(run);

        if self.control.finish(epoch) {
            self.playing_changed.call(&false);
        }
    }

    fn play(&self, channel: &mut P, run: &RunGuard, epoch: u64) -> Result<(), AudioError> {
        // Give the mixer some time to collect data.
        thread::sleep(Duration::from_millis(PLAYBACK_SETTLE_MS));

        let mut block = vec![0i16; self.block_samples];

        // Fill the hardware queue with silence before enabling it.
        let mut preloaded = 0;
        loop {
            let written = channel.preload(&block)?;
            preloaded += written;
            if written < block.len() {
                break;
            }
        }

        self.reference.reset();
        channel.enable()?;

        // Audio from the mixer starts sounding once the preloaded silence has played.
        let mut playback_time = self.clock.now_us() + samples_to_us(preloaded);
        run.running();

        while self.control.should_run(epoch) {
            let has_data = {
                let mut mixer = self.mixer.lock();
                let has_data = mixer.has_data();
                if has_data {
                    mixer.take(&mut block);
                }
                has_data
            };

            if !has_data {
                tracing::info!("Buffer exhausted");
                self.buffer_exhausted.call(&());
                break;
            }

            if self.auto_volume_enabled {
                self.auto_volume.lock().process_block(&mut block);
            } else {
                let offset_db = self.auto_volume.lock().offset_db();
                apply_gain(&mut block, offset_db);
            }

            self.reference.feed(playback_time, &block);
            playback_time += samples_to_us(block.len());

            channel.write(&block)?;
        }

        Ok(())
    }
}

/// Static gain used when automatic volume is disabled
fn apply_gain(block: &mut [i16], gain_db: f32) {
    if gain_db == 0.0 {
        return;
    }
    let gain = 10f32.powf(gain_db / 20.0);
    for sample in block.iter_mut() {
        *sample = (*sample as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}
