//! Configuration for the intercom endpoint
//!
//! [`AudioConfiguration`] is the immutable audio tuning snapshot handed to the
//! pipelines when they are created. [`AppConfig`] wraps it together with the
//! network and device settings and is persisted as TOML.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::constants::{
    DEFAULT_AUDIO_BUFFER_MS, DEFAULT_UDP_PORT, MIN_AUDIO_BUFFER_MS, RECEIVE_TIMEOUT_SECS,
};
use crate::error::{AudioError, Error, Result};

/// Audio tuning snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfiguration {
    /// Playback gain offset at volume 0.0 (dB)
    pub volume_scale_low: f32,
    /// Playback gain offset at volume 1.0 (dB)
    pub volume_scale_high: f32,
    /// Feed microphone + reference frames to the frame processor
    pub enable_audio_processing: bool,
    /// Jitter buffer length
    pub audio_buffer_ms: u32,
    /// Extra bits of microphone resolution handed to the scaler
    pub microphone_gain_bits: u8,
    pub recording_auto_volume_enabled: bool,
    pub recording_smoothing_factor: f32,
    pub playback_auto_volume_enabled: bool,
    pub playback_target_db: f32,
}

impl Default for AudioConfiguration {
    fn default() -> Self {
        Self {
            volume_scale_low: -30.0,
            volume_scale_high: 0.0,
            enable_audio_processing: true,
            audio_buffer_ms: DEFAULT_AUDIO_BUFFER_MS,
            microphone_gain_bits: 4,
            recording_auto_volume_enabled: true,
            recording_smoothing_factor: 0.0001,
            playback_auto_volume_enabled: true,
            playback_target_db: -18.0,
        }
    }
}

impl AudioConfiguration {
    pub fn validate(&self) -> Result<()> {
        self.check_buffer_len().map_err(|e| Error::Config(e.to_string()))?;
        if self.microphone_gain_bits > 16 {
            return Err(Error::Config(format!(
                "microphone_gain_bits must be at most 16, got {}",
                self.microphone_gain_bits
            )));
        }
        if !(0.0..=1.0).contains(&self.recording_smoothing_factor) {
            return Err(Error::Config(format!(
                "recording_smoothing_factor must be in [0, 1], got {}",
                self.recording_smoothing_factor
            )));
        }
        if self.volume_scale_low > self.volume_scale_high {
            return Err(Error::Config(format!(
                "volume_scale_low ({}) exceeds volume_scale_high ({})",
                self.volume_scale_low, self.volume_scale_high
            )));
        }
        Ok(())
    }

    /// The mixer ring is twice the buffer and must hold a whole playback block
    pub(crate) fn check_buffer_len(&self) -> std::result::Result<(), AudioError> {
        if self.audio_buffer_ms < MIN_AUDIO_BUFFER_MS {
            return Err(AudioError::InvalidConfig(format!(
                "audio_buffer_ms must be at least {}, got {}",
                MIN_AUDIO_BUFFER_MS, self.audio_buffer_ms
            )));
        }
        Ok(())
    }
}

/// Network settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local UDP port audio is received on
    pub udp_port: u16,
    /// Peers captured audio is sent to
    pub remote_endpoints: Vec<SocketAddr>,
    /// Receive timeout after which the socket is polled again
    pub receive_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            udp_port: DEFAULT_UDP_PORT,
            remote_endpoints: Vec::new(),
            receive_timeout_secs: RECEIVE_TIMEOUT_SECS,
        }
    }
}

/// Audio hardware selection; `None` picks the host default
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfiguration,
    pub network: NetworkConfig,
    pub devices: DeviceConfig,
}

impl AppConfig {
    const FILE_NAME: &'static str = "intercom.toml";

    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "intercom")
            .map(|dirs| dirs.config_dir().join(Self::FILE_NAME))
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.audio.validate()?;
        Ok(config)
    }

    /// Load from `path` (or the default location); a missing file yields defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            tracing::info!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        Self::load(&path)
    }

    /// Save configuration as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
