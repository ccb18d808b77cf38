//! Audio subsystem module

pub mod auto_volume;
pub mod buffer;
pub mod capture;
pub mod control;
pub mod device;
pub mod events;
pub mod hal;
pub mod mixer;
pub mod playback;
pub mod processor;
pub mod reference;
pub mod scaling;

pub use auto_volume::AutoVolume;
pub use buffer::RingBuffer;
pub use capture::AudioCapture;
pub use control::LoopState;
pub use device::{list_devices, CpalCaptureChannel, CpalPlaybackChannel};
pub use hal::{CaptureChannel, Clock, MonotonicClock, PlaybackChannel};
pub use mixer::{AudioMixer, MixerStats, PacketSourceKey};
pub use playback::AudioPlayback;
pub use processor::{FrameProcessor, PassthroughProcessor};
pub use reference::{ReferenceAligner, ReferenceFeed};
pub use scaling::AdaptiveScaler;
