//! # Intercom Audio
//!
//! Audio engine of an intercom endpoint: network audio from peers is mixed and
//! played, microphone audio is captured, aligned with what was just played and
//! handed to an echo-cancelling front end before it goes back out.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              RECEIVE PATH                                 │
//! │  ┌────────────────────────┐                                               │
//! │  │ UDP Server             │  [Seq (BE i32) | PCM16 LE mono]               │
//! │  │ (network::udp)         │  grouped by (source ip, source port)          │
//! │  └───────────┬────────────┘                                               │
//! │              ▼                                                            │
//! │  ┌────────────────────────┐   per source: lead time, monotonic seq        │
//! │  │ Audio Mixer            │   additive, saturating int16 mix              │
//! │  │ (audio::mixer)         │                                               │
//! │  └───────────┬────────────┘                                               │
//! │              ▼                                                            │
//! │  ┌────────────────────────┐   ┌────────────┐                              │
//! │  │ Playback loop          │──▶│ AutoVolume │──▶ speaker                   │
//! │  │ (audio::playback)      │   └─────┬──────┘                              │
//! │  └────────────────────────┘         │ timestamped copy                    │
//! │                                     ▼                                     │
//! │                          ┌─────────────────────┐                          │
//! │                          │ Reference feed      │                          │
//! │                          │ (audio::reference)  │                          │
//! │                          └──────────┬──────────┘                          │
//! └─────────────────────────────────────┼────────────────────────────────────┘
//!                                       │ aligned by wall-clock time
//! ┌─────────────────────────────────────┼────────────────────────────────────┐
//! │                              CAPTURE PATH                                 │
//! │  microphone ──▶ ┌────────────────────┐   ┌──────────────────────┐         │
//! │                 │ Capture loop       │──▶│ Frame processor      │         │
//! │                 │ adaptive scaling   │   │ (echo canceller)     │         │
//! │                 │ + reference channel│   └──────────┬───────────┘         │
//! │                 └────────────────────┘              ▼                     │
//! │                                          ┌──────────────────────┐         │
//! │                                          │ Audio Sender         │──▶ UDP  │
//! │                                          │ (network::sender)    │         │
//! │                                          └──────────────────────┘         │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod network;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate of every audio stream handled by the endpoint
    pub const SAMPLE_RATE: u32 = 16000;

    /// Playback block length in milliseconds
    pub const AUDIO_CHUNK_MS: u32 = 20;

    /// Capture block length in samples (per channel)
    pub const FEED_CHUNK_SAMPLES: usize = 512;

    /// Channels in a capture frame: microphone + playback reference
    pub const FEED_CHANNELS: usize = 2;

    /// Default UDP port for audio streaming
    pub const DEFAULT_UDP_PORT: u16 = 11106;

    /// Maximum packet size for UDP
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers

    /// Size of the sequence number header of an audio packet
    pub const PACKET_HEADER_LEN: usize = 4;

    /// Default jitter buffer length in milliseconds
    pub const DEFAULT_AUDIO_BUFFER_MS: u32 = 200;

    /// Shortest jitter buffer whose ring (twice the buffer) still holds one playback block
    pub const MIN_AUDIO_BUFFER_MS: u32 = AUDIO_CHUNK_MS.div_ceil(2);

    /// Time given to the mixer to collect data before playback starts
    pub const PLAYBACK_SETTLE_MS: u64 = 10;

    /// Socket receive timeout
    pub const RECEIVE_TIMEOUT_SECS: u64 = 10;

    /// Back-off before the UDP server rebinds after a failure
    pub const RESTART_DELAY_MS: u64 = 1000;
}

/// Conversions between sample counts, byte lengths and microseconds.
///
/// All audio is mono PCM16 at [`constants::SAMPLE_RATE`].
pub mod timing {
    use crate::constants::SAMPLE_RATE;

    /// Duration of `samples` in microseconds
    pub fn samples_to_us(samples: usize) -> i64 {
        (samples as i64 * 1_000_000) / SAMPLE_RATE as i64
    }

    /// Number of whole samples that fit in `us` microseconds
    pub fn us_to_samples(us: i64) -> usize {
        if us <= 0 {
            return 0;
        }
        ((us * SAMPLE_RATE as i64) / 1_000_000) as usize
    }

    /// Number of samples in `ms` milliseconds
    pub fn ms_to_samples(ms: u32) -> usize {
        (ms as usize * SAMPLE_RATE as usize) / 1000
    }

}
