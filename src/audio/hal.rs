//! Hardware channel abstraction
//!
//! The pipelines drive their hardware through these blocking interfaces, the
//! same way a DMA-backed I2S channel behaves: `read` returns once a block has
//! been captured, `write` returns once a block has been accepted for output.

use std::time::Instant;

use crate::error::AudioError;

/// Microphone input channel
pub trait CaptureChannel: Send + 'static {
    /// Start sampling. Samples are assumed to be taken from this moment on.
    fn enable(&mut self) -> Result<(), AudioError>;

    fn disable(&mut self) -> Result<(), AudioError>;

    /// Block until `buf` is filled with raw left-aligned 32-bit words.
    /// Returns the number of samples read.
    fn read(&mut self, buf: &mut [i32]) -> Result<usize, AudioError>;
}

/// Speaker output channel
pub trait PlaybackChannel: Send + 'static {
    /// Queue samples before the channel is enabled.
    /// Returns how many samples were accepted; fewer than offered means the queue is full.
    fn preload(&mut self, buf: &[i16]) -> Result<usize, AudioError>;

    fn enable(&mut self) -> Result<(), AudioError>;

    fn disable(&mut self) -> Result<(), AudioError>;

    /// Block until all of `buf` has been accepted.
    fn write(&mut self, buf: &[i16]) -> Result<(), AudioError>;
}

/// Monotonic microsecond clock shared by the capture and playback loops
pub trait Clock: Send + Sync + 'static {
    fn now_us(&self) -> i64;
}

/// [`Clock`] backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }
}
