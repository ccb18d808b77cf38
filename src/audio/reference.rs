//! Echo reference feed
//!
//! The playback loop pushes every block it sends to the speaker into the
//! feed, stamped with the time it starts sounding. The capture loop uses those
//! timestamps to line up the reference with its own recording time, so the
//! echo canceller sees microphone and speaker audio of the same instant.

use parking_lot::Mutex;

use crate::audio::buffer::RingBuffer;
use crate::timing::{samples_to_us, us_to_samples};

const SAMPLE_BYTES: usize = std::mem::size_of::<i16>();

struct FeedState {
    buffer: RingBuffer,
    /// Time at which the last buffered sample finishes playing
    end_time_us: i64,
    /// Encoding space reused by every fed block
    scratch: Vec<u8>,
}

/// Timestamped copy of recently played audio, shared by both loops
pub struct ReferenceFeed {
    state: Mutex<FeedState>,
}

impl ReferenceFeed {
    /// Create a feed holding up to `capacity_samples` samples
    pub fn new(capacity_samples: usize) -> Self {
        Self {
            state: Mutex::new(FeedState {
                buffer: RingBuffer::new(capacity_samples * SAMPLE_BYTES),
                end_time_us: 0,
                scratch: Vec::new(),
            }),
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.end_time_us = 0;
        state.buffer.reset();
    }

    /// Append a block that starts playing at `time_us`
    pub fn feed(&self, time_us: i64, samples: &[i16]) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        state.scratch.clear();
        for sample in samples {
            state.scratch.extend_from_slice(&sample.to_le_bytes());
        }

        state.buffer.write(&state.scratch);
        state.end_time_us = time_us + samples_to_us(samples.len());
    }

    /// Buffered samples
    pub fn available_samples(&self) -> usize {
        self.state.lock().buffer.available() / SAMPLE_BYTES
    }

    pub fn end_time_us(&self) -> i64 {
        self.state.lock().end_time_us
    }
}

/// Capture-side alignment state
#[derive(Debug, Default)]
pub struct ReferenceAligner {
    synced: bool,
    bytes: Vec<u8>,
}

impl ReferenceAligner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn reset(&mut self) {
        self.synced = false;
    }

    /// Fill `out` with the reference samples for a capture block starting
    /// at `recording_time_us`. Returns the number of samples filled; the rest
    /// of `out` is zeroed.
    ///
    /// While unsynced, the head of the feed is aligned with the recording
    /// time if that time lies within the buffered span. Once synced, blocks
    /// are consumed contiguously until the feed runs short, after which the
    /// next block attempts alignment again.
    pub fn pull(&mut self, feed: &ReferenceFeed, recording_time_us: i64, out: &mut [i16]) -> usize {
        self.bytes.resize(out.len() * SAMPLE_BYTES, 0);
        let mut read = 0;

        {
            let mut state = feed.state.lock();

            if !self.synced {
                let start_time_us =
                    state.end_time_us - samples_to_us(state.buffer.available() / SAMPLE_BYTES);

                if recording_time_us >= start_time_us && recording_time_us <= state.end_time_us {
                    let skip = us_to_samples(recording_time_us - start_time_us) * SAMPLE_BYTES;
                    state.buffer.skip(skip);
                    self.synced = true;

                    tracing::debug!(
                        "Reference feed synced; skipped {} samples",
                        skip / SAMPLE_BYTES
                    );
                }
            }

            if self.synced {
                read = state.buffer.read(&mut self.bytes);
                if read < self.bytes.len() {
                    self.synced = false;
                }
            }
        }

        let samples = read / SAMPLE_BYTES;
        for (sample, bytes) in out.iter_mut().zip(self.bytes[..samples * SAMPLE_BYTES].chunks_exact(2)) {
            *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
        out[samples..].fill(0);
        samples
    }
}
