//! Downstream audio front end
//!
//! The echo canceller consumes interleaved (microphone, reference) frames and
//! produces processed mono frames on its own schedule. It is opaque to this
//! crate; [`PassthroughProcessor`] stands in for it and forwards the
//! microphone channel unchanged.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

use crate::constants::{FEED_CHANNELS, FEED_CHUNK_SAMPLES};

/// Consumer of aligned capture frames
pub trait FrameProcessor: Send + Sync + 'static {
    /// Samples per channel in one fed frame
    fn feed_chunk_samples(&self) -> usize;

    /// Feed one interleaved (microphone, reference) frame
    fn feed(&self, frame: &[i16]);

    /// Wait up to `timeout` for the next processed frame
    fn fetch(&self, timeout: Duration) -> Option<Vec<i16>>;
}

/// Forwards the microphone channel of each frame
pub struct PassthroughProcessor {
    chunk_samples: usize,
    tx: Sender<Vec<i16>>,
    rx: Receiver<Vec<i16>>,
}

impl PassthroughProcessor {
    /// Create a processor queueing up to `queue_len` frames
    pub fn new(chunk_samples: usize, queue_len: usize) -> Self {
        let (tx, rx) = bounded(queue_len);
        Self {
            chunk_samples,
            tx,
            rx,
        }
    }
}

impl Default for PassthroughProcessor {
    fn default() -> Self {
        Self::new(FEED_CHUNK_SAMPLES, 16)
    }
}

impl FrameProcessor for PassthroughProcessor {
    fn feed_chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    fn feed(&self, frame: &[i16]) {
        let microphone: Vec<i16> = frame.iter().step_by(FEED_CHANNELS).copied().collect();

        match self.tx.try_send(microphone) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Frame processor queue full, dropping frame");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn fetch(&self, timeout: Duration) -> Option<Vec<i16>> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}
