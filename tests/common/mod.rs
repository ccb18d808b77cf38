#![allow(dead_code)]

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use intercom_audio::audio::hal::{CaptureChannel, Clock, PlaybackChannel};
use intercom_audio::error::AudioError;

pub const TIMEOUT: Duration = Duration::from_secs(2);

/// Clock that only moves when told to
#[derive(Default)]
pub struct ManualClock {
    now_us: AtomicI64,
}

impl ManualClock {
    pub fn new(now_us: i64) -> Arc<Self> {
        Arc::new(Self {
            now_us: AtomicI64::new(now_us),
        })
    }

    pub fn set(&self, now_us: i64) {
        self.now_us.store(now_us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> i64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

/// Microphone fed block by block from the test
pub struct FakeCapture {
    blocks: Receiver<Vec<i32>>,
    pending: Vec<i32>,
    pub enabled: Arc<AtomicUsize>,
    pub disabled: Arc<AtomicUsize>,
}

impl FakeCapture {
    pub fn new() -> (Self, Sender<Vec<i32>>) {
        let (tx, rx) = unbounded();
        (
            Self {
                blocks: rx,
                pending: Vec::new(),
                enabled: Arc::new(AtomicUsize::new(0)),
                disabled: Arc::new(AtomicUsize::new(0)),
            },
            tx,
        )
    }
}

impl CaptureChannel for FakeCapture {
    fn enable(&mut self) -> Result<(), AudioError> {
        self.enabled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disable(&mut self) -> Result<(), AudioError> {
        self.disabled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, buf: &mut [i32]) -> Result<usize, AudioError> {
        while self.pending.len() < buf.len() {
            match self.blocks.recv_timeout(TIMEOUT) {
                Ok(block) => self.pending.extend(block),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return Err(AudioError::ChannelClosed)
                }
            }
        }
        let rest = self.pending.split_off(buf.len());
        buf.copy_from_slice(&self.pending);
        self.pending = rest;
        Ok(buf.len())
    }
}

/// Speaker that records every written block
pub struct FakePlayback {
    queue_capacity: usize,
    preloaded: usize,
    gate: Option<Receiver<()>>,
    pace: Option<Receiver<()>>,
    written: Sender<Vec<i16>>,
    pub preloaded_total: Arc<AtomicUsize>,
    pub disabled: Arc<AtomicUsize>,
}

impl FakePlayback {
    /// Returns the channel and the receiving end of the written blocks
    pub fn new(queue_capacity: usize) -> (Self, Receiver<Vec<i16>>) {
        let (tx, rx) = unbounded();
        (
            Self {
                queue_capacity,
                preloaded: 0,
                gate: None,
                pace: None,
                written: tx,
                preloaded_total: Arc::new(AtomicUsize::new(0)),
                disabled: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        )
    }

    /// Make `enable` wait until the returned sender fires
    pub fn gated(mut self) -> (Self, Sender<()>) {
        let (tx, rx) = unbounded();
        self.gate = Some(rx);
        (self, tx)
    }

    /// Make every `write` wait for one message on the returned sender
    pub fn paced(mut self) -> (Self, Sender<()>) {
        let (tx, rx) = unbounded();
        self.pace = Some(rx);
        (self, tx)
    }
}

impl PlaybackChannel for FakePlayback {
    fn preload(&mut self, buf: &[i16]) -> Result<usize, AudioError> {
        let accepted = buf.len().min(self.queue_capacity - self.preloaded);
        self.preloaded += accepted;
        self.preloaded_total.fetch_add(accepted, Ordering::SeqCst);
        Ok(accepted)
    }

    fn enable(&mut self) -> Result<(), AudioError> {
        if let Some(gate) = &self.gate {
            gate.recv_timeout(TIMEOUT)
                .map_err(|_| AudioError::StreamError("gate never opened".into()))?;
        }
        Ok(())
    }

    fn disable(&mut self) -> Result<(), AudioError> {
        self.preloaded = 0;
        self.disabled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, buf: &[i16]) -> Result<(), AudioError> {
        if let Some(pace) = &self.pace {
            pace.recv_timeout(TIMEOUT)
                .map_err(|_| AudioError::StreamError("write never released".into()))?;
        }
        self.written
            .send(buf.to_vec())
            .map_err(|_| AudioError::ChannelClosed)
    }
}

/// Collects event payloads
pub fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static)
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |value: &T| sink.lock().push(value.clone()))
}

/// Poll `condition` until it holds or the timeout expires
pub fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Packet with `count` samples of `value`
pub fn packet(sequence: i32, count: usize, value: i16) -> Vec<u8> {
    let mut data = sequence.to_be_bytes().to_vec();
    for _ in 0..count {
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}

/// Raw microphone word that converts to `sample` with `gain_bits` of gain
pub fn mic_word(sample: i16, gain_bits: u8) -> i32 {
    (sample as i32) << (15 - gain_bits as u32)
}
