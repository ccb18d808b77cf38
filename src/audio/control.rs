//! Lifecycle of a long-running hardware I/O loop
//!
//! `start` and `stop` only flip the requested state and return immediately.
//! The loop observes the change at its next blocking-call boundary and tears
//! itself down. Every start gets a new epoch, so a loop that is still winding
//! down never mistakes a later start for its own.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Loop state machine
///
/// ```text
/// Stopped → Starting → Running → Stopping → Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct ControlInner {
    state: LoopState,
    requested: bool,
    last_epoch: u64,
}

/// Start/stop control shared between a pipeline and its loop thread
pub struct LoopControl {
    name: &'static str,
    inner: Mutex<ControlInner>,
    changed: Condvar,
    /// Epoch of the run that should be running, 0 when stopped
    active: AtomicU64,
}

impl LoopControl {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(ControlInner {
                state: LoopState::Stopped,
                requested: false,
                last_epoch: 0,
            }),
            changed: Condvar::new(),
            active: AtomicU64::new(0),
        }
    }

    /// Request a new run. Returns its epoch, or `None` if already running.
    pub fn request_start(&self) -> Option<u64> {
        let mut inner = self.inner.lock();
        if inner.requested {
            tracing::warn!("Starting {} while it is still running", self.name);
            return None;
        }

        inner.requested = true;
        inner.last_epoch += 1;
        self.active.store(inner.last_epoch, Ordering::Release);
        Some(inner.last_epoch)
    }

    /// Request the current run to end. Returns `false` if not running.
    pub fn request_stop(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.requested {
            tracing::warn!("Stopping {} while it isn't running", self.name);
            return false;
        }

        inner.requested = false;
        self.active.store(0, Ordering::Release);
        if inner.state == LoopState::Running {
            inner.state = LoopState::Stopping;
        }
        self.changed.notify_all();
        true
    }

    /// Whether a run is requested (started and not yet stopped)
    pub fn is_requested(&self) -> bool {
        self.inner.lock().requested
    }

    pub fn state(&self) -> LoopState {
        self.inner.lock().state
    }

    /// Whether the run with `epoch` should keep going
    pub fn should_run(&self, epoch: u64) -> bool {
        self.active.load(Ordering::Acquire) == epoch
    }

    /// Called by a loop that ends on its own. Returns `true` if this cleared
    /// the request, i.e. nobody called `stop` for this run.
    pub fn finish(&self, epoch: u64) -> bool {
        let mut inner = self.inner.lock();
        if self.active.load(Ordering::Acquire) != epoch {
            return false;
        }

        inner.requested = false;
        self.active.store(0, Ordering::Release);
        self.changed.notify_all();
        true
    }

    /// Enter the loop for `epoch`, waiting for a previous run's teardown.
    ///
    /// Returns `None` if the run was cancelled while waiting.
    pub fn enter(self: &Arc<Self>, epoch: u64) -> Option<RunGuard> {
        let mut inner = self.inner.lock();
        while inner.state != LoopState::Stopped {
            if !self.should_run(epoch) {
                return None;
            }
            self.changed.wait(&mut inner);
        }
        if !self.should_run(epoch) {
            return None;
        }

        inner.state = LoopState::Starting;
        self.changed.notify_all();
        Some(RunGuard {
            control: self.clone(),
        })
    }

    /// Wait until no run is requested and the loop has exited
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.requested || inner.state != LoopState::Stopped {
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return !inner.requested && inner.state == LoopState::Stopped;
            }
        }
        true
    }

    fn set_state(&self, state: LoopState) {
        let mut inner = self.inner.lock();
        inner.state = state;
        self.changed.notify_all();
    }
}

/// Held by a loop thread for the duration of one run
pub struct RunGuard {
    control: Arc<LoopControl>,
}

impl RunGuard {
    /// Hardware is up and the loop is about to process blocks
    pub fn running(&self) {
        self.control.set_state(LoopState::Running);
    }

    /// The loop has left its processing loop and is tearing down
    pub fn stopping(&self) {
        self.control.set_state(LoopState::Stopping);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.control.set_state(LoopState::Stopped);
    }
}
