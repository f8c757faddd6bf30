//! Condvar-backed completion signals.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use conflux_core::hal::HwSignal;

struct SignalState {
    complete: bool,
    timestamp: Option<u64>,
}

/// Software completion signal.
///
/// Freshly created signals start complete (no work outstanding); the
/// runtime re-arms a signal before attaching it to a command.
pub struct HostSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
    epoch: Instant,
}

impl HostSignal {
    /// Creates a completed signal stamping times relative to `epoch`.
    #[must_use]
    pub fn new(epoch: Instant) -> Self {
        Self {
            state: Mutex::new(SignalState {
                complete: true,
                timestamp: None,
            }),
            cond: Condvar::new(),
            epoch,
        }
    }
}

impl HwSignal for HostSignal {
    fn is_complete(&self) -> bool {
        self.state.lock().complete
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock();
        match timeout {
            None => {
                while !state.complete {
                    self.cond.wait(&mut state);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !state.complete {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        return state.complete;
                    }
                }
                true
            }
        }
    }

    fn complete(&self) {
        let mut state = self.state.lock();
        if !state.complete {
            state.complete = true;
            state.timestamp = Some(self.epoch.elapsed().as_nanos() as u64);
        }
        drop(state);
        self.cond.notify_all();
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.complete = false;
        state.timestamp = None;
    }

    fn timestamp(&self) -> Option<u64> {
        self.state.lock().timestamp
    }
}
