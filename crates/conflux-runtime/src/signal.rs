//! Completion tracking over hardware signals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use conflux_core::error::{Result, StreamError};
use conflux_core::hal::{HwSignal, QueueEngine};
use conflux_core::types::EngineKind;

struct SignalFlags {
    done: bool,
    force_host_wait: bool,
    timestamp: Option<u64>,
}

/// A hardware completion signal together with host-side tracking state.
///
/// The wrapper caches completion so the hardware primitive is consulted at
/// most once after it retires, and records whether a dependency on this
/// signal must block on the host or may be polled. Multiple streams can
/// race to observe one signal; the flags carry their own lock.
pub struct CompletionSignal {
    hw: Arc<dyn HwSignal>,
    engine: EngineKind,
    flags: Mutex<SignalFlags>,
}

impl CompletionSignal {
    /// Wraps a hardware signal. Fresh trackers report done: nothing has
    /// been attached to them yet.
    #[must_use]
    pub fn new(hw: Arc<dyn HwSignal>, engine: EngineKind) -> Self {
        Self {
            hw,
            engine,
            flags: Mutex::new(SignalFlags {
                done: true,
                force_host_wait: true,
                timestamp: None,
            }),
        }
    }

    /// Re-arms the tracker before attaching it to a new command.
    pub(crate) fn arm(&self) {
        let mut flags = self.flags.lock();
        self.hw.reset();
        flags.done = false;
        flags.timestamp = None;
    }

    /// Clone of the underlying hardware signal, for command submission.
    pub(crate) fn hw(&self) -> Arc<dyn HwSignal> {
        Arc::clone(&self.hw)
    }

    /// Engine the tracked command was dispatched to.
    #[must_use]
    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    /// Non-blocking completion check, caching a positive result.
    pub fn is_done(&self) -> bool {
        let mut flags = self.flags.lock();
        if flags.done {
            return true;
        }
        if self.hw.is_complete() {
            flags.done = true;
            flags.timestamp = self.hw.timestamp();
            return true;
        }
        false
    }

    /// Blocks until the signal completes.
    ///
    /// Host-wait dependencies block on the hardware primitive; others use
    /// the active-poll fallback at `poll_interval`. Fails with `NotReady`
    /// when `timeout` elapses first.
    pub fn wait(&self, timeout: Option<Duration>, poll_interval: Duration) -> Result<()> {
        if self.is_done() {
            return Ok(());
        }
        let force_host = self.flags.lock().force_host_wait;
        if force_host {
            if self.hw.wait(timeout) {
                self.mark_done();
                return Ok(());
            }
            return Err(StreamError::NotReady);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.hw.is_complete() {
                self.mark_done();
                return Ok(());
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(StreamError::NotReady);
                }
            }
            std::thread::sleep(poll_interval);
        }
    }

    /// Whether dependencies on this signal must block on the host.
    #[must_use]
    pub fn force_host_wait(&self) -> bool {
        self.flags.lock().force_host_wait
    }

    /// Marks whether dependencies on this signal must block on the host.
    pub fn set_force_host_wait(&self, force: bool) {
        self.flags.lock().force_host_wait = force;
    }

    /// Completion timestamp in nanoseconds, if the signal has retired.
    #[must_use]
    pub fn timestamp(&self) -> Option<u64> {
        let flags = self.flags.lock();
        flags.timestamp.or_else(|| self.hw.timestamp())
    }

    fn mark_done(&self) {
        let mut flags = self.flags.lock();
        flags.done = true;
        flags.timestamp = self.hw.timestamp();
    }
}

/// Statistics for a signal pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalPoolStats {
    /// Signals created over the pool lifetime.
    pub created: usize,
    /// Signals currently available for reuse.
    pub available: usize,
}

/// Per-device pool recycling completion signals.
///
/// Signals are expensive enough that one is not destroyed per retired
/// command; release returns them for reuse and they are dropped only at
/// device teardown.
pub struct SignalPool {
    engine: Arc<dyn QueueEngine>,
    free: Mutex<Vec<Arc<CompletionSignal>>>,
    created: AtomicUsize,
}

impl SignalPool {
    /// Creates a pool pre-populated with `seed` signals.
    pub fn new(engine: Arc<dyn QueueEngine>, seed: usize) -> Result<Self> {
        let mut free = Vec::with_capacity(seed);
        for _ in 0..seed {
            let hw = engine.create_signal()?;
            free.push(Arc::new(CompletionSignal::new(hw, EngineKind::Compute)));
        }
        Ok(Self {
            engine,
            free: Mutex::new(free),
            created: AtomicUsize::new(seed),
        })
    }

    /// Acquires an armed signal, creating one if the free list is empty.
    pub fn acquire(&self) -> Result<Arc<CompletionSignal>> {
        if let Some(signal) = self.free.lock().pop() {
            signal.arm();
            return Ok(signal);
        }
        let hw = self
            .engine
            .create_signal()
            .map_err(|_| StreamError::OutOfMemory("completion signal"))?;
        self.created.fetch_add(1, Ordering::Relaxed);
        let signal = Arc::new(CompletionSignal::new(hw, EngineKind::Compute));
        signal.arm();
        Ok(signal)
    }

    /// Returns a signal for reuse.
    ///
    /// Only retired signals nobody else still observes are recycled;
    /// anything else is simply dropped.
    pub fn release(&self, signal: Arc<CompletionSignal>) {
        if signal.is_done() && Arc::strong_count(&signal) == 1 {
            self.free.lock().push(signal);
        }
    }

    /// Pool statistics.
    #[must_use]
    pub fn stats(&self) -> SignalPoolStats {
        SignalPoolStats {
            created: self.created.load(Ordering::Relaxed),
            available: self.free.lock().len(),
        }
    }
}
