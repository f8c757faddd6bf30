//! Streams: ordered asynchronous command queues bound to one device.
//!
//! A stream owns a share of a pooled hardware queue and tracks the
//! completion signal of its most recent command; within a stream,
//! submissions retire in submission order, so synchronizing on the last
//! signal drains everything before it. Capture state lives alongside the
//! queue binding; when a session is active, submissions divert into the
//! session's graph instead of the hardware queue.

pub(crate) mod capture;

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use conflux_core::error::{Result, StreamError};
use conflux_core::hal::{Command, HostCallback, Task};
use conflux_core::types::{CaptureStatus, CuMask, Priority, StreamFlags, StreamHandle};

use crate::device::Device;
use crate::graph::GraphNodeKind;
use crate::queue_pool::QueueRef;
use crate::signal::CompletionSignal;

use self::capture::CaptureState;

/// How a stream came into being; reserved kinds have restricted lifecycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamKind {
    /// Explicitly created by the caller.
    Explicit,
    /// Lazily materialized per-thread default stream.
    PerThread,
    /// The device-default (null) stream.
    Null,
}

pub(crate) struct StreamInner {
    pub queue: Option<QueueRef>,
    pub last_signal: Option<Arc<CompletionSignal>>,
    pub in_flight: Vec<Arc<CompletionSignal>>,
    pub capture: CaptureState,
}

/// An ordered asynchronous command queue.
///
/// A stream belongs to exactly one device for its lifetime; the hardware
/// queue behind it is a pooled share and may be multiplexed with other
/// streams under resource pressure.
pub struct Stream {
    handle: StreamHandle,
    device: Arc<Device>,
    priority: Priority,
    flags: StreamFlags,
    cu_mask: CuMask,
    kind: StreamKind,
    pub(crate) inner: Mutex<StreamInner>,
}

impl Stream {
    pub(crate) fn new(
        handle: StreamHandle,
        device: Arc<Device>,
        priority: Priority,
        flags: StreamFlags,
        cu_mask: CuMask,
        kind: StreamKind,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle,
            device,
            priority,
            flags,
            cu_mask,
            kind,
            inner: Mutex::new(StreamInner {
                queue: None,
                last_signal: None,
                in_flight: Vec::new(),
                capture: CaptureState::default(),
            }),
        })
    }

    /// Handle of this stream.
    #[must_use]
    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    /// Owning device.
    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Scheduling priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Creation flags.
    #[must_use]
    pub fn flags(&self) -> StreamFlags {
        self.flags
    }

    /// CU mask requested at creation (possibly unrestricted).
    #[must_use]
    pub fn cu_mask(&self) -> &CuMask {
        &self.cu_mask
    }

    pub(crate) fn is_null(&self) -> bool {
        self.kind == StreamKind::Null
    }

    pub(crate) fn is_per_thread_default(&self) -> bool {
        self.kind == StreamKind::PerThread
    }

    /// Current capture status.
    #[must_use]
    pub fn capture_status(&self) -> CaptureStatus {
        self.inner.lock().capture.status
    }

    /// Identifier of the capture session this stream participates in.
    #[must_use]
    pub fn capture_id(&self) -> Option<u64> {
        let inner = self.inner.lock();
        inner.capture.session.as_ref().map(|s| s.id)
    }

    pub(crate) fn is_origin(&self) -> bool {
        let inner = self.inner.lock();
        inner.capture.session.as_ref().map_or(false, |s| s.origin)
    }

    /// Whether `event` was recorded inside this stream's capture session.
    pub(crate) fn session_contains_event(&self, event: conflux_core::types::EventHandle) -> bool {
        let inner = self.inner.lock();
        inner
            .capture
            .session
            .as_ref()
            .map_or(false, |s| s.events.contains(&event))
    }

    pub(crate) fn parent_stream(&self) -> Option<Weak<Stream>> {
        let inner = self.inner.lock();
        inner
            .capture
            .session
            .as_ref()
            .and_then(|s| s.parent.clone())
    }

    /// Poisons an active session. Sticky until capture explicitly ends.
    pub(crate) fn invalidate_capture(&self) {
        let mut inner = self.inner.lock();
        if inner.capture.status == CaptureStatus::Active {
            inner.capture.status = CaptureStatus::Invalidated;
            tracing::warn!(stream = ?self.handle, "stream capture invalidated");
        }
    }

    fn ensure_queue(&self, inner: &mut StreamInner) -> Result<()> {
        if inner.queue.is_none() {
            let queue =
                self.device
                    .queue_pool()
                    .acquire(false, &self.cu_mask, self.priority)?;
            inner.queue = Some(queue);
        }
        Ok(())
    }

    /// Binds the pooled hardware queue now instead of at first submission.
    pub(crate) fn bind_queue(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_queue(&mut inner)
    }

    fn submit(inner: &StreamInner, command: Command) -> Result<()> {
        match inner.queue.as_ref() {
            Some(queue) => queue.queue().submit(command),
            None => Err(StreamError::Engine("stream has no bound queue".to_string())),
        }
    }

    /// Swaps in the completion signal of the newest command and retires
    /// older signals back to the device pool once they are done.
    fn replace_last_signal(&self, inner: &mut StreamInner, signal: Arc<CompletionSignal>) {
        if let Some(previous) = inner.last_signal.replace(signal) {
            inner.in_flight.push(previous);
        }
        let retired: Vec<_> = std::mem::take(&mut inner.in_flight)
            .into_iter()
            .filter_map(|s| {
                if s.is_done() {
                    self.device.signal_pool().release(s);
                    None
                } else {
                    Some(s)
                }
            })
            .collect();
        inner.in_flight = retired;
    }

    /// Appends an ordered work submission, or records it into the active
    /// capture session.
    pub(crate) fn enqueue_task(&self, task: Task) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.capture.status {
            CaptureStatus::Active => {
                let Some(session) = inner.capture.session.as_mut() else {
                    return Err(StreamError::Engine("capture session missing".to_string()));
                };
                let deps = std::mem::take(&mut session.last_nodes);
                let node = session.graph.lock().add_node(GraphNodeKind::Task(task), deps);
                session.last_nodes = vec![node];
                trace!(stream = ?self.handle, node = node.index(), "captured task node");
                Ok(())
            }
            CaptureStatus::Invalidated => Err(StreamError::CaptureInvalidated),
            CaptureStatus::None => {
                self.ensure_queue(&mut inner)?;
                let signal = self.device.signal_pool().acquire()?;
                Self::submit(
                    &inner,
                    Command::Dispatch {
                        task,
                        signal: signal.hw(),
                    },
                )?;
                self.replace_last_signal(&mut inner, signal);
                Ok(())
            }
        }
    }

    /// Enqueues a marker after everything currently submitted and returns
    /// its completion signal. Used by event recording.
    pub(crate) fn record_marker(&self) -> Result<Arc<CompletionSignal>> {
        let mut inner = self.inner.lock();
        self.ensure_queue(&mut inner)?;

        let deps = inner.last_signal.as_ref().map(|s| s.hw()).into_iter().collect();
        let signal = self.device.signal_pool().acquire()?;
        Self::submit(
            &inner,
            Command::Marker {
                deps,
                signal: signal.hw(),
                callback: None,
            },
        )?;
        self.replace_last_signal(&mut inner, Arc::clone(&signal));
        Ok(signal)
    }

    /// Installs a cross-stream wait: subsequent submissions stall until
    /// `dep` completes.
    pub(crate) fn install_wait(
        &self,
        dep: Arc<CompletionSignal>,
        force_host_wait: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_queue(&mut inner)?;

        dep.set_force_host_wait(force_host_wait);
        let signal = self.device.signal_pool().acquire()?;
        Self::submit(
            &inner,
            Command::Marker {
                deps: vec![dep.hw()],
                signal: signal.hw(),
                callback: None,
            },
        )?;
        self.replace_last_signal(&mut inner, signal);
        Ok(())
    }

    /// Inserts a completion-ordered host callback.
    ///
    /// Two markers are required: the first carries the callback and
    /// depends on the last enqueued command; the second depends on the
    /// callback having *finished on the host*, because hardware completion
    /// of the first marker is observable before the callback returns.
    pub(crate) fn add_host_callback(
        &self,
        func: Box<dyn FnOnce(Result<()>) + Send>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_queue(&mut inner)?;

        let deps: Vec<_> = inner.last_signal.as_ref().map(|s| s.hw()).into_iter().collect();
        let marker_signal = self.device.signal_pool().acquire()?;
        let callback_done = self.device.signal_pool().acquire()?;

        Self::submit(
            &inner,
            Command::Marker {
                deps,
                signal: marker_signal.hw(),
                callback: Some(HostCallback {
                    func,
                    done: callback_done.hw(),
                }),
            },
        )?;

        let block_signal = self.device.signal_pool().acquire()?;
        if let Err(e) = Self::submit(
            &inner,
            Command::Marker {
                deps: vec![callback_done.hw()],
                signal: block_signal.hw(),
                callback: None,
            },
        ) {
            // The callback marker is already queued; keep its signals
            // tracked so they can still retire.
            inner.in_flight.push(marker_signal);
            inner.in_flight.push(callback_done);
            return Err(e);
        }

        inner.in_flight.push(marker_signal);
        inner.in_flight.push(callback_done);
        self.replace_last_signal(&mut inner, block_signal);
        Ok(())
    }

    /// Waits for every previously enqueued command to complete.
    pub(crate) fn synchronize(
        &self,
        timeout: Option<Duration>,
        poll_interval: Duration,
    ) -> Result<()> {
        let last = { self.inner.lock().last_signal.clone() };
        if let Some(signal) = last {
            signal.wait(timeout, poll_interval)?;
        }
        Ok(())
    }

    /// Non-blocking completion check over everything enqueued so far.
    pub(crate) fn query(&self) -> Result<()> {
        let last = { self.inner.lock().last_signal.clone() };
        match last {
            None => Ok(()),
            Some(signal) if signal.is_done() => Ok(()),
            Some(_) => Err(StreamError::NotReady),
        }
    }

    /// Returns pooled resources. Called after the stream has left every
    /// registry and capture-tracking set.
    pub(crate) fn release_resources(&self) {
        let mut inner = self.inner.lock();
        if let Some(queue) = inner.queue.take() {
            self.device.queue_pool().release(queue);
        }
        if let Some(last) = inner.last_signal.take() {
            inner.in_flight.push(last);
        }
        for signal in inner.in_flight.drain(..) {
            self.device.signal_pool().release(signal);
        }
    }
}
