//! The runtime façade: handle-based stream, capture, event and graph
//! operations.
//!
//! Argument checks come first, then handle resolution against the device
//! registries, then capture-safety checks, then the work itself; every
//! API-boundary function follows that layering. All failures surface as
//! [`StreamError`] codes; no partial state is left registered on a failure
//! path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use conflux_core::config::RuntimeConfig;
use conflux_core::error::{Result, StreamError};
use conflux_core::hal::{ProgramLookup, QueueEngine, Task};
use conflux_core::types::{
    CaptureMode, CaptureStatus, CuMask, EventHandle, Priority, StreamFlags, StreamHandle,
};

use conflux_host::HostEngine;

use crate::device::Device;
use crate::event::Event;
use crate::graph::{CaptureGraph, GraphExec, GraphNodeKind};
use crate::stream::capture::{self, CaptureCoordinator};
use crate::stream::{Stream, StreamKind};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct RuntimeInner {
    id: u64,
    config: RuntimeConfig,
    devices: Vec<Arc<Device>>,
    null_streams: Vec<Arc<Stream>>,
    coordinator: CaptureCoordinator,
    events: RwLock<HashMap<EventHandle, Arc<Event>>>,
    programs: RwLock<Option<Arc<dyn ProgramLookup>>>,
    next_handle: AtomicU64,
}

impl RuntimeInner {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn device(&self, ordinal: usize) -> Result<&Arc<Device>> {
        self.devices
            .get(ordinal)
            .ok_or(StreamError::InvalidValue("device ordinal out of range"))
    }

    fn current_device_ordinal(&self) -> usize {
        let ordinal = capture::thread_current_device(self.id);
        ordinal.min(self.devices.len().saturating_sub(1))
    }

    fn current_null_stream(&self) -> &Arc<Stream> {
        &self.null_streams[self.current_device_ordinal()]
    }

    fn find_stream(&self, handle: StreamHandle) -> Option<Arc<Stream>> {
        self.devices.iter().find_map(|d| d.get_stream(handle))
    }

    fn resolve(self: &Arc<Self>, handle: StreamHandle) -> Result<Arc<Stream>> {
        let handle = if handle.is_per_thread() {
            self.per_thread_handle()?
        } else {
            handle
        };
        self.find_stream(handle)
            .ok_or(StreamError::ContextIsDestroyed(handle.raw()))
    }

    fn resolve_or_null(self: &Arc<Self>, stream: Option<StreamHandle>) -> Result<Arc<Stream>> {
        match stream {
            Some(handle) => self.resolve(handle),
            None => Ok(Arc::clone(self.current_null_stream())),
        }
    }

    fn per_thread_handle(self: &Arc<Self>) -> Result<StreamHandle> {
        let ordinal = self.current_device_ordinal();
        if let Some(handle) = capture::thread_per_thread_stream(self.id, ordinal) {
            // The handle may be stale after an explicit destroy; only a
            // live registry entry counts.
            if self.device(ordinal)?.stream_exists(handle) {
                return Ok(handle);
            }
        }
        let handle = self.create_stream_on(
            ordinal,
            StreamFlags::Default,
            Priority::Normal,
            CuMask::unrestricted(),
            StreamKind::PerThread,
        )?;
        capture::set_thread_per_thread_stream(self, ordinal, handle);
        Ok(handle)
    }

    fn create_stream_on(
        &self,
        ordinal: usize,
        flags: StreamFlags,
        priority: Priority,
        cu_mask: CuMask,
        kind: StreamKind,
    ) -> Result<StreamHandle> {
        let device = Arc::clone(self.device(ordinal)?);
        let handle = StreamHandle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let stream = Stream::new(handle, Arc::clone(&device), priority, flags, cu_mask, kind);

        device.add_stream(Arc::clone(&stream));
        if let Err(e) = stream.bind_queue() {
            // Roll back the registration: no partial state on failure.
            device.remove_stream(handle);
            return Err(e);
        }

        debug!(stream = ?handle, device = ordinal, priority = priority.raw(), "stream created");
        Ok(handle)
    }

    fn detach_event(&self, handle: EventHandle) {
        if let Some(event) = self.events.read().get(&handle) {
            event.detach_capture();
        }
    }

    fn destroy_stream_impl(&self, handle: StreamHandle, clean_thread_ctx: bool) -> Result<()> {
        if handle.is_per_thread() {
            return Err(StreamError::InvalidResourceHandle(
                "the per-thread default stream cannot be destroyed",
            ));
        }
        let Some(stream) = self.find_stream(handle) else {
            return Err(StreamError::InvalidHandle(
                "stream is not registered with any device",
            ));
        };

        if stream.capture_status() != CaptureStatus::None {
            // Unlink from the parent's parallel-child set before ending,
            // so the recursive end sees no dangling reference.
            if let Some(parent) = stream.parent_stream().and_then(|w| w.upgrade()) {
                capture::erase_parallel_child(&parent, handle);
            }
            let detach = |h: EventHandle| self.detach_event(h);
            capture::end_capture_tree(&stream, &detach);
        }

        self.coordinator.unregister(handle);
        if clean_thread_ctx {
            capture::remove_thread_capture(handle);
        }
        stream.device().remove_stream(handle);
        stream.release_resources();

        debug!(stream = ?handle, "stream destroyed");
        Ok(())
    }

    /// Thread-exit cleanup of a per-thread default stream. Must not touch
    /// the thread-local context, which is already being torn down.
    pub(crate) fn destroy_stream_at_thread_exit(&self, handle: StreamHandle) {
        let _ = self.destroy_stream_impl(handle, false);
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        for device in &self.devices {
            for stream in device.streams_snapshot() {
                if stream.capture_status() != CaptureStatus::None {
                    let detach = |h: EventHandle| {
                        if let Some(event) = self.events.read().get(&h) {
                            event.detach_capture();
                        }
                    };
                    capture::end_capture_tree(&stream, &detach);
                }
                self.coordinator.unregister(stream.handle());
                device.remove_stream(stream.handle());
                stream.release_resources();
            }
        }
        for null_stream in &self.null_streams {
            null_stream.release_resources();
        }
        info!("conflux runtime torn down");
    }
}

/// The Conflux runtime: devices, streams, capture sessions and events
/// behind a handle-based API.
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Brings up `config.device_count` software devices.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let engines = (0..config.device_count.max(1))
            .map(|_| Arc::new(HostEngine::new()) as Arc<dyn QueueEngine>)
            .collect();
        Self::with_engines(config, engines)
    }

    /// Brings up one device per supplied engine.
    pub fn with_engines(
        config: RuntimeConfig,
        engines: Vec<Arc<dyn QueueEngine>>,
    ) -> Result<Self> {
        if engines.is_empty() {
            return Err(StreamError::InvalidValue(
                "at least one queue engine is required",
            ));
        }

        let id = NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed);
        let mut devices = Vec::with_capacity(engines.len());
        for (ordinal, engine) in engines.into_iter().enumerate() {
            devices.push(Device::new(ordinal, engine, &config)?);
        }

        let mut next_handle = 1u64;
        let mut null_streams = Vec::with_capacity(devices.len());
        for device in &devices {
            let handle = StreamHandle::from_raw(next_handle);
            next_handle += 1;
            null_streams.push(Stream::new(
                handle,
                Arc::clone(device),
                Priority::Normal,
                StreamFlags::Default,
                CuMask::unrestricted(),
                StreamKind::Null,
            ));
        }

        info!(devices = devices.len(), "conflux runtime initialized");
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                id,
                config,
                devices,
                null_streams,
                coordinator: CaptureCoordinator::new(),
                events: RwLock::new(HashMap::new()),
                programs: RwLock::new(None),
                next_handle: AtomicU64::new(next_handle),
            }),
        })
    }

    /// Runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Number of devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.inner.devices.len()
    }

    /// Device accessor, for pool statistics and engine queries.
    pub fn device(&self, ordinal: usize) -> Result<Arc<Device>> {
        self.inner.device(ordinal).map(Arc::clone)
    }

    /// Selects the calling thread's current device.
    pub fn set_device(&self, ordinal: usize) -> Result<()> {
        if ordinal >= self.inner.devices.len() {
            return Err(StreamError::InvalidValue("device ordinal out of range"));
        }
        capture::set_thread_current_device(self.inner.id, ordinal);
        Ok(())
    }

    /// The calling thread's current device.
    #[must_use]
    pub fn current_device(&self) -> usize {
        self.inner.current_device_ordinal()
    }

    /// `(least, greatest)` raw stream priority bounds.
    #[must_use]
    pub fn priority_range(&self) -> (i32, i32) {
        Priority::range()
    }

    // ---------------------------------------------------------------
    // Stream lifecycle
    // ---------------------------------------------------------------

    /// Creates a stream with normal priority on the current device.
    pub fn stream_create(&self, flags: StreamFlags) -> Result<StreamHandle> {
        self.inner.create_stream_on(
            self.inner.current_device_ordinal(),
            flags,
            Priority::Normal,
            CuMask::unrestricted(),
            StreamKind::Explicit,
        )
    }

    /// Creates a stream from raw flag bits, rejecting unknown bits.
    pub fn stream_create_with_flags(&self, flag_bits: u32) -> Result<StreamHandle> {
        let flags = StreamFlags::from_bits(flag_bits)
            .ok_or(StreamError::InvalidValue("unknown stream flags"))?;
        self.stream_create(flags)
    }

    /// Creates a stream with the given raw priority, clamped to the
    /// supported range.
    pub fn stream_create_with_priority(
        &self,
        flags: StreamFlags,
        priority: i32,
    ) -> Result<StreamHandle> {
        self.inner.create_stream_on(
            self.inner.current_device_ordinal(),
            flags,
            Priority::from_raw(priority),
            CuMask::unrestricted(),
            StreamKind::Explicit,
        )
    }

    /// Creates a stream restricted to the compute units in `cu_mask`.
    pub fn stream_create_with_cu_mask(&self, cu_mask: &[u32]) -> Result<StreamHandle> {
        if cu_mask.is_empty() {
            return Err(StreamError::InvalidValue("CU mask must not be empty"));
        }
        self.inner.create_stream_on(
            self.inner.current_device_ordinal(),
            StreamFlags::Default,
            Priority::Normal,
            CuMask::from_words(cu_mask),
            StreamKind::Explicit,
        )
    }

    /// Destroys a stream, force-ending any active capture first.
    pub fn stream_destroy(&self, stream: StreamHandle) -> Result<()> {
        self.inner.destroy_stream_impl(stream, true)
    }

    /// Resolves the calling thread's default stream on the current device,
    /// creating it on first use.
    pub fn per_thread_stream(&self) -> Result<StreamHandle> {
        self.inner.per_thread_handle()
    }

    // ---------------------------------------------------------------
    // Ordering and completion
    // ---------------------------------------------------------------

    /// Waits for every previously enqueued command to complete. A `None`
    /// stream synchronizes all outstanding work on the current device.
    pub fn stream_synchronize(&self, stream: Option<StreamHandle>) -> Result<()> {
        let timeout = self.inner.config.sync_timeout();
        let poll = self.inner.config.poll_interval();
        match stream {
            None => {
                let ordinal = self.inner.current_device_ordinal();
                let device = self.inner.device(ordinal)?;
                self.inner.null_streams[ordinal].synchronize(timeout, poll)?;
                for s in device.streams_snapshot() {
                    s.synchronize(timeout, poll)?;
                }
                Ok(())
            }
            Some(handle) => {
                let s = self.inner.resolve(handle)?;
                if self.inner.coordinator.capture_ongoing(Some(&s)) {
                    return Err(StreamError::CaptureUnsupported);
                }
                s.synchronize(timeout, poll)
            }
        }
    }

    /// Non-blocking completion check; `NotReady` while work is in flight.
    pub fn stream_query(&self, stream: Option<StreamHandle>) -> Result<()> {
        match stream {
            None => {
                let ordinal = self.inner.current_device_ordinal();
                let device = self.inner.device(ordinal)?;
                self.inner.null_streams[ordinal].query()?;
                for s in device.streams_snapshot() {
                    s.query()?;
                }
                Ok(())
            }
            Some(handle) => {
                let s = self.inner.resolve(handle)?;
                if self.inner.coordinator.capture_ongoing(Some(&s)) {
                    return Err(StreamError::CaptureUnsupported);
                }
                s.query()
            }
        }
    }

    /// Makes future submissions on `stream` wait for `event`.
    ///
    /// When the event was recorded inside an active capture, the waiting
    /// stream joins that capture session instead (fork/join); otherwise a
    /// hardware-level wait is installed, with a same-device fast path that
    /// skips the host-side block.
    pub fn stream_wait_event(
        &self,
        stream: Option<StreamHandle>,
        event: EventHandle,
        flags: u32,
    ) -> Result<()> {
        let event = self
            .inner
            .events
            .read()
            .get(&event)
            .cloned()
            .ok_or(StreamError::InvalidHandle("event"))?;

        let wait_stream = match stream {
            Some(handle) => Some(self.inner.resolve(handle)?),
            None => None,
        };

        // The stream the event was recorded on may be gone; the event is
        // then complete and the wait is a no-op.
        let event_stream = match event.recorded_stream() {
            Some(weak) => match weak.upgrade() {
                Some(s) if s.is_null() || s.device().stream_exists(s.handle()) => Some(s),
                _ => return Ok(()),
            },
            None => None,
        };

        let Some(event_stream) = event_stream else {
            if flags != 0 {
                return Err(StreamError::InvalidValue("wait flags must be zero"));
            }
            return Ok(());
        };

        if let Some(wait_stream) = wait_stream.as_ref() {
            if capture::join_capture(&event_stream, wait_stream, &event)? {
                return Ok(());
            }
        } else if event_stream.session_contains_event(event.handle()) {
            return Err(StreamError::InvalidHandle(
                "the null stream cannot join a capture",
            ));
        }

        if flags != 0 {
            return Err(StreamError::InvalidValue("wait flags must be zero"));
        }
        if event_stream.capture_status() == CaptureStatus::Active {
            // The event's stream is capturing but the event is not part of
            // its session.
            return Err(StreamError::CaptureIsolation);
        }

        let wait_stream = match wait_stream {
            Some(s) => s,
            None => Arc::clone(self.inner.current_null_stream()),
        };
        let same_device = event_stream.device().ordinal() == wait_stream.device().ordinal();
        if same_device {
            wait_stream
                .device()
                .add_safe_stream(event_stream.handle(), wait_stream.handle());
        }
        // Registered same-device pairs skip the host-side block; cross-device
        // dependencies always wait on the host.
        let force_host = !wait_stream
            .device()
            .is_safe_stream(event_stream.handle(), wait_stream.handle());
        if let Some(dep) = event.signal() {
            wait_stream.install_wait(dep, force_host)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Callbacks and host functions
    // ---------------------------------------------------------------

    /// Inserts a completion-ordered host callback. `flags` is reserved and
    /// must be zero.
    pub fn stream_add_callback<F>(
        &self,
        stream: Option<StreamHandle>,
        callback: F,
        flags: u32,
    ) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        if flags != 0 {
            return Err(StreamError::InvalidValue(
                "callback flags are reserved and must be zero",
            ));
        }
        let s = self.inner.resolve_or_null(stream)?;
        if self.inner.coordinator.capture_ongoing(Some(&s)) {
            return Err(StreamError::CaptureUnsupported);
        }
        s.add_host_callback(Box::new(callback))
    }

    /// Runs `func` on the host after all prior work on the stream, with
    /// subsequent work stalled until it returns.
    pub fn launch_host_func<F>(&self, stream: Option<StreamHandle>, func: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if stream.is_none() && self.inner.coordinator.capture_ongoing(None) {
            return Err(StreamError::CaptureImplicit);
        }
        let s = self.inner.resolve_or_null(stream)?;
        if self.inner.coordinator.capture_ongoing(Some(&s)) {
            return Err(StreamError::CaptureUnsupported);
        }
        s.add_host_callback(Box::new(move |_status| func()))
    }

    // ---------------------------------------------------------------
    // Stream attribute queries
    // ---------------------------------------------------------------

    /// Creation flags of a stream.
    pub fn stream_flags(&self, stream: StreamHandle) -> Result<StreamFlags> {
        Ok(self.inner.resolve(stream)?.flags())
    }

    /// Raw priority of a stream; the null stream reports 0.
    pub fn stream_priority(&self, stream: Option<StreamHandle>) -> Result<i32> {
        match stream {
            None => Ok(0),
            Some(handle) => Ok(self.inner.resolve(handle)?.priority().raw()),
        }
    }

    /// Effective CU mask of a stream on its device. The null stream and
    /// the per-thread token report the device-global (or all-CUs) mask.
    pub fn stream_cu_mask(&self, stream: Option<StreamHandle>) -> Result<CuMask> {
        match stream {
            None => {
                let device = self.inner.device(self.inner.current_device_ordinal())?;
                Ok(device.effective_cu_mask(&CuMask::unrestricted()))
            }
            Some(handle) if handle.is_per_thread() => {
                let device = self.inner.device(self.inner.current_device_ordinal())?;
                Ok(device.effective_cu_mask(&CuMask::unrestricted()))
            }
            Some(handle) => {
                let s = self.inner.resolve(handle)?;
                Ok(s.device().effective_cu_mask(s.cu_mask()))
            }
        }
    }

    /// Device ordinal a stream is bound to; the null stream reports the
    /// current device.
    pub fn stream_device(&self, stream: Option<StreamHandle>) -> Result<usize> {
        match stream {
            None => Ok(self.inner.current_device_ordinal()),
            Some(handle) => Ok(self.inner.resolve(handle)?.device().ordinal()),
        }
    }

    // ---------------------------------------------------------------
    // Capture
    // ---------------------------------------------------------------

    /// Begins recording submissions on `stream` into a graph.
    pub fn begin_capture(&self, stream: StreamHandle, mode: CaptureMode) -> Result<()> {
        if stream.is_per_thread() {
            return Err(StreamError::CaptureUnsupported);
        }
        let s = self.inner.resolve(stream)?;
        capture::begin_capture(&self.inner.coordinator, &s, mode)
    }

    /// Ends the capture begun on `stream`, returning the recorded graph.
    ///
    /// Parallel child streams joined via event waits are ended first; a
    /// poisoned session is cleaned up but reports `CaptureInvalidated`.
    pub fn end_capture(&self, stream: StreamHandle) -> Result<CaptureGraph> {
        let s = self.inner.resolve(stream)?;
        let status = s.capture_status();
        if status == CaptureStatus::None {
            return Err(StreamError::InvalidValue("stream is not capturing"));
        }
        if !s.is_origin() {
            return Err(StreamError::InvalidValue(
                "capture must end on its origin stream",
            ));
        }

        self.inner.coordinator.unregister(s.handle());
        capture::remove_thread_capture(s.handle());
        let detach = |h: EventHandle| self.inner.detach_event(h);
        let graph = capture::end_capture_tree(&s, &detach);
        debug!(stream = ?s.handle(), ?status, "capture ended");

        match status {
            CaptureStatus::Active => {
                let graph = graph
                    .ok_or_else(|| StreamError::Engine("capture session missing".to_string()))?;
                Ok(Arc::try_unwrap(graph)
                    .map(Mutex::into_inner)
                    .unwrap_or_else(|shared| shared.lock().clone()))
            }
            _ => Err(StreamError::CaptureInvalidated),
        }
    }

    /// Current capture status of a stream.
    pub fn capture_status(&self, stream: StreamHandle) -> Result<CaptureStatus> {
        Ok(self.inner.resolve(stream)?.capture_status())
    }

    /// Whether a stream is actively capturing.
    pub fn is_capturing(&self, stream: StreamHandle) -> Result<bool> {
        Ok(self.inner.resolve(stream)?.capture_status() == CaptureStatus::Active)
    }

    /// Capture status plus the session id the stream participates in.
    pub fn capture_info(&self, stream: StreamHandle) -> Result<(CaptureStatus, Option<u64>)> {
        let s = self.inner.resolve(stream)?;
        Ok((s.capture_status(), s.capture_id()))
    }

    /// Swaps the calling thread's capture mode, returning the previous
    /// one.
    pub fn exchange_thread_capture_mode(&self, mode: CaptureMode) -> CaptureMode {
        capture::set_thread_capture_mode(mode)
    }

    // ---------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------

    /// Creates an event.
    pub fn event_create(&self) -> EventHandle {
        let handle = EventHandle::from_raw(self.inner.next_handle.fetch_add(1, Ordering::Relaxed));
        self.inner
            .events
            .write()
            .insert(handle, Arc::new(Event::new(handle)));
        handle
    }

    /// Destroys an event.
    pub fn event_destroy(&self, event: EventHandle) -> Result<()> {
        self.inner
            .events
            .write()
            .remove(&event)
            .map(|_| ())
            .ok_or(StreamError::InvalidHandle("event"))
    }

    /// Records `event` at the current point of `stream`'s command order.
    pub fn event_record(&self, event: EventHandle, stream: Option<StreamHandle>) -> Result<()> {
        let e = self
            .inner
            .events
            .read()
            .get(&event)
            .cloned()
            .ok_or(StreamError::InvalidHandle("event"))?;
        let s = self.inner.resolve_or_null(stream)?;

        enum Recorded {
            Captured(crate::graph::NodeId),
            Host,
        }

        let recorded = {
            let mut inner = s.inner.lock();
            match inner.capture.status {
                CaptureStatus::Active => {
                    let Some(session) = inner.capture.session.as_mut() else {
                        return Err(StreamError::Engine("capture session missing".to_string()));
                    };
                    let deps = std::mem::take(&mut session.last_nodes);
                    let node = session.graph.lock().add_node(GraphNodeKind::Marker, deps);
                    session.last_nodes = vec![node];
                    if !session.events.contains(&e.handle()) {
                        session.events.push(e.handle());
                    }
                    Recorded::Captured(node)
                }
                CaptureStatus::Invalidated => return Err(StreamError::CaptureInvalidated),
                CaptureStatus::None => Recorded::Host,
            }
        };

        match recorded {
            Recorded::Captured(node) => {
                e.record_captured(&s, vec![node]);
                Ok(())
            }
            Recorded::Host => {
                let signal = s.record_marker()?;
                e.record_signal(&s, signal);
                Ok(())
            }
        }
    }

    /// Non-blocking completion check of the last record.
    pub fn event_query(&self, event: EventHandle) -> Result<()> {
        let e = self
            .inner
            .events
            .read()
            .get(&event)
            .cloned()
            .ok_or(StreamError::InvalidHandle("event"))?;
        match e.signal() {
            None => Ok(()),
            Some(signal) if signal.is_done() => Ok(()),
            Some(_) => Err(StreamError::NotReady),
        }
    }

    /// Blocks until the last record of `event` completes.
    pub fn event_synchronize(&self, event: EventHandle) -> Result<()> {
        let e = self
            .inner
            .events
            .read()
            .get(&event)
            .cloned()
            .ok_or(StreamError::InvalidHandle("event"))?;
        if let Some(signal) = e.signal() {
            signal.wait(
                self.inner.config.sync_timeout(),
                self.inner.config.poll_interval(),
            )?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Work submission
    // ---------------------------------------------------------------

    /// Appends an ordered work submission, or records it when the stream
    /// is capturing. Work on a non-capturing stream while an unrelated
    /// capture is ongoing poisons that capture and is rejected.
    pub fn enqueue<F>(&self, stream: Option<StreamHandle>, task: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.enqueue_task(stream, Arc::new(task))
    }

    /// [`enqueue`](Self::enqueue) for an already-shared task payload.
    pub fn enqueue_task(&self, stream: Option<StreamHandle>, task: Task) -> Result<()> {
        let s = self.inner.resolve_or_null(stream)?;
        if s.capture_status() == CaptureStatus::None
            && self.inner.coordinator.capture_ongoing(Some(&s))
        {
            return Err(StreamError::CaptureUnsupported);
        }
        s.enqueue_task(task)
    }

    /// Resolves a device function through the registered program table and
    /// enqueues it.
    pub fn launch_kernel(&self, stream: Option<StreamHandle>, name: &str) -> Result<()> {
        let s = self.inner.resolve_or_null(stream)?;
        let programs = self
            .inner
            .programs
            .read()
            .clone()
            .ok_or(StreamError::NoBinaryForGpu(s.device().ordinal()))?;
        let task = programs.lookup(s.device().ordinal(), name)?;
        if s.capture_status() == CaptureStatus::None
            && self.inner.coordinator.capture_ongoing(Some(&s))
        {
            return Err(StreamError::CaptureUnsupported);
        }
        s.enqueue_task(task)
    }

    /// Registers the program-lookup collaborator used by
    /// [`launch_kernel`](Self::launch_kernel).
    pub fn set_program_lookup(&self, programs: Arc<dyn ProgramLookup>) {
        *self.inner.programs.write() = Some(programs);
    }

    /// Replays an instantiated graph through ordinary stream submission.
    pub fn graph_launch(&self, exec: &GraphExec, stream: Option<StreamHandle>) -> Result<()> {
        let s = self.inner.resolve_or_null(stream)?;
        if s.capture_status() == CaptureStatus::None
            && self.inner.coordinator.capture_ongoing(Some(&s))
        {
            return Err(StreamError::CaptureUnsupported);
        }
        for node in exec.schedule() {
            match node {
                GraphNodeKind::Task(task) => s.enqueue_task(Arc::clone(task))?,
                GraphNodeKind::Marker | GraphNodeKind::Empty => {}
            }
        }
        Ok(())
    }
}
