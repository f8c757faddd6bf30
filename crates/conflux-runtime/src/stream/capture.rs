//! Capture sessions: recording stream submissions into graphs.
//!
//! A session spans its origin stream and any streams joined through
//! cross-stream event waits. Process-wide bookkeeping lives in the
//! [`CaptureCoordinator`]; per-thread membership lives in a thread-local
//! execution-context record. The coordinator lock is never requested
//! while a stream's own lock is held: registration always happens after
//! the stream lock is dropped.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use conflux_core::error::{Result, StreamError};
use conflux_core::types::{CaptureMode, CaptureStatus, EventHandle, StreamHandle};

use crate::event::Event;
use crate::graph::{CaptureGraph, NodeId};
use crate::runtime::RuntimeInner;
use crate::stream::Stream;

/// Capture bookkeeping embedded in a stream.
#[derive(Default)]
pub(crate) struct CaptureState {
    pub status: CaptureStatus,
    pub session: Option<CaptureSession>,
}

/// Shared state of one capture: owned by the origin stream, inherited by
/// parallel children joined via event waits.
pub(crate) struct CaptureSession {
    pub id: u64,
    pub mode: CaptureMode,
    pub graph: Arc<Mutex<CaptureGraph>>,
    pub origin: bool,
    pub parent: Option<Weak<Stream>>,
    pub children: Vec<Arc<Stream>>,
    pub events: Vec<EventHandle>,
    pub last_nodes: Vec<NodeId>,
}

/// Process-wide capture bookkeeping: the globally-capturing stream set and
/// the capture-id source.
pub(crate) struct CaptureCoordinator {
    global: Mutex<Vec<Arc<Stream>>>,
    next_id: AtomicU64,
}

impl CaptureCoordinator {
    pub(crate) fn new() -> Self {
        Self {
            global: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn next_capture_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn register_global(&self, stream: Arc<Stream>) {
        self.global.lock().push(stream);
    }

    pub(crate) fn unregister(&self, handle: StreamHandle) {
        self.global.lock().retain(|s| s.handle() != handle);
    }

    /// The capture-safety rule applied by operations incompatible with
    /// capture. Returns `true` when the operation must be rejected; any
    /// capture it would have corrupted is poisoned as a side effect.
    pub(crate) fn capture_ongoing(&self, stream: Option<&Arc<Stream>>) -> bool {
        let status = stream.map_or(CaptureStatus::None, |s| s.capture_status());
        match status {
            CaptureStatus::None => {
                // A thread capturing in relaxed mode bypasses the check
                // entirely; it is not merely exempt from poisoning.
                if thread_capture_mode() == CaptureMode::Relaxed {
                    return false;
                }
                let global: Vec<_> = self.global.lock().clone();
                if !global.is_empty() {
                    for s in &global {
                        s.invalidate_capture();
                    }
                    return true;
                }
                let local = thread_local_captures();
                if !local.is_empty() {
                    for s in &local {
                        s.invalidate_capture();
                    }
                    return true;
                }
                false
            }
            CaptureStatus::Active => {
                if let Some(s) = stream {
                    s.invalidate_capture();
                }
                true
            }
            CaptureStatus::Invalidated => true,
        }
    }
}

/// Starts a capture session on `stream`.
pub(crate) fn begin_capture(
    coordinator: &CaptureCoordinator,
    stream: &Arc<Stream>,
    mode: CaptureMode,
) -> Result<()> {
    if stream.is_null() || stream.is_per_thread_default() {
        return Err(StreamError::CaptureUnsupported);
    }

    let id = {
        let mut inner = stream.inner.lock();
        if inner.capture.status != CaptureStatus::None {
            return Err(StreamError::InvalidValue("capture already begun on stream"));
        }
        let id = coordinator.next_capture_id();
        inner.capture.status = CaptureStatus::Active;
        inner.capture.session = Some(CaptureSession {
            id,
            mode,
            graph: Arc::new(Mutex::new(CaptureGraph::new())),
            origin: true,
            parent: None,
            children: Vec::new(),
            events: Vec::new(),
            last_nodes: Vec::new(),
        });
        id
    };

    match mode {
        CaptureMode::Global => coordinator.register_global(Arc::clone(stream)),
        CaptureMode::ThreadLocal => push_thread_capture(Arc::clone(stream)),
        CaptureMode::Relaxed => {}
    }
    set_thread_capture_mode(mode);

    debug!(stream = ?stream.handle(), capture_id = id, ?mode, "capture begun");
    Ok(())
}

/// Ends the session on `stream` and every parallel child, two-phase: the
/// child list is snapshotted under the lock, then each detached child is
/// ended without holding it. Returns the origin's graph handle.
pub(crate) fn end_capture_tree(
    stream: &Arc<Stream>,
    detach_event: &dyn Fn(EventHandle),
) -> Option<Arc<Mutex<CaptureGraph>>> {
    let (graph, events, children) = {
        let mut inner = stream.inner.lock();
        inner.capture.status = CaptureStatus::None;
        match inner.capture.session.take() {
            Some(session) => (Some(session.graph), session.events, session.children),
            None => (None, Vec::new(), Vec::new()),
        }
    };

    for event in events {
        detach_event(event);
    }
    for child in children {
        end_capture_tree(&child, detach_event);
    }
    graph
}

/// Removes `child` from the parallel-child set of its parent, if the
/// parent is still alive. Used when a child stream is destroyed
/// mid-capture so the recursive end sees no dangling reference.
pub(crate) fn erase_parallel_child(parent: &Arc<Stream>, child: StreamHandle) {
    let mut inner = parent.inner.lock();
    if let Some(session) = inner.capture.session.as_mut() {
        session.children.retain(|c| c.handle() != child);
    }
}

/// Pulls `wait_stream` into the capture session of `event_stream` when
/// `event` was recorded on it mid-capture.
///
/// Returns `false` when the event is not captured on `event_stream`, in
/// which case the caller falls back to host-visible wait semantics.
pub(crate) fn join_capture(
    event_stream: &Arc<Stream>,
    wait_stream: &Arc<Stream>,
    event: &Arc<Event>,
) -> Result<bool> {
    // Snapshot the session identity without holding both stream locks.
    let inherited = {
        let inner = event_stream.inner.lock();
        match inner.capture.session.as_ref() {
            Some(session) if session.events.contains(&event.handle()) => {
                Some((Arc::clone(&session.graph), session.id, session.mode))
            }
            _ => None,
        }
    };
    let Some((graph, id, mode)) = inherited else {
        return Ok(false);
    };

    let prev_nodes = event.prev_nodes();

    if !wait_stream.is_origin() {
        {
            let mut inner = wait_stream.inner.lock();
            let session = inner.capture.session.get_or_insert_with(|| CaptureSession {
                id,
                mode,
                graph: Arc::clone(&graph),
                origin: false,
                parent: None,
                children: Vec::new(),
                events: Vec::new(),
                last_nodes: Vec::new(),
            });
            session.id = id;
            session.mode = mode;
            session.graph = Arc::clone(&graph);
            session.origin = false;
            session.parent = Some(Arc::downgrade(event_stream));
            inner.capture.status = CaptureStatus::Active;
        }
        {
            let mut inner = event_stream.inner.lock();
            if let Some(session) = inner.capture.session.as_mut() {
                if !session
                    .children
                    .iter()
                    .any(|c| c.handle() == wait_stream.handle())
                {
                    session.children.push(Arc::clone(wait_stream));
                }
            }
        }
        debug!(
            wait = ?wait_stream.handle(),
            origin = ?event_stream.handle(),
            capture_id = id,
            "stream joined capture as parallel child"
        );
    }

    // Merge the nodes preceding the event into the waiting stream's
    // pending set: the join edge.
    let mut inner = wait_stream.inner.lock();
    if let Some(session) = inner.capture.session.as_mut() {
        for node in prev_nodes {
            if !session.last_nodes.contains(&node) {
                session.last_nodes.push(node);
            }
        }
    }
    Ok(true)
}

/// Per-thread execution context: capture mode and membership, per-thread
/// default streams, and the selected device per runtime.
pub(crate) struct ThreadContext {
    mode: CaptureMode,
    capture_streams: Vec<Arc<Stream>>,
    per_thread_streams: HashMap<(u64, usize), StreamHandle>,
    current_device: HashMap<u64, usize>,
    runtimes: HashMap<u64, Weak<RuntimeInner>>,
}

impl ThreadContext {
    fn new() -> Self {
        Self {
            mode: CaptureMode::Global,
            capture_streams: Vec::new(),
            per_thread_streams: HashMap::new(),
            current_device: HashMap::new(),
            runtimes: HashMap::new(),
        }
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        // The per-thread default streams die with their thread.
        for ((runtime_id, _device), handle) in self.per_thread_streams.drain() {
            if let Some(runtime) = self.runtimes.get(&runtime_id).and_then(Weak::upgrade) {
                runtime.destroy_stream_at_thread_exit(handle);
            }
        }
    }
}

thread_local! {
    static THREAD_CTX: RefCell<ThreadContext> = RefCell::new(ThreadContext::new());
}

pub(crate) fn thread_capture_mode() -> CaptureMode {
    THREAD_CTX
        .try_with(|ctx| ctx.borrow().mode)
        .unwrap_or(CaptureMode::Global)
}

/// Sets the thread's capture mode, returning the previous one.
pub(crate) fn set_thread_capture_mode(mode: CaptureMode) -> CaptureMode {
    THREAD_CTX
        .try_with(|ctx| {
            let mut ctx = ctx.borrow_mut();
            std::mem::replace(&mut ctx.mode, mode)
        })
        .unwrap_or(CaptureMode::Global)
}

fn thread_local_captures() -> Vec<Arc<Stream>> {
    THREAD_CTX
        .try_with(|ctx| ctx.borrow().capture_streams.clone())
        .unwrap_or_default()
}

fn push_thread_capture(stream: Arc<Stream>) {
    let _ = THREAD_CTX.try_with(|ctx| ctx.borrow_mut().capture_streams.push(stream));
}

pub(crate) fn remove_thread_capture(handle: StreamHandle) {
    let _ = THREAD_CTX.try_with(|ctx| {
        ctx.borrow_mut()
            .capture_streams
            .retain(|s| s.handle() != handle)
    });
}

pub(crate) fn thread_per_thread_stream(runtime_id: u64, device: usize) -> Option<StreamHandle> {
    THREAD_CTX
        .try_with(|ctx| ctx.borrow().per_thread_streams.get(&(runtime_id, device)).copied())
        .ok()
        .flatten()
}

pub(crate) fn set_thread_per_thread_stream(
    runtime: &Arc<RuntimeInner>,
    device: usize,
    handle: StreamHandle,
) {
    let _ = THREAD_CTX.try_with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        ctx.per_thread_streams
            .insert((runtime.id(), device), handle);
        ctx.runtimes.insert(runtime.id(), Arc::downgrade(runtime));
    });
}

pub(crate) fn thread_current_device(runtime_id: u64) -> usize {
    THREAD_CTX
        .try_with(|ctx| {
            ctx.borrow()
                .current_device
                .get(&runtime_id)
                .copied()
                .unwrap_or(0)
        })
        .unwrap_or(0)
}

pub(crate) fn set_thread_current_device(runtime_id: u64, device: usize) {
    let _ = THREAD_CTX.try_with(|ctx| {
        ctx.borrow_mut().current_device.insert(runtime_id, device);
    });
}
