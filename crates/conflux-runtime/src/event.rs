//! Events: recorded points in a stream's command order.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use conflux_core::types::EventHandle;

use crate::graph::NodeId;
use crate::signal::CompletionSignal;
use crate::stream::Stream;

struct EventState {
    /// Stream the event was last recorded on, if any.
    capture_stream: Option<Weak<Stream>>,
    /// Graph nodes preceding the event when recorded during capture.
    prev_nodes: Vec<NodeId>,
    /// Completion signal of the recording marker outside capture.
    signal: Option<Arc<CompletionSignal>>,
}

/// A stream event.
///
/// Recording snapshots the stream's progress: outside capture the event
/// carries the completion signal of a recording marker, during capture it
/// carries the graph nodes that precede it.
pub struct Event {
    handle: EventHandle,
    state: Mutex<EventState>,
}

impl Event {
    pub(crate) fn new(handle: EventHandle) -> Self {
        Self {
            handle,
            state: Mutex::new(EventState {
                capture_stream: None,
                prev_nodes: Vec::new(),
                signal: None,
            }),
        }
    }

    /// Handle of this event.
    #[must_use]
    pub fn handle(&self) -> EventHandle {
        self.handle
    }

    /// Records the event on `stream` during capture.
    pub(crate) fn record_captured(&self, stream: &Arc<Stream>, prev_nodes: Vec<NodeId>) {
        let mut state = self.state.lock();
        state.capture_stream = Some(Arc::downgrade(stream));
        state.prev_nodes = prev_nodes;
        state.signal = None;
    }

    /// Records the event on `stream` outside capture.
    pub(crate) fn record_signal(&self, stream: &Arc<Stream>, signal: Arc<CompletionSignal>) {
        let mut state = self.state.lock();
        state.capture_stream = Some(Arc::downgrade(stream));
        state.prev_nodes.clear();
        state.signal = Some(signal);
    }

    /// Unbinds the event from its capture session.
    pub(crate) fn detach_capture(&self) {
        let mut state = self.state.lock();
        state.capture_stream = None;
        state.prev_nodes.clear();
    }

    /// Stream the event was last recorded on.
    pub(crate) fn recorded_stream(&self) -> Option<Weak<Stream>> {
        self.state.lock().capture_stream.clone()
    }

    /// Nodes preceding the event inside its capture session.
    pub(crate) fn prev_nodes(&self) -> Vec<NodeId> {
        self.state.lock().prev_nodes.clone()
    }

    /// Completion signal of the last host-visible record.
    pub(crate) fn signal(&self) -> Option<Arc<CompletionSignal>> {
        self.state.lock().signal.clone()
    }
}
