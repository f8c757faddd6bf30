//! # Conflux Runtime
//!
//! The asynchronous execution-stream and capture subsystem of the Conflux
//! GPU runtime: ordered streams over pooled hardware queues, lightweight
//! completion signals, transparent capture of stream submissions into
//! replayable dependency graphs, and completion-ordered host callbacks.
//!
//! # Example
//!
//! ```
//! use conflux_core::{RuntimeConfig, StreamFlags};
//! use conflux_runtime::Runtime;
//!
//! # fn main() -> conflux_core::Result<()> {
//! let runtime = Runtime::new(RuntimeConfig::default())?;
//! let stream = runtime.stream_create(StreamFlags::Default)?;
//!
//! runtime.enqueue(Some(stream), || { /* device work */ })?;
//! runtime.stream_synchronize(Some(stream))?;
//! runtime.stream_destroy(stream)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod device;
mod event;
pub mod graph;
mod queue_pool;
mod runtime;
mod signal;
mod stream;

pub use device::Device;
pub use event::Event;
pub use graph::{CaptureGraph, GraphExec, GraphNode, GraphNodeKind, NodeId};
pub use queue_pool::{QueuePool, QueuePoolStats, QueueRef, QueueSlot};
pub use runtime::Runtime;
pub use signal::{CompletionSignal, SignalPool, SignalPoolStats};
pub use stream::Stream;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::graph::{CaptureGraph, GraphExec};
    pub use crate::{Runtime, Stream};
    pub use conflux_core::prelude::*;
}
