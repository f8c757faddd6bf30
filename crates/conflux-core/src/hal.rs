//! Hardware abstraction consumed by the stream subsystem.
//!
//! These traits are the seam between the stream/capture machinery and the
//! device it drives. An implementor provides in-order command queues,
//! pollable/waitable completion signals, and hostcall buffers; the
//! `conflux-host` crate ships a software engine, a real backend would wrap
//! the vendor command processor.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::types::{CuMask, EngineKind, Priority};

/// An opaque, re-executable unit of device work.
///
/// The subsystem never looks inside a task; it is the stand-in for a
/// compiled kernel dispatch packet and must be replayable so captured
/// graphs can be launched more than once.
pub type Task = Arc<dyn Fn() + Send + Sync>;

/// A host callback delivered from a marker command.
pub struct HostCallback {
    /// The host function, given the stream status at invocation time.
    pub func: Box<dyn FnOnce(Result<()>) + Send>,
    /// Signaled only after `func` has returned. Hardware completion of the
    /// carrying marker may be observable earlier.
    pub done: Arc<dyn HwSignal>,
}

/// A command accepted by a hardware queue.
///
/// Queues execute commands strictly in submission order; dependency lists
/// only ever reference work on *other* queues.
pub enum Command {
    /// Execute an opaque task, then complete `signal`.
    Dispatch {
        /// Work payload.
        task: Task,
        /// Completion signal for this command.
        signal: Arc<dyn HwSignal>,
    },
    /// Barrier with no payload: wait for `deps`, complete `signal`, then
    /// run the optional host callback.
    Marker {
        /// Signals that must complete before this marker does.
        deps: Vec<Arc<dyn HwSignal>>,
        /// Completion signal for this command.
        signal: Arc<dyn HwSignal>,
        /// Host callback fired after the barrier is reached.
        callback: Option<HostCallback>,
    },
}

/// A lightweight hardware completion primitive.
pub trait HwSignal: Send + Sync {
    /// Non-blocking completion check.
    fn is_complete(&self) -> bool;

    /// Blocks until the signal completes or `timeout` elapses. Returns
    /// `false` on timeout.
    fn wait(&self, timeout: Option<Duration>) -> bool;

    /// Marks the signal complete, stamping the completion time. Called by
    /// the engine when the associated command retires.
    fn complete(&self);

    /// Re-arms the signal for reuse.
    fn reset(&self);

    /// Completion timestamp in nanoseconds since the engine epoch.
    fn timestamp(&self) -> Option<u64>;
}

/// An in-order hardware command queue.
pub trait HwQueue: Send + Sync {
    /// Appends a command; execution is asynchronous.
    fn submit(&self, command: Command) -> Result<()>;

    /// Engine this queue dispatches to.
    fn engine(&self) -> EngineKind;
}

/// Buffer servicing in-kernel host calls, created lazily per queue.
pub trait HostcallBuffer: Send + Sync {
    /// Number of hostcall slots.
    fn capacity(&self) -> usize;
}

/// Per-device factory for queues, signals and hostcall buffers.
pub trait QueueEngine: Send + Sync {
    /// Creates a hardware queue honoring the given placement constraints.
    fn create_queue(
        &self,
        size_hint: u32,
        cooperative: bool,
        cu_mask: &CuMask,
        priority: Priority,
    ) -> Result<Arc<dyn HwQueue>>;

    /// Creates a completion signal.
    fn create_signal(&self) -> Result<Arc<dyn HwSignal>>;

    /// Creates a hostcall buffer.
    fn create_hostcall_buffer(&self) -> Result<Arc<dyn HostcallBuffer>>;

    /// Number of compute units exposed by the device.
    fn compute_unit_count(&self) -> u32;

    /// Device-global CU-mask restriction, if one is configured.
    fn global_cu_mask(&self) -> Option<CuMask> {
        None
    }
}

/// Program/module lookup collaborator.
///
/// Compilation and code-object loading happen outside this subsystem; the
/// runtime only resolves a device function name to a dispatchable task.
pub trait ProgramLookup: Send + Sync {
    /// Resolves `name` for `device`.
    ///
    /// Fails with `NoBinaryForGpu` when no code object is loaded for the
    /// device and `InvalidDeviceFunction` when the name is unknown.
    fn lookup(&self, device: usize, name: &str) -> Result<Task>;
}
