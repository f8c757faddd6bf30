//! Error and status codes surfaced at the stream API boundary.
//!
//! Every public operation in the runtime returns [`Result`]; internal helper
//! failures are converted to one of these codes at the first API-boundary
//! function. No panics cross the subsystem boundary.

use thiserror::Error;

/// Errors returned by stream, capture, queue and event operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// A null, inconsistent or out-of-range argument was passed.
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),

    /// A handle did not refer to a live object.
    #[error("invalid handle: {0}")]
    InvalidHandle(&'static str),

    /// A reserved handle (such as the per-thread default stream) was used
    /// where an explicitly created resource is required.
    #[error("invalid resource handle: {0}")]
    InvalidResourceHandle(&'static str),

    /// The stream is no longer registered with any device; its owning
    /// context was torn down concurrently.
    #[error("context is destroyed: handle {0:#x} is not registered with any device")]
    ContextIsDestroyed(u64),

    /// Allocation of a queue, signal or command failed.
    #[error("out of memory while allocating {0}")]
    OutOfMemory(&'static str),

    /// Non-blocking query: previously submitted work has not completed.
    #[error("not ready")]
    NotReady,

    /// The operation is not permitted on a capturing stream.
    #[error("operation is unsupported during stream capture")]
    CaptureUnsupported,

    /// The capture session was poisoned by an earlier protocol violation.
    #[error("stream capture was invalidated")]
    CaptureInvalidated,

    /// An event recorded inside an unrelated active capture was observed.
    #[error("stream capture isolation violated")]
    CaptureIsolation,

    /// The implicit (null) stream was used while a capture is ongoing.
    #[error("implicit stream use during stream capture")]
    CaptureImplicit,

    /// No code object is loaded for the given device ordinal.
    #[error("no binary for device {0}")]
    NoBinaryForGpu(usize),

    /// The named device function is not present in any loaded module.
    #[error("invalid device function: {0}")]
    InvalidDeviceFunction(String),

    /// A failure reported by the underlying queue engine.
    #[error("engine error: {0}")]
    Engine(String),
}

/// Result alias used across the Conflux crates.
pub type Result<T> = std::result::Result<T, StreamError>;
