//! # Conflux Core
//!
//! Foundation types for the Conflux GPU stream runtime: status codes,
//! stream descriptors, runtime configuration, and the hardware-abstraction
//! traits implemented by queue engines.
//!
//! The stream/capture machinery itself lives in `conflux-runtime`; a
//! software engine suitable for tests and hosts without a GPU lives in
//! `conflux-host`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod hal;
pub mod types;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{RuntimeConfig, RuntimeConfigBuilder};
    pub use crate::error::{Result, StreamError};
    pub use crate::hal::{
        Command, HostCallback, HostcallBuffer, HwQueue, HwSignal, ProgramLookup, QueueEngine, Task,
    };
    pub use crate::types::{
        CaptureMode, CaptureStatus, CuMask, EngineKind, EventHandle, Priority, StreamFlags,
        StreamHandle,
    };
}

pub use config::{RuntimeConfig, RuntimeConfigBuilder};
pub use error::{Result, StreamError};
pub use types::{
    CaptureMode, CaptureStatus, CuMask, EngineKind, EventHandle, Priority, StreamFlags,
    StreamHandle,
};
