//! # Conflux Host Engine
//!
//! A software implementation of the `conflux-core` hardware traits: each
//! queue is a worker thread draining an in-order command channel, and
//! signals are condvar-backed completion flags. The engine preserves the
//! ordering and completion semantics of a real command processor, which
//! makes it the reference backend for the test suite and a fallback for
//! hosts without a device.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod engine;
mod programs;
mod queue;
mod signal;

pub use engine::{HostEngine, HostcallSlab};
pub use programs::HostProgramTable;
pub use queue::HostQueue;
pub use signal::HostSignal;
