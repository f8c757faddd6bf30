//! Host-side program table.

use std::collections::HashMap;

use parking_lot::RwLock;

use conflux_core::error::{Result, StreamError};
use conflux_core::hal::{ProgramLookup, Task};

/// Name-to-task table implementing the program-lookup collaborator.
///
/// Stands in for module loading: tests register closures under function
/// names and launch them through the runtime.
pub struct HostProgramTable {
    device_count: usize,
    functions: RwLock<HashMap<String, Task>>,
}

impl HostProgramTable {
    /// Creates a table covering `device_count` devices.
    #[must_use]
    pub fn new(device_count: usize) -> Self {
        Self {
            device_count,
            functions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `task` under `name` for all devices.
    pub fn register(&self, name: &str, task: Task) {
        self.functions.write().insert(name.to_string(), task);
    }
}

impl ProgramLookup for HostProgramTable {
    fn lookup(&self, device: usize, name: &str) -> Result<Task> {
        if device >= self.device_count {
            return Err(StreamError::NoBinaryForGpu(device));
        }
        self.functions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StreamError::InvalidDeviceFunction(name.to_string()))
    }
}
