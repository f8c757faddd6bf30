//! Software queue engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use conflux_core::error::Result;
use conflux_core::hal::{HostcallBuffer, HwQueue, HwSignal, QueueEngine};
use conflux_core::types::{CuMask, EngineKind, Priority};

use crate::queue::HostQueue;
use crate::signal::HostSignal;

/// Default number of compute units the software device reports.
pub const DEFAULT_CU_COUNT: u32 = 64;

/// Software implementation of [`QueueEngine`].
///
/// All queues dispatch to host worker threads; CU masks and priorities are
/// honored as placement metadata so the pool bucketing above behaves
/// exactly as it would on hardware.
pub struct HostEngine {
    epoch: Instant,
    cu_count: u32,
    global_cu_mask: Option<CuMask>,
    hostcall_capacity: usize,
    queues_created: AtomicUsize,
}

impl HostEngine {
    /// Creates an engine reporting [`DEFAULT_CU_COUNT`] compute units.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cu_count(DEFAULT_CU_COUNT)
    }

    /// Creates an engine reporting `cu_count` compute units.
    #[must_use]
    pub fn with_cu_count(cu_count: u32) -> Self {
        Self {
            epoch: Instant::now(),
            cu_count,
            global_cu_mask: None,
            hostcall_capacity: 128,
            queues_created: AtomicUsize::new(0),
        }
    }

    /// Restricts every queue to a device-global CU mask.
    #[must_use]
    pub fn with_global_cu_mask(mut self, mask: CuMask) -> Self {
        self.global_cu_mask = Some(mask);
        self
    }

    /// Number of queues created so far.
    #[must_use]
    pub fn queues_created(&self) -> usize {
        self.queues_created.load(Ordering::Relaxed)
    }
}

impl Default for HostEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueEngine for HostEngine {
    fn create_queue(
        &self,
        size_hint: u32,
        cooperative: bool,
        cu_mask: &CuMask,
        priority: Priority,
    ) -> Result<Arc<dyn HwQueue>> {
        let index = self.queues_created.fetch_add(1, Ordering::Relaxed);
        let label = format!("cfx-hostq-{index}");

        debug!(
            index,
            size_hint,
            cooperative,
            priority = priority.raw(),
            masked = !cu_mask.is_unrestricted(),
            "creating host queue"
        );

        let queue = HostQueue::spawn(label, EngineKind::Compute)?;
        Ok(Arc::new(queue))
    }

    fn create_signal(&self) -> Result<Arc<dyn HwSignal>> {
        Ok(Arc::new(HostSignal::new(self.epoch)))
    }

    fn create_hostcall_buffer(&self) -> Result<Arc<dyn HostcallBuffer>> {
        Ok(Arc::new(HostcallSlab {
            capacity: self.hostcall_capacity,
        }))
    }

    fn compute_unit_count(&self) -> u32 {
        self.cu_count
    }

    fn global_cu_mask(&self) -> Option<CuMask> {
        self.global_cu_mask.clone()
    }
}

/// Hostcall buffer stand-in: a fixed number of slots.
pub struct HostcallSlab {
    capacity: usize,
}

impl HostcallBuffer for HostcallSlab {
    fn capacity(&self) -> usize {
        self.capacity
    }
}
