//! Devices: stream registries and pooled hardware resources.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use conflux_core::config::RuntimeConfig;
use conflux_core::error::Result;
use conflux_core::hal::QueueEngine;
use conflux_core::types::{CuMask, StreamHandle};

use crate::queue_pool::{QueuePool, QueuePoolStats};
use crate::signal::{SignalPool, SignalPoolStats};
use crate::stream::Stream;

/// A device: one engine plus the registries and pools scoped to it.
///
/// The stream registry is the handle table: membership is the liveness
/// check performed before any stream handle is dereferenced.
pub struct Device {
    ordinal: usize,
    engine: Arc<dyn QueueEngine>,
    queue_pool: QueuePool,
    signal_pool: SignalPool,
    streams: RwLock<HashMap<StreamHandle, Arc<Stream>>>,
    safe_streams: Mutex<HashSet<(StreamHandle, StreamHandle)>>,
}

impl Device {
    pub(crate) fn new(
        ordinal: usize,
        engine: Arc<dyn QueueEngine>,
        config: &RuntimeConfig,
    ) -> Result<Arc<Self>> {
        let queue_pool = QueuePool::new(
            Arc::clone(&engine),
            config.queue_size_hint,
            config.max_queues_per_bucket,
        );
        let signal_pool = SignalPool::new(Arc::clone(&engine), config.signal_pool_seed)?;

        debug!(ordinal, "device initialized");
        Ok(Arc::new(Self {
            ordinal,
            engine,
            queue_pool,
            signal_pool,
            streams: RwLock::new(HashMap::new()),
            safe_streams: Mutex::new(HashSet::new()),
        }))
    }

    /// Device ordinal.
    #[must_use]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// The queue engine backing this device.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn QueueEngine> {
        &self.engine
    }

    pub(crate) fn queue_pool(&self) -> &QueuePool {
        &self.queue_pool
    }

    pub(crate) fn signal_pool(&self) -> &SignalPool {
        &self.signal_pool
    }

    /// Queue-pool statistics.
    #[must_use]
    pub fn queue_pool_stats(&self) -> QueuePoolStats {
        self.queue_pool.stats()
    }

    /// Signal-pool statistics.
    #[must_use]
    pub fn signal_pool_stats(&self) -> SignalPoolStats {
        self.signal_pool.stats()
    }

    /// Distinct hardware queues for one placement key.
    #[must_use]
    pub fn queue_bucket_depth(&self, cu_mask: &CuMask, priority: conflux_core::types::Priority) -> usize {
        self.queue_pool.bucket_depth(false, cu_mask, priority)
    }

    pub(crate) fn add_stream(&self, stream: Arc<Stream>) {
        self.streams.write().insert(stream.handle(), stream);
    }

    pub(crate) fn remove_stream(&self, handle: StreamHandle) -> Option<Arc<Stream>> {
        let removed = self.streams.write().remove(&handle);
        if removed.is_some() {
            let mut safe = self.safe_streams.lock();
            safe.retain(|(a, b)| *a != handle && *b != handle);
        }
        removed
    }

    pub(crate) fn stream_exists(&self, handle: StreamHandle) -> bool {
        self.streams.read().contains_key(&handle)
    }

    pub(crate) fn get_stream(&self, handle: StreamHandle) -> Option<Arc<Stream>> {
        self.streams.read().get(&handle).cloned()
    }

    /// Number of registered streams.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    pub(crate) fn streams_snapshot(&self) -> Vec<Arc<Stream>> {
        self.streams.read().values().cloned().collect()
    }

    /// Registers the same-device fast path between an event's stream and a
    /// waiting stream, so repeated waits skip the host-side block.
    pub(crate) fn add_safe_stream(&self, event_stream: StreamHandle, wait_stream: StreamHandle) {
        self.safe_streams.lock().insert((event_stream, wait_stream));
    }

    pub(crate) fn is_safe_stream(&self, event_stream: StreamHandle, wait_stream: StreamHandle) -> bool {
        self.safe_streams.lock().contains(&(event_stream, wait_stream))
    }

    /// Effective CU mask reported for a stream mask on this device.
    #[must_use]
    pub fn effective_cu_mask(&self, stream_mask: &CuMask) -> CuMask {
        stream_mask.effective(
            self.engine.global_cu_mask().as_ref(),
            self.engine.compute_unit_count(),
        )
    }
}
