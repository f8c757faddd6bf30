//! Bounded, reference-counted pooling of hardware queues.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use conflux_core::error::{Result, StreamError};
use conflux_core::hal::{HostcallBuffer, HwQueue, QueueEngine};
use conflux_core::types::{CuMask, Priority};

/// Bucket identity: queues are shared only between streams with identical
/// placement requirements.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    priority: Priority,
    cu_mask: CuMask,
    cooperative: bool,
}

/// One pooled hardware queue with its share count and lazily created
/// hostcall buffer.
pub struct QueueSlot {
    queue: Arc<dyn HwQueue>,
    refs: AtomicUsize,
    hostcall: Mutex<Option<Arc<dyn HostcallBuffer>>>,
}

impl QueueSlot {
    /// The underlying hardware queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn HwQueue> {
        &self.queue
    }

    /// Number of streams currently multiplexed onto this queue.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Relaxed)
    }
}

/// A checked-out share of a pooled queue.
///
/// Shares are released explicitly through [`QueuePool::release`]; the
/// queue itself survives until pool teardown.
pub struct QueueRef {
    slot: Arc<QueueSlot>,
}

impl QueueRef {
    /// The underlying hardware queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn HwQueue> {
        self.slot.queue()
    }
}

struct Bucket {
    slots: Vec<Arc<QueueSlot>>,
}

/// Statistics for a queue pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueuePoolStats {
    /// Number of populated buckets.
    pub buckets: usize,
    /// Hardware queues alive in the pool.
    pub queues: usize,
    /// Outstanding stream references across all queues.
    pub live_refs: usize,
    /// Largest number of queues in any single bucket.
    pub max_bucket_depth: usize,
}

impl fmt::Display for QueuePoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueuePool: {} queues in {} buckets, {} live refs",
            self.queues, self.buckets, self.live_refs
        )
    }
}

/// Per-device pool of hardware queues bucketed by placement key.
///
/// Queues are scarce and expensive to create, so the pool intentionally
/// over-retains: releases only drop the share count, and a bucket at its
/// cap multiplexes new acquisitions onto the least-referenced queue.
pub struct QueuePool {
    engine: Arc<dyn QueueEngine>,
    size_hint: u32,
    max_per_bucket: usize,
    buckets: Mutex<HashMap<BucketKey, Arc<Mutex<Bucket>>>>,
    queues_created: AtomicUsize,
}

impl QueuePool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(engine: Arc<dyn QueueEngine>, size_hint: u32, max_per_bucket: usize) -> Self {
        Self {
            engine,
            size_hint,
            max_per_bucket: max_per_bucket.max(1),
            buckets: Mutex::new(HashMap::new()),
            queues_created: AtomicUsize::new(0),
        }
    }

    /// Hands out a share of a queue for the given placement key.
    ///
    /// An idle queue in the bucket is preferred; otherwise a new queue is
    /// created until the bucket cap, after which the least-referenced
    /// queue is shared.
    pub fn acquire(
        &self,
        cooperative: bool,
        cu_mask: &CuMask,
        priority: Priority,
    ) -> Result<QueueRef> {
        let key = BucketKey {
            priority,
            cu_mask: cu_mask.clone(),
            cooperative,
        };
        let bucket = {
            let mut buckets = self.buckets.lock();
            Arc::clone(
                buckets
                    .entry(key)
                    .or_insert_with(|| Arc::new(Mutex::new(Bucket { slots: Vec::new() }))),
            )
        };

        let mut bucket = bucket.lock();
        let least = bucket
            .slots
            .iter()
            .min_by_key(|slot| slot.ref_count())
            .cloned();

        if let Some(slot) = least {
            if slot.ref_count() == 0 || bucket.slots.len() >= self.max_per_bucket {
                slot.refs.fetch_add(1, Ordering::Relaxed);
                return Ok(QueueRef { slot });
            }
        }

        let queue = self
            .engine
            .create_queue(self.size_hint, cooperative, cu_mask, priority)
            .map_err(|e| {
                warn!(error = %e, "hardware queue creation failed");
                StreamError::OutOfMemory("hardware queue")
            })?;
        self.queues_created.fetch_add(1, Ordering::Relaxed);
        debug!(
            priority = priority.raw(),
            cooperative,
            masked = !cu_mask.is_unrestricted(),
            depth = bucket.slots.len() + 1,
            "created pooled hardware queue"
        );

        let slot = Arc::new(QueueSlot {
            queue,
            refs: AtomicUsize::new(1),
            hostcall: Mutex::new(None),
        });
        bucket.slots.push(Arc::clone(&slot));
        Ok(QueueRef { slot })
    }

    /// Returns a share. The queue stays alive for reuse.
    pub fn release(&self, queue_ref: QueueRef) {
        let prev = queue_ref.slot.refs.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "queue share released twice");
    }

    /// Existing or freshly created hostcall buffer for a pooled queue.
    ///
    /// Buffers are keyed to the queue slot and cached for its lifetime.
    pub fn hostcall_buffer(&self, queue_ref: &QueueRef) -> Result<Arc<dyn HostcallBuffer>> {
        let mut hostcall = queue_ref.slot.hostcall.lock();
        if let Some(buffer) = hostcall.as_ref() {
            return Ok(Arc::clone(buffer));
        }
        let buffer = self
            .engine
            .create_hostcall_buffer()
            .map_err(|_| StreamError::OutOfMemory("hostcall buffer"))?;
        *hostcall = Some(Arc::clone(&buffer));
        Ok(buffer)
    }

    /// Number of distinct queues alive for one placement key.
    #[must_use]
    pub fn bucket_depth(&self, cooperative: bool, cu_mask: &CuMask, priority: Priority) -> usize {
        let key = BucketKey {
            priority,
            cu_mask: cu_mask.clone(),
            cooperative,
        };
        let bucket = self.buckets.lock().get(&key).cloned();
        bucket.map_or(0, |b| b.lock().slots.len())
    }

    /// Pool statistics.
    #[must_use]
    pub fn stats(&self) -> QueuePoolStats {
        let buckets = self.buckets.lock();
        let mut stats = QueuePoolStats {
            buckets: buckets.len(),
            ..Default::default()
        };
        for bucket in buckets.values() {
            let bucket = bucket.lock();
            stats.queues += bucket.slots.len();
            stats.live_refs += bucket.slots.iter().map(|s| s.ref_count()).sum::<usize>();
            stats.max_bucket_depth = stats.max_bucket_depth.max(bucket.slots.len());
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_host::HostEngine;

    fn pool(max: usize) -> QueuePool {
        QueuePool::new(Arc::new(HostEngine::new()), 64, max)
    }

    #[test]
    fn test_acquire_reuses_idle_queue() {
        let pool = pool(4);
        let mask = CuMask::unrestricted();

        let q = pool.acquire(false, &mask, Priority::Normal).unwrap();
        pool.release(q);
        let _q = pool.acquire(false, &mask, Priority::Normal).unwrap();

        assert_eq!(pool.stats().queues, 1);
    }

    #[test]
    fn test_bucket_cap_multiplexes() {
        let pool = pool(2);
        let mask = CuMask::unrestricted();

        let refs: Vec<_> = (0..6)
            .map(|_| pool.acquire(false, &mask, Priority::Normal).unwrap())
            .collect();

        let stats = pool.stats();
        assert_eq!(stats.queues, 2);
        assert_eq!(stats.live_refs, 6);
        assert_eq!(stats.max_bucket_depth, 2);

        for r in refs {
            pool.release(r);
        }
        assert_eq!(pool.stats().live_refs, 0);
        // Queues are retained after release.
        assert_eq!(pool.stats().queues, 2);
    }

    #[test]
    fn test_priorities_get_distinct_buckets() {
        let pool = pool(4);
        let mask = CuMask::unrestricted();

        let _a = pool.acquire(false, &mask, Priority::Normal).unwrap();
        let _b = pool.acquire(false, &mask, Priority::High).unwrap();
        let _c = pool.acquire(true, &mask, Priority::Normal).unwrap();
        let _d = pool
            .acquire(false, &CuMask::from_words(&[0xf]), Priority::Normal)
            .unwrap();

        assert_eq!(pool.stats().buckets, 4);
    }

    #[test]
    fn test_hostcall_buffer_cached_per_queue() {
        let pool = pool(1);
        let mask = CuMask::unrestricted();

        let q = pool.acquire(false, &mask, Priority::Normal).unwrap();
        let a = pool.hostcall_buffer(&q).unwrap();
        let b = pool.hostcall_buffer(&q).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_bucket_depth_query() {
        let pool = pool(3);
        let mask = CuMask::from_words(&[0xff]);

        assert_eq!(pool.bucket_depth(false, &mask, Priority::Low), 0);
        let _a = pool.acquire(false, &mask, Priority::Low).unwrap();
        let _b = pool.acquire(false, &mask, Priority::Low).unwrap();
        assert_eq!(pool.bucket_depth(false, &mask, Priority::Low), 2);
    }
}
