//! Queue-pool bounds and signal recycling under stream churn.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use conflux_core::{Priority, CuMask, RuntimeConfigBuilder, StreamFlags};
use conflux_runtime::Runtime;

#[test]
fn queue_count_is_bounded_per_bucket() {
    let rt = Runtime::new(
        RuntimeConfigBuilder::new()
            .with_max_queues_per_bucket(2)
            .build(),
    )
    .unwrap();
    let device = rt.device(0).unwrap();

    // Many more streams than the cap, all with the same placement key.
    let streams: Vec<_> = (0..12)
        .map(|_| rt.stream_create(StreamFlags::Default).unwrap())
        .collect();

    assert_eq!(
        device.queue_bucket_depth(&CuMask::unrestricted(), Priority::Normal),
        2
    );
    let stats = device.queue_pool_stats();
    assert_eq!(stats.queues, 2);
    assert_eq!(stats.live_refs, 12);
    assert!(stats.max_bucket_depth <= 2);

    // Multiplexed streams still execute and stay ordered.
    let counter = Arc::new(AtomicUsize::new(0));
    for stream in &streams {
        let counter = Arc::clone(&counter);
        rt.enqueue(Some(*stream), move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    }
    for stream in &streams {
        rt.stream_synchronize(Some(*stream)).unwrap();
    }
    assert_eq!(counter.load(Ordering::Relaxed), 12);

    for stream in streams {
        rt.stream_destroy(stream).unwrap();
    }
    // Shares return but queues are intentionally retained.
    let stats = device.queue_pool_stats();
    assert_eq!(stats.live_refs, 0);
    assert_eq!(stats.queues, 2);
}

#[test]
fn distinct_placement_keys_use_distinct_buckets() {
    let rt = Runtime::new(
        RuntimeConfigBuilder::new()
            .with_max_queues_per_bucket(1)
            .build(),
    )
    .unwrap();
    let device = rt.device(0).unwrap();

    let normal = rt.stream_create(StreamFlags::Default).unwrap();
    let high = rt
        .stream_create_with_priority(StreamFlags::Default, -1)
        .unwrap();
    let masked = rt.stream_create_with_cu_mask(&[0x3]).unwrap();

    let stats = device.queue_pool_stats();
    assert_eq!(stats.buckets, 3);
    assert_eq!(stats.queues, 3);
    assert_eq!(
        device.queue_bucket_depth(&CuMask::from_words(&[0x3]), Priority::Normal),
        1
    );

    rt.stream_destroy(normal).unwrap();
    rt.stream_destroy(high).unwrap();
    rt.stream_destroy(masked).unwrap();
}

#[test]
fn destroyed_streams_return_their_queue_share() {
    let rt = Runtime::new(
        RuntimeConfigBuilder::new()
            .with_max_queues_per_bucket(1)
            .build(),
    )
    .unwrap();
    let device = rt.device(0).unwrap();

    for _ in 0..8 {
        let stream = rt.stream_create(StreamFlags::Default).unwrap();
        rt.enqueue(Some(stream), || {}).unwrap();
        rt.stream_synchronize(Some(stream)).unwrap();
        rt.stream_destroy(stream).unwrap();
    }

    let stats = device.queue_pool_stats();
    assert_eq!(stats.queues, 1);
    assert_eq!(stats.live_refs, 0);
}

#[test]
fn signals_are_recycled_across_submissions() {
    let rt = Runtime::new(RuntimeConfigBuilder::new().with_signal_pool_seed(4).build()).unwrap();
    let device = rt.device(0).unwrap();
    let stream = rt.stream_create(StreamFlags::Default).unwrap();

    for _ in 0..200 {
        rt.enqueue(Some(stream), || {}).unwrap();
        rt.stream_synchronize(Some(stream)).unwrap();
    }

    // Steady-state submission cycles through pooled signals instead of
    // creating one per command.
    let stats = device.signal_pool_stats();
    assert!(
        stats.created <= 8,
        "expected pooled signals, created {}",
        stats.created
    );

    rt.stream_destroy(stream).unwrap();
}

#[test]
fn devices_pool_queues_independently() {
    let rt = Runtime::new(
        RuntimeConfigBuilder::new()
            .with_devices(2)
            .with_max_queues_per_bucket(1)
            .build(),
    )
    .unwrap();

    let d0 = rt.stream_create(StreamFlags::Default).unwrap();
    rt.set_device(1).unwrap();
    let d1 = rt.stream_create(StreamFlags::Default).unwrap();

    assert_eq!(rt.device(0).unwrap().queue_pool_stats().queues, 1);
    assert_eq!(rt.device(1).unwrap().queue_pool_stats().queues, 1);
    assert_eq!(rt.stream_device(Some(d0)).unwrap(), 0);
    assert_eq!(rt.stream_device(Some(d1)).unwrap(), 1);

    rt.stream_destroy(d0).unwrap();
    rt.stream_destroy(d1).unwrap();
}
