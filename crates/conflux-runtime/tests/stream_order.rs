//! Stream lifecycle, ordering and synchronization behavior.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use conflux_core::{Priority, RuntimeConfig, RuntimeConfigBuilder, StreamError, StreamFlags, StreamHandle};
use conflux_runtime::Runtime;

fn runtime() -> Runtime {
    Runtime::new(RuntimeConfig::default()).unwrap()
}

/// Opens after `release` is called; tasks blocking on it keep a stream
/// busy deterministically.
fn gate() -> (Arc<AtomicBool>, impl Fn() + Send + Sync + Clone + 'static) {
    let flag = Arc::new(AtomicBool::new(false));
    let waiter = {
        let flag = Arc::clone(&flag);
        move || {
            while !flag.load(Ordering::Acquire) {
                thread::sleep(Duration::from_micros(100));
            }
        }
    };
    (flag, waiter)
}

#[test]
fn submissions_complete_in_order() {
    let rt = runtime();
    let stream = rt.stream_create(StreamFlags::Default).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    for i in 0..100u32 {
        let log = Arc::clone(&log);
        rt.enqueue(Some(stream), move || log.lock().unwrap().push(i))
            .unwrap();
    }
    rt.stream_synchronize(Some(stream)).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(*log, (0..100).collect::<Vec<_>>());
    rt.stream_destroy(stream).unwrap();
}

#[test]
fn query_reports_not_ready_until_drained() {
    let rt = runtime();
    let stream = rt.stream_create(StreamFlags::Default).unwrap();
    let (flag, waiter) = gate();

    rt.enqueue(Some(stream), waiter).unwrap();
    assert_eq!(
        rt.stream_query(Some(stream)).unwrap_err(),
        StreamError::NotReady
    );

    flag.store(true, Ordering::Release);
    rt.stream_synchronize(Some(stream)).unwrap();
    rt.stream_query(Some(stream)).unwrap();
    rt.stream_destroy(stream).unwrap();
}

#[test]
fn empty_stream_queries_as_complete() {
    let rt = runtime();
    let stream = rt.stream_create(StreamFlags::Default).unwrap();
    rt.stream_query(Some(stream)).unwrap();
    rt.stream_synchronize(Some(stream)).unwrap();
    rt.stream_destroy(stream).unwrap();
}

#[test]
fn streams_run_concurrently() {
    let rt = runtime();
    let a = rt.stream_create(StreamFlags::Default).unwrap();
    let b = rt.stream_create(StreamFlags::NonBlocking).unwrap();
    let (flag, waiter) = gate();

    // Stream a is blocked; stream b must still make progress.
    rt.enqueue(Some(a), waiter).unwrap();
    let done = Arc::new(AtomicBool::new(false));
    let done_task = Arc::clone(&done);
    rt.enqueue(Some(b), move || done_task.store(true, Ordering::Release))
        .unwrap();
    rt.stream_synchronize(Some(b)).unwrap();
    assert!(done.load(Ordering::Acquire));
    assert_eq!(rt.stream_query(Some(a)).unwrap_err(), StreamError::NotReady);

    flag.store(true, Ordering::Release);
    rt.stream_synchronize(Some(a)).unwrap();
    rt.stream_destroy(a).unwrap();
    rt.stream_destroy(b).unwrap();
}

#[test]
fn null_stream_synchronize_drains_device() {
    let rt = runtime();
    let stream = rt.stream_create(StreamFlags::Default).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let counter = Arc::clone(&counter);
        rt.enqueue(Some(stream), move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    }
    let counter_null = Arc::clone(&counter);
    rt.enqueue(None, move || {
        counter_null.fetch_add(1, Ordering::Relaxed);
    })
    .unwrap();

    rt.stream_synchronize(None).unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 11);
    rt.stream_destroy(stream).unwrap();
}

#[test]
fn callback_fires_between_surrounding_work() {
    let rt = runtime();
    let stream = rt.stream_create(StreamFlags::Default).unwrap();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let l = Arc::clone(&log);
    rt.enqueue(Some(stream), move || l.lock().unwrap().push("before"))
        .unwrap();
    let l = Arc::clone(&log);
    rt.stream_add_callback(
        Some(stream),
        move |status| {
            assert!(status.is_ok());
            l.lock().unwrap().push("callback");
        },
        0,
    )
    .unwrap();
    let l = Arc::clone(&log);
    rt.enqueue(Some(stream), move || l.lock().unwrap().push("after"))
        .unwrap();

    rt.stream_synchronize(Some(stream)).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["before", "callback", "after"]);
    rt.stream_destroy(stream).unwrap();
}

#[test]
fn callback_flags_are_reserved() {
    let rt = runtime();
    let stream = rt.stream_create(StreamFlags::Default).unwrap();
    let err = rt
        .stream_add_callback(Some(stream), |_| {}, 1)
        .unwrap_err();
    assert_eq!(
        err,
        StreamError::InvalidValue("callback flags are reserved and must be zero")
    );
    rt.stream_destroy(stream).unwrap();
}

#[test]
fn host_func_orders_like_a_callback() {
    let rt = runtime();
    let stream = rt.stream_create(StreamFlags::Default).unwrap();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let l = Arc::clone(&log);
    rt.enqueue(Some(stream), move || l.lock().unwrap().push("work"))
        .unwrap();
    let l = Arc::clone(&log);
    rt.launch_host_func(Some(stream), move || l.lock().unwrap().push("host"))
        .unwrap();

    rt.stream_synchronize(Some(stream)).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["work", "host"]);
    rt.stream_destroy(stream).unwrap();
}

#[test]
fn wait_event_orders_across_streams() {
    let rt = runtime();
    let producer = rt.stream_create(StreamFlags::Default).unwrap();
    let consumer = rt.stream_create(StreamFlags::Default).unwrap();
    let (flag, waiter) = gate();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    rt.enqueue(Some(producer), waiter).unwrap();
    let l = Arc::clone(&log);
    rt.enqueue(Some(producer), move || l.lock().unwrap().push("produced"))
        .unwrap();

    let event = rt.event_create();
    rt.event_record(event, Some(producer)).unwrap();
    rt.stream_wait_event(Some(consumer), event, 0).unwrap();
    let l = Arc::clone(&log);
    rt.enqueue(Some(consumer), move || l.lock().unwrap().push("consumed"))
        .unwrap();

    // Consumer is stalled behind the producer's gate.
    assert_eq!(
        rt.stream_query(Some(consumer)).unwrap_err(),
        StreamError::NotReady
    );

    flag.store(true, Ordering::Release);
    rt.stream_synchronize(Some(consumer)).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["produced", "consumed"]);

    rt.event_destroy(event).unwrap();
    rt.stream_destroy(producer).unwrap();
    rt.stream_destroy(consumer).unwrap();
}

#[test]
fn wait_event_nonzero_flags_rejected() {
    let rt = runtime();
    let stream = rt.stream_create(StreamFlags::Default).unwrap();
    let event = rt.event_create();
    rt.event_record(event, Some(stream)).unwrap();

    assert_eq!(
        rt.stream_wait_event(Some(stream), event, 0x4).unwrap_err(),
        StreamError::InvalidValue("wait flags must be zero")
    );
    rt.stream_destroy(stream).unwrap();
}

#[test]
fn wait_on_released_event_stream_is_noop() {
    let rt = runtime();
    let producer = rt.stream_create(StreamFlags::Default).unwrap();
    let consumer = rt.stream_create(StreamFlags::Default).unwrap();

    let event = rt.event_create();
    rt.event_record(event, Some(producer)).unwrap();
    rt.stream_synchronize(Some(producer)).unwrap();
    rt.stream_destroy(producer).unwrap();

    // The event's stream is gone, so it counts as complete.
    rt.stream_wait_event(Some(consumer), event, 0).unwrap();
    rt.stream_synchronize(Some(consumer)).unwrap();
    rt.stream_destroy(consumer).unwrap();
}

#[test]
fn event_query_and_synchronize() {
    let rt = runtime();
    let stream = rt.stream_create(StreamFlags::Default).unwrap();
    let (flag, waiter) = gate();

    let event = rt.event_create();
    // Unrecorded events report complete.
    rt.event_query(event).unwrap();

    rt.enqueue(Some(stream), waiter).unwrap();
    rt.event_record(event, Some(stream)).unwrap();
    assert_eq!(rt.event_query(event).unwrap_err(), StreamError::NotReady);

    flag.store(true, Ordering::Release);
    rt.event_synchronize(event).unwrap();
    rt.event_query(event).unwrap();

    rt.event_destroy(event).unwrap();
    assert_eq!(
        rt.event_destroy(event).unwrap_err(),
        StreamError::InvalidHandle("event")
    );
    rt.stream_destroy(stream).unwrap();
}

#[test]
fn stale_handles_are_detected() {
    let rt = runtime();
    let stream = rt.stream_create(StreamFlags::Default).unwrap();
    rt.stream_destroy(stream).unwrap();

    assert_eq!(
        rt.stream_synchronize(Some(stream)).unwrap_err(),
        StreamError::ContextIsDestroyed(stream.raw())
    );
    assert_eq!(
        rt.stream_flags(stream).unwrap_err(),
        StreamError::ContextIsDestroyed(stream.raw())
    );
    // A second destroy no longer finds the stream in any registry.
    assert_eq!(
        rt.stream_destroy(stream).unwrap_err(),
        StreamError::InvalidHandle("stream is not registered with any device")
    );
}

#[test]
fn stream_attribute_getters() {
    let rt = runtime();
    let stream = rt
        .stream_create_with_priority(StreamFlags::NonBlocking, -10)
        .unwrap();

    assert_eq!(rt.stream_flags(stream).unwrap(), StreamFlags::NonBlocking);
    // Out-of-range priorities clamp to the nearest bound.
    assert_eq!(rt.stream_priority(Some(stream)).unwrap(), Priority::High.raw());
    assert_eq!(rt.stream_priority(None).unwrap(), 0);
    assert_eq!(rt.stream_device(Some(stream)).unwrap(), 0);
    assert_eq!(rt.priority_range(), (1, -1));

    rt.stream_destroy(stream).unwrap();
}

#[test]
fn unknown_flag_bits_rejected() {
    let rt = runtime();
    assert_eq!(
        rt.stream_create_with_flags(0xdead).unwrap_err(),
        StreamError::InvalidValue("unknown stream flags")
    );
    let stream = rt.stream_create_with_flags(1).unwrap();
    assert_eq!(rt.stream_flags(stream).unwrap(), StreamFlags::NonBlocking);
    rt.stream_destroy(stream).unwrap();
}

#[test]
fn cu_mask_getter_combines_with_device_mask() {
    let rt = runtime();
    let masked = rt.stream_create_with_cu_mask(&[0x0f]).unwrap();

    assert_eq!(rt.stream_cu_mask(Some(masked)).unwrap().words(), &[0x0f]);
    // Null stream reports the all-CUs default of the software device.
    let default_mask = rt.stream_cu_mask(None).unwrap();
    assert_eq!(default_mask.enabled_count(), 64);

    assert_eq!(
        rt.stream_create_with_cu_mask(&[]).unwrap_err(),
        StreamError::InvalidValue("CU mask must not be empty")
    );
    rt.stream_destroy(masked).unwrap();
}

#[test]
fn per_thread_default_stream_is_lazy_and_thread_scoped() {
    let rt = runtime();
    let first = rt.per_thread_stream().unwrap();
    let second = rt.per_thread_stream().unwrap();
    assert_eq!(first, second);

    // The reserved token itself cannot be destroyed.
    assert_eq!(
        rt.stream_destroy(StreamHandle::PER_THREAD).unwrap_err(),
        StreamError::InvalidResourceHandle("the per-thread default stream cannot be destroyed")
    );

    // Another thread resolves a different stream.
    thread::scope(|scope| {
        let other = scope.spawn(|| rt.per_thread_stream().unwrap()).join().unwrap();
        assert_ne!(other, first);
    });

    // The token is usable anywhere a stream handle is.
    let counter = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&counter);
    rt.enqueue(Some(StreamHandle::PER_THREAD), move || {
        c.fetch_add(1, Ordering::Relaxed);
    })
    .unwrap();
    rt.stream_synchronize(Some(StreamHandle::PER_THREAD)).unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 1);
}

#[test]
fn concurrent_submissions_from_many_threads() {
    let rt = runtime();
    let stream = rt.stream_create(StreamFlags::Default).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    thread::scope(|scope| {
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            let rt = &rt;
            scope.spawn(move || {
                for _ in 0..50 {
                    let counter = Arc::clone(&counter);
                    rt.enqueue(Some(stream), move || {
                        counter.fetch_add(1, Ordering::Relaxed);
                    })
                    .unwrap();
                }
            });
        }
    });

    rt.stream_synchronize(Some(stream)).unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 200);
    rt.stream_destroy(stream).unwrap();
}

#[test]
fn second_device_hosts_independent_streams() {
    let rt = Runtime::new(RuntimeConfigBuilder::new().with_devices(2).build()).unwrap();
    assert_eq!(rt.device_count(), 2);

    rt.set_device(1).unwrap();
    let stream = rt.stream_create(StreamFlags::Default).unwrap();
    assert_eq!(rt.stream_device(Some(stream)).unwrap(), 1);
    assert_eq!(rt.current_device(), 1);

    rt.set_device(0).unwrap();
    // The stream keeps its device binding regardless of the selector.
    assert_eq!(rt.stream_device(Some(stream)).unwrap(), 1);
    assert_eq!(rt.set_device(5).unwrap_err(), StreamError::InvalidValue("device ordinal out of range"));

    rt.stream_destroy(stream).unwrap();
}

#[test]
fn kernel_launch_through_program_table() {
    use conflux_host::HostProgramTable;

    let rt = runtime();
    let stream = rt.stream_create(StreamFlags::Default).unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let table = HostProgramTable::new(1);
    let c = Arc::clone(&counter);
    table.register("bump", Arc::new(move || {
        c.fetch_add(1, Ordering::Relaxed);
    }));

    assert_eq!(
        rt.launch_kernel(Some(stream), "bump").unwrap_err(),
        StreamError::NoBinaryForGpu(0)
    );

    rt.set_program_lookup(Arc::new(table));
    rt.launch_kernel(Some(stream), "bump").unwrap();
    assert_eq!(
        rt.launch_kernel(Some(stream), "missing").unwrap_err(),
        StreamError::InvalidDeviceFunction("missing".to_string())
    );

    rt.stream_synchronize(Some(stream)).unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 1);
    rt.stream_destroy(stream).unwrap();
}
