//! Worker-queue registration and dispatch-thread behavior
//!
//! Covers binding queues to workers, the one-worker-per-queue serial
//! execution guarantee, unregistration semantics, and service teardown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use wakealarm::{AlarmError, AlarmQueue, AlarmService, Worker};

fn wait_until(pred: impl Fn() -> bool, limit: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if pred() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    pred()
}

fn service() -> AlarmService {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
    AlarmService::new().expect("service")
}

#[test]
fn test_callback_runs_on_the_registered_worker_thread() {
    let service = service();
    let worker = Worker::spawn("hci_worker").expect("worker");
    let queue = AlarmQueue::new("hci_queue");
    service
        .register_processing_queue(&queue, &worker)
        .expect("register");

    let seen_thread = Arc::new(Mutex::new(None));
    let alarm = service.new_alarm("routed").expect("alarm");
    let recorder = seen_thread.clone();
    alarm
        .set_on_queue(30, &queue, move || {
            *recorder.lock() = thread::current().name().map(str::to_owned);
        })
        .expect("set");

    assert!(wait_until(
        || seen_thread.lock().is_some(),
        Duration::from_secs(3)
    ));
    assert_eq!(seen_thread.lock().as_deref(), Some("hci_worker"));

    service.unregister_processing_queue(&queue);
    worker.shutdown();
}

#[test]
fn test_same_queue_callbacks_run_serially_in_order() {
    let service = service();
    let worker = Worker::spawn("serial_worker").expect("worker");
    let queue = AlarmQueue::new("serial_queue");
    service
        .register_processing_queue(&queue, &worker)
        .expect("register");

    let spans = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();

    let first = service.new_alarm("first").expect("alarm");
    let log = spans.clone();
    first
        .set_on_queue(40, &queue, move || {
            let begin = start.elapsed().as_millis() as u64;
            thread::sleep(Duration::from_millis(100));
            log.lock().push(("first", begin, start.elapsed().as_millis() as u64));
        })
        .expect("set first");

    let second = service.new_alarm("second").expect("alarm");
    let log = spans.clone();
    second
        .set_on_queue(40, &queue, move || {
            let begin = start.elapsed().as_millis() as u64;
            log.lock().push(("second", begin, start.elapsed().as_millis() as u64));
        })
        .expect("set second");

    assert!(wait_until(|| spans.lock().len() == 2, Duration::from_secs(3)));
    let spans = spans.lock().clone();
    assert_eq!(spans[0].0, "first");
    assert_eq!(spans[1].0, "second");
    // The second callback starts only after the first one ends.
    assert!(
        spans[1].1 >= spans[0].2,
        "callbacks overlapped on one queue: {:?}",
        spans
    );

    service.unregister_processing_queue(&queue);
    worker.shutdown();
}

#[test]
fn test_one_worker_can_drain_multiple_queues() {
    let service = service();
    let worker = Worker::spawn("shared_worker").expect("worker");
    let queue_a = AlarmQueue::new("queue_a");
    let queue_b = AlarmQueue::new("queue_b");
    service
        .register_processing_queue(&queue_a, &worker)
        .expect("register a");
    service
        .register_processing_queue(&queue_b, &worker)
        .expect("register b");

    let fired = Arc::new(AtomicUsize::new(0));
    let a = service.new_alarm("a").expect("alarm");
    let counter = fired.clone();
    a.set_on_queue(30, &queue_a, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .expect("set a");
    let b = service.new_alarm("b").expect("alarm");
    let counter = fired.clone();
    b.set_on_queue(40, &queue_b, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .expect("set b");

    assert!(wait_until(
        || fired.load(Ordering::SeqCst) == 2,
        Duration::from_secs(3)
    ));

    service.unregister_processing_queue(&queue_a);
    service.unregister_processing_queue(&queue_b);
    worker.shutdown();
}

#[test]
fn test_registering_a_bound_queue_fails() {
    let service = service();
    let worker_one = Worker::spawn("worker_one").expect("worker");
    let worker_two = Worker::spawn("worker_two").expect("worker");
    let queue = AlarmQueue::new("contested");

    service
        .register_processing_queue(&queue, &worker_one)
        .expect("first register");
    assert!(matches!(
        service.register_processing_queue(&queue, &worker_two),
        Err(AlarmError::QueueAlreadyRegistered(_))
    ));

    service.unregister_processing_queue(&queue);
    worker_one.shutdown();
    worker_two.shutdown();
}

#[test]
fn test_unregister_cancels_alarms_bound_to_the_queue() {
    let service = service();
    let worker = Worker::spawn("doomed_worker").expect("worker");
    let queue = AlarmQueue::new("doomed_queue");
    service
        .register_processing_queue(&queue, &worker)
        .expect("register");

    let bound = service.new_alarm("bound").expect("alarm");
    bound.set_on_queue(10_000, &queue, || {}).expect("set bound");
    let unrelated = service.new_alarm("unrelated").expect("alarm");
    unrelated.set(10_000, || {}).expect("set unrelated");

    service.unregister_processing_queue(&queue);

    assert!(!bound.is_scheduled());
    assert_eq!(bound.stats().canceled_count, 1);
    assert!(unrelated.is_scheduled());

    unrelated.cancel();
    worker.shutdown();
}

#[test]
fn test_requeue_after_unregister_register_cycle() {
    let service = service();
    let worker = Worker::spawn("cycled_worker").expect("worker");
    let queue = AlarmQueue::new("cycled_queue");

    service
        .register_processing_queue(&queue, &worker)
        .expect("register");
    service.unregister_processing_queue(&queue);
    service
        .register_processing_queue(&queue, &worker)
        .expect("re-register");

    let fired = Arc::new(AtomicUsize::new(0));
    let alarm = service.new_alarm("revived").expect("alarm");
    let counter = fired.clone();
    alarm
        .set_on_queue(30, &queue, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("set");

    assert!(wait_until(
        || fired.load(Ordering::SeqCst) == 1,
        Duration::from_secs(3)
    ));

    service.unregister_processing_queue(&queue);
    worker.shutdown();
}

#[test]
fn test_debug_dump_reports_alarm_state() {
    let service = service();
    let alarm = service.new_periodic("dumped").expect("alarm");
    alarm.set(5_000, || {}).expect("set");

    let mut report = String::new();
    service.debug_dump(&mut report).expect("dump");

    assert!(report.contains("alarm \"dumped\" (periodic)"));
    assert!(report.contains("scheduled: 1"));
    assert!(report.contains("pending: 1"));

    alarm.cancel();
}

#[test]
fn test_cleanup_is_idempotent_and_stops_dispatch() {
    let service = service();
    let fired = Arc::new(AtomicUsize::new(0));
    let alarm = service.new_alarm("orphan").expect("alarm");
    let counter = fired.clone();
    alarm
        .set(100, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("set");

    service.cleanup();
    service.cleanup();

    thread::sleep(Duration::from_millis(250));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(!alarm.is_scheduled());
}

#[test]
fn test_dropping_the_service_tears_it_down() {
    let fired = Arc::new(AtomicUsize::new(0));
    let alarm = {
        let service = service();
        let alarm = service.new_alarm("outlives").expect("alarm");
        let counter = fired.clone();
        alarm
            .set(80, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("set");
        alarm
        // Service drops here; cleanup joins its threads.
    };

    thread::sleep(Duration::from_millis(200));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    drop(alarm);
}
