//! The alarm engine
//!
//! One [`AlarmService`] owns the whole pipeline: the process-wide monitor
//! guarding the pending list and wake policy, the in-process deadline timer,
//! the wake-alarm callout, the expiration dispatcher thread, and the default
//! worker queue. Expirations flow timer → expiration signal → dispatcher →
//! worker queue → user callback.
//!
//! Lock order is monitor → alarm state → per-alarm callback lock. Callbacks
//! run with no service lock held except the alarm's own callback lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::alarm::{Alarm, AlarmCallback, AlarmInner, AlarmState};
use crate::clock::{BootClock, Timebase};
use crate::config::AlarmConfig;
use crate::constants::{DISPATCH_LATENCY_WARN_MS, TIMER_THREAD_NAME, WAKE_LOCK_ID};
use crate::error::{AlarmError, AlarmResult};
use crate::pending::PendingList;
use crate::queue::AlarmQueue;
use crate::signal::ExpirationSignal;
use crate::timer::DeadlineTimer;
use crate::wake::{SystemWakeControl, WakeControl};
use crate::worker::{QueueHandler, Worker};

static GLOBAL_SERVICE: OnceLock<AlarmService> = OnceLock::new();

/// State guarded by the service monitor.
pub(crate) struct Core {
    /// Armed alarms, earliest deadline first.
    pending: PendingList<Arc<AlarmInner>>,
    /// Whether the in-process timer is armed (and the wake lock held).
    timer_set: bool,
    /// Every live alarm created by this service.
    alarms: Vec<Weak<AlarmInner>>,
}

pub(crate) struct ServiceInner {
    core: Mutex<Core>,
    clock: Arc<dyn Timebase>,
    signal: ExpirationSignal,
    timer: DeadlineTimer,
    wake: Arc<dyn WakeControl>,
    wakelock_threshold_ms: AtomicU64,
    shutdown: AtomicBool,
    default_queue: AlarmQueue,
    default_worker: Mutex<Option<Worker>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Process-wide deferred-callback alarm service.
///
/// Schedules one-shot and periodic callbacks against a monotonic millisecond
/// clock. Short-horizon deadlines are serviced by an in-process timer while a
/// wake lock is held; long-horizon deadlines are delegated to the wake-alarm
/// callout so the host may suspend in between.
pub struct AlarmService {
    inner: Arc<ServiceInner>,
}

impl AlarmService {
    /// Create a service with the default configuration.
    pub fn new() -> AlarmResult<Self> {
        Self::with_config(AlarmConfig::default())
    }

    /// Create a service with an explicit configuration.
    pub fn with_config(config: AlarmConfig) -> AlarmResult<Self> {
        let clock: Arc<dyn Timebase> = Arc::new(BootClock::new());
        let wake: Arc<dyn WakeControl> = Arc::new(SystemWakeControl::new(clock.clone())?);
        Self::build(config, clock, wake)
    }

    /// Create a service with a platform-supplied wake-control integration.
    pub fn with_wake_control(
        config: AlarmConfig,
        wake: Arc<dyn WakeControl>,
    ) -> AlarmResult<Self> {
        let clock: Arc<dyn Timebase> = Arc::new(BootClock::new());
        Self::build(config, clock, wake)
    }

    /// The lazily-initialized process-global service.
    ///
    /// The first caller pays the initialization; losers of the init race tear
    /// their redundant instance back down. The global instance is never
    /// cleaned up.
    pub fn global() -> AlarmResult<&'static AlarmService> {
        if let Some(service) = GLOBAL_SERVICE.get() {
            return Ok(service);
        }
        let service = AlarmService::new()?;
        Ok(GLOBAL_SERVICE.get_or_init(|| service))
    }

    fn build(
        config: AlarmConfig,
        clock: Arc<dyn Timebase>,
        wake: Arc<dyn WakeControl>,
    ) -> AlarmResult<Self> {
        let timer = DeadlineTimer::spawn(TIMER_THREAD_NAME, clock.clone())?;
        let default_queue =
            AlarmQueue::with_capacity("alarm_default_queue", config.default_queue_capacity);

        let inner = Arc::new(ServiceInner {
            core: Mutex::new(Core {
                pending: PendingList::new(),
                timer_set: false,
                alarms: Vec::new(),
            }),
            clock,
            signal: ExpirationSignal::new(),
            timer,
            wake,
            wakelock_threshold_ms: AtomicU64::new(config.wakelock_threshold_ms),
            shutdown: AtomicBool::new(false),
            default_queue,
            default_worker: Mutex::new(None),
            dispatcher: Mutex::new(None),
        });
        let service = AlarmService { inner };

        let worker = Worker::spawn(&config.default_worker_name)?;
        service.register_processing_queue(&service.inner.default_queue.clone(), &worker)?;
        *service.inner.default_worker.lock() = Some(worker);

        let dispatcher_inner = service.inner.clone();
        let handle = thread::Builder::new()
            .name(config.dispatcher_thread_name.clone())
            .spawn(move || dispatcher_loop(dispatcher_inner))
            .map_err(|source| {
                error!(thread = %config.dispatcher_thread_name, %source, "dispatcher spawn failed");
                AlarmError::ThreadSpawn {
                    name: config.dispatcher_thread_name.clone(),
                    source,
                }
            })?;
        *service.inner.dispatcher.lock() = Some(handle);

        Ok(service)
    }

    /// Create a one-shot alarm.
    pub fn new_alarm(&self, name: &str) -> AlarmResult<Alarm> {
        self.create(name, false)
    }

    /// Create a periodic alarm.
    pub fn new_periodic(&self, name: &str) -> AlarmResult<Alarm> {
        self.create(name, true)
    }

    fn create(&self, name: &str, periodic: bool) -> AlarmResult<Alarm> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(AlarmError::ServiceShutdown);
        }
        let inner = AlarmInner::new(name, periodic, Arc::downgrade(&self.inner));
        self.inner.core.lock().alarms.push(Arc::downgrade(&inner));
        Ok(Alarm { inner })
    }

    /// The queue alarms land on when armed via [`Alarm::set`].
    pub fn default_queue(&self) -> AlarmQueue {
        self.inner.default_queue.clone()
    }

    /// Bind `queue` to `worker`: expirations enqueued on it will run their
    /// callbacks on that worker's thread.
    pub fn register_processing_queue(
        &self,
        queue: &AlarmQueue,
        worker: &Worker,
    ) -> AlarmResult<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(AlarmError::ServiceShutdown);
        }
        let mut slot = queue.shared.reactor.lock();
        if slot.as_ref().is_some_and(|w| w.upgrade().is_some()) {
            return Err(AlarmError::QueueAlreadyRegistered(queue.name().to_owned()));
        }

        let handler: QueueHandler = {
            let service = Arc::downgrade(&self.inner);
            let queue = queue.clone();
            Arc::new(move || {
                if let Some(service) = service.upgrade() {
                    service.process_queue(&queue);
                }
            })
        };

        let reactor = worker.reactor();
        let hook_reactor = Arc::downgrade(reactor);
        queue.shared.fifo.set_ready_hook(Arc::new(move || {
            if let Some(reactor) = hook_reactor.upgrade() {
                reactor.notify();
            }
        }));
        reactor.bind(queue.clone(), handler);
        *slot = Some(Arc::downgrade(reactor));
        debug!(queue = queue.name(), worker = worker.name(), "queue registered");
        Ok(())
    }

    /// Unbind `queue` from its worker and cancel every alarm bound to it.
    pub fn unregister_processing_queue(&self, queue: &AlarmQueue) {
        let mut core = self.inner.core.lock();
        let bound: Vec<Arc<AlarmInner>> = core
            .alarms
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|alarm| {
                alarm
                    .state
                    .lock()
                    .queue
                    .as_ref()
                    .is_some_and(|q| q.ptr_eq(queue))
            })
            .collect();
        for alarm in &bound {
            self.inner.cancel_locked(&mut core, alarm);
        }
        drop(core);

        queue.shared.fifo.clear_ready_hook();
        let reactor = queue.shared.reactor.lock().take();
        if let Some(reactor) = reactor.and_then(|weak| weak.upgrade()) {
            reactor.unbind(queue);
        }
        debug!(queue = queue.name(), canceled = bound.len(), "queue unregistered");
    }

    /// Shrink or restore the short-horizon threshold. Exists for test suites;
    /// production code must not call this.
    pub fn set_wakelock_threshold_ms(&self, threshold_ms: u64) {
        self.inner
            .wakelock_threshold_ms
            .store(threshold_ms, Ordering::Relaxed);
    }

    /// Render a per-alarm statistics report.
    pub fn debug_dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let core = self.inner.core.lock();
        let now_ms = self.inner.clock.now_ms();
        writeln!(out, "=== alarm service dump (now={} ms) ===", now_ms)?;
        writeln!(out, "pending: {}", core.pending.len())?;
        for alarm in core.alarms.iter().filter_map(Weak::upgrade) {
            let (armed, period_ms, remaining_ms) = {
                let state = alarm.state.lock();
                (
                    state.callback.is_some(),
                    state.period_ms,
                    state.deadline_ms.saturating_sub(now_ms),
                )
            };
            let stats = alarm.stats.lock().clone();
            writeln!(
                out,
                "alarm \"{}\" ({})",
                alarm.name,
                if alarm.periodic { "periodic" } else { "one-shot" }
            )?;
            writeln!(
                out,
                "  armed: {}  period_ms: {}  remaining_ms: {}",
                armed, period_ms, remaining_ms
            )?;
            writeln!(
                out,
                "  scheduled: {}  canceled: {}  rescheduled: {}  updates: {}",
                stats.scheduled_count,
                stats.canceled_count,
                stats.rescheduled_count,
                stats.total_updates
            )?;
            for (label, stat) in [
                ("callback_execution", stats.callback_execution),
                ("overdue_scheduling", stats.overdue_scheduling),
                ("premature_scheduling", stats.premature_scheduling),
            ] {
                writeln!(
                    out,
                    "  {}: count={} total_ms={} max_ms={} avg_ms={:.1}",
                    label,
                    stat.count,
                    stat.total_ms,
                    stat.max_ms,
                    stat.average_ms()
                )?;
            }
        }
        Ok(())
    }

    /// Tear the service down: stop the dispatcher, detach and stop the
    /// default worker, stop the timer, release a held wake lock, and drop all
    /// pending state. Idempotent; also runs on drop.
    pub fn cleanup(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("alarm service cleanup");

        // Unblock and join the dispatcher.
        self.inner.signal.post();
        let dispatcher = self.inner.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            let _ = handle.join();
        }

        // Detach the default queue and stop its worker.
        self.inner.default_queue.shared.fifo.clear_ready_hook();
        let reactor = self.inner.default_queue.shared.reactor.lock().take();
        if let Some(reactor) = reactor.and_then(|weak| weak.upgrade()) {
            reactor.unbind(&self.inner.default_queue);
        }
        let worker = self.inner.default_worker.lock().take();
        if let Some(worker) = worker {
            worker.shutdown();
        }
        while self.inner.default_queue.shared.fifo.try_dequeue().is_some() {}

        self.inner.timer.shutdown();

        let mut core = self.inner.core.lock();
        if core.timer_set {
            if !self.inner.wake.release_wake_lock(WAKE_LOCK_ID) {
                warn!("wake lock release failed during cleanup");
            }
            core.timer_set = false;
        }
        for (_, alarm) in core.pending.iter() {
            let mut state = alarm.state.lock();
            state.callback = None;
            state.deadline_ms = 0;
            alarm.scheduled.store(false, Ordering::Release);
        }
        core.pending.clear();
        core.alarms.clear();
    }
}

impl Drop for AlarmService {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl ServiceInner {
    pub(crate) fn default_queue(&self) -> AlarmQueue {
        self.default_queue.clone()
    }

    /// Arm `alarm` on `queue`. Implicitly reschedules an armed alarm.
    pub(crate) fn set_on_queue(
        &self,
        alarm: &Arc<AlarmInner>,
        interval_ms: u64,
        queue: &AlarmQueue,
        callback: AlarmCallback,
    ) -> AlarmResult<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(AlarmError::ServiceShutdown);
        }
        let mut core = self.core.lock();
        let mut state = alarm.state.lock();
        state.creation_time_ms = self.clock.now_ms();
        state.period_ms = interval_ms;
        state.queue = Some(queue.clone());
        state.callback = Some(callback);
        self.schedule_next_instance(&mut core, alarm, &mut state);
        alarm.stats.lock().scheduled_count += 1;
        debug!(alarm = %alarm.name, interval_ms, deadline_ms = state.deadline_ms, "alarm set");
        Ok(())
    }

    /// Disarm `alarm`; with `drain`, additionally wait out an in-flight
    /// callback before returning.
    pub(crate) fn cancel_alarm(&self, alarm: &Arc<AlarmInner>, drain: bool) {
        {
            let mut core = self.core.lock();
            self.cancel_locked(&mut core, alarm);
        }
        if drain {
            // Acquire-and-release: once this succeeds, no callback for this
            // alarm is running anywhere. Re-entrant, so a self-cancel from
            // inside the callback passes straight through.
            let _guard = alarm.callback_lock.lock();
        }
    }

    fn cancel_locked(&self, core: &mut Core, alarm: &Arc<AlarmInner>) {
        let mut state = alarm.state.lock();
        if state.callback.is_none() {
            return;
        }
        let was_front = core
            .pending
            .front_matches(|front| Arc::ptr_eq(front, alarm));
        core.pending.remove_where(|entry| Arc::ptr_eq(entry, alarm));
        if let Some(queue) = state.queue.clone() {
            queue.shared.fifo.remove_where(|entry| Arc::ptr_eq(entry, alarm));
        }
        state.callback = None;
        state.deadline_ms = 0;
        alarm.scheduled.store(false, Ordering::Release);
        alarm.stats.lock().canceled_count += 1;
        if was_front {
            self.reschedule_root_alarm(core);
        }
        debug!(alarm = %alarm.name, "alarm canceled");
    }

    /// Cancel, then drop the record from the registry. Backs `Alarm`'s drop.
    pub(crate) fn free_alarm(&self, alarm: &Arc<AlarmInner>) {
        self.cancel_alarm(alarm, true);
        let mut core = self.core.lock();
        core.alarms
            .retain(|weak| weak.upgrade().is_some_and(|a| !Arc::ptr_eq(&a, alarm)));
    }

    pub(crate) fn remaining_ms(&self, alarm: &Arc<AlarmInner>) -> u64 {
        let _core = self.core.lock();
        let deadline_ms = alarm.state.lock().deadline_ms;
        deadline_ms.saturating_sub(self.clock.now_ms())
    }

    /// Compute the next deadline and insert into the pending list.
    ///
    /// Periodic deadlines are anchored to `creation_time + k * period`, so a
    /// late callback does not push subsequent firings later.
    fn schedule_next_instance(
        &self,
        core: &mut Core,
        alarm: &Arc<AlarmInner>,
        state: &mut AlarmState,
    ) {
        let was_front = core
            .pending
            .front_matches(|front| Arc::ptr_eq(front, alarm));

        // An implicit reschedule drains the previous instance and any stale
        // copy already posted to the worker queue.
        core.pending.remove_where(|entry| Arc::ptr_eq(entry, alarm));
        if let Some(queue) = state.queue.clone() {
            queue.shared.fifo.remove_where(|entry| Arc::ptr_eq(entry, alarm));
        }

        let now_ms = self.clock.now_ms();
        let ms_into_period = if alarm.periodic && state.period_ms > 0 {
            (now_ms - state.creation_time_ms) % state.period_ms
        } else {
            0
        };
        state.deadline_ms = now_ms + (state.period_ms - ms_into_period);

        core.pending.insert(state.deadline_ms, alarm.clone());
        alarm.scheduled.store(true, Ordering::Release);

        if was_front
            || core
                .pending
                .front_matches(|front| Arc::ptr_eq(front, alarm))
        {
            self.reschedule_root_alarm(core);
        }
    }

    /// Re-evaluate the wake policy against the front of the pending list.
    fn reschedule_root_alarm(&self, core: &mut Core) {
        // Arming zero disarms.
        self.timer.disarm();

        let Some((deadline_ms, _)) = core.pending.front() else {
            if core.timer_set {
                if !self.wake.release_wake_lock(WAKE_LOCK_ID) {
                    warn!("wake lock release failed");
                }
                core.timer_set = false;
            }
            return;
        };

        let now_ms = self.clock.now_ms();
        let delta_ms = deadline_ms.saturating_sub(now_ms);
        let threshold_ms = self.wakelock_threshold_ms.load(Ordering::Relaxed);

        if delta_ms < threshold_ms {
            // Short horizon: keep the system awake and let the in-process
            // timer hit the absolute deadline.
            if !core.timer_set {
                if !self.wake.acquire_wake_lock(WAKE_LOCK_ID) {
                    warn!("wake lock acquire failed; alarm may fire late across suspend");
                }
                core.timer_set = true;
            }
            let poster = self.signal.poster();
            self.timer.arm(deadline_ms, Arc::new(move || poster.post()));
            // The deadline may have elapsed while arming, leaving the timer
            // fired-and-disarmed with its notification already consumed by a
            // previous cycle. Post directly; the dispatcher re-validates the
            // front, so a double post is harmless.
            if !self.timer.is_armed() {
                self.signal.post();
            }
        } else {
            // Long horizon: let the system suspend; the wake alarm brings it
            // back.
            let poster = self.signal.poster();
            if !self
                .wake
                .set_wake_alarm(delta_ms, true, Arc::new(move || poster.post()))
            {
                warn!(delta_ms, "wake-alarm callout refused; alarm fires when next awake");
            }
            if core.timer_set {
                if !self.wake.release_wake_lock(WAKE_LOCK_ID) {
                    warn!("wake lock release failed");
                }
                core.timer_set = false;
            }
        }
    }

    /// Dispatcher body: validate the front, pop one due alarm, re-anchor a
    /// periodic one, re-arm the wake policy, then hand off to the worker.
    fn dispatch_expired(&self) {
        let mut core = self.core.lock();
        let now_ms = self.clock.now_ms();
        let front_due = core
            .pending
            .front()
            .map(|(deadline_ms, _)| deadline_ms <= now_ms)
            .unwrap_or(false);
        if !front_due {
            self.reschedule_root_alarm(&mut core);
            return;
        }
        let Some((_, alarm)) = core.pending.pop_front() else {
            return;
        };

        let mut state = alarm.state.lock();
        if alarm.periodic {
            state.prev_deadline_ms = state.deadline_ms;
            self.schedule_next_instance(&mut core, &alarm, &mut state);
            alarm.stats.lock().rescheduled_count += 1;
        }
        // Re-arm before the hand-off so later alarms become eligible
        // independent of this callback's latency.
        self.reschedule_root_alarm(&mut core);
        let queue = state.queue.clone();
        drop(state);
        if let Some(queue) = queue {
            queue.shared.fifo.enqueue(alarm);
        }
    }

    /// Queue handler, run on the worker thread that owns `queue`.
    fn process_queue(&self, queue: &AlarmQueue) {
        let core = self.core.lock();
        // Gone again already: the alarm was canceled between the ready
        // notification and this dequeue.
        let Some(alarm) = queue.shared.fifo.try_dequeue() else {
            return;
        };

        let (callback, effective_deadline_ms) = {
            let mut state = alarm.state.lock();
            let Some(callback) = state.callback.clone() else {
                return;
            };
            // Jitter is measured against the deadline this firing was meant
            // for, not the re-anchored next one.
            let effective_deadline_ms = if alarm.periodic {
                state.prev_deadline_ms
            } else {
                state.deadline_ms
            };
            if !alarm.periodic {
                state.callback = None;
                state.deadline_ms = 0;
                alarm.scheduled.store(false, Ordering::Release);
            }
            (callback, effective_deadline_ms)
        };

        // Take the callback lock before releasing the monitor: a cancel that
        // misses the queue entry must block until this invocation finishes.
        let callback_guard = alarm.callback_lock.lock();
        drop(core);

        let started_ms = self.clock.now_ms();
        callback();
        let finished_ms = self.clock.now_ms();

        let jitter_ms = started_ms as i64 - effective_deadline_ms as i64;
        if jitter_ms > DISPATCH_LATENCY_WARN_MS as i64 {
            warn!(alarm = %alarm.name, late_ms = jitter_ms, "callback dispatched well past its deadline");
        }
        alarm
            .stats
            .lock()
            .record_invocation(finished_ms - started_ms, jitter_ms);
        drop(callback_guard);
    }
}

fn dispatcher_loop(inner: Arc<ServiceInner>) {
    debug!("dispatcher started");
    loop {
        inner.signal.wait();
        if inner.shutdown.load(Ordering::Acquire) {
            debug!("dispatcher exiting");
            return;
        }
        inner.dispatch_expired();
    }
}
