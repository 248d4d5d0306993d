//! Alarm records and handles
//!
//! An [`Alarm`] is an owning handle: dropping it cancels the alarm, drains
//! any in-flight callback, and releases the record. [`AlarmHandle`] is a
//! non-owning clone for use from inside the alarm's own callback, where a
//! self-cancel must not transfer ownership into the closure.
//!
//! Scheduling fields live behind the service monitor; the per-alarm
//! `callback_lock` is re-entrant and is held for exactly the duration of each
//! callback invocation, which is what gives `cancel` its "no callback running
//! on return" guarantee.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};

use crate::error::{AlarmError, AlarmResult};
use crate::queue::AlarmQueue;
use crate::service::ServiceInner;
use crate::stats::AlarmStats;

/// User callback. The closure captures its own data; it is invoked on the
/// worker thread of the queue supplied at schedule time.
pub(crate) type AlarmCallback = Arc<dyn Fn() + Send + Sync>;

/// Mutable scheduling state. Only mutated while the service monitor is held.
#[derive(Default)]
pub(crate) struct AlarmState {
    /// Monotonic timestamp of the most recent arming; anchors periodic cadence.
    pub(crate) creation_time_ms: u64,
    /// Interval for periodic alarms; delay-from-now for one-shots.
    pub(crate) period_ms: u64,
    /// Absolute deadline of the next firing; 0 when not armed.
    pub(crate) deadline_ms: u64,
    /// Deadline of the firing currently being dispatched (periodic only).
    pub(crate) prev_deadline_ms: u64,
    /// Worker queue that will run the callback.
    pub(crate) queue: Option<AlarmQueue>,
    /// Armed iff present.
    pub(crate) callback: Option<AlarmCallback>,
}

pub(crate) struct AlarmInner {
    pub(crate) name: String,
    pub(crate) periodic: bool,
    /// Mirrors `state.callback.is_some()` for lock-free `is_scheduled`.
    pub(crate) scheduled: AtomicBool,
    pub(crate) state: Mutex<AlarmState>,
    /// Held across each callback invocation. Re-entrant so a callback may
    /// cancel its own alarm without self-deadlock.
    pub(crate) callback_lock: ReentrantMutex<()>,
    pub(crate) stats: Mutex<AlarmStats>,
    pub(crate) service: Weak<ServiceInner>,
}

impl AlarmInner {
    pub(crate) fn new(name: &str, periodic: bool, service: Weak<ServiceInner>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            periodic,
            scheduled: AtomicBool::new(false),
            state: Mutex::new(AlarmState::default()),
            callback_lock: ReentrantMutex::new(()),
            stats: Mutex::new(AlarmStats::default()),
            service,
        })
    }

    #[cfg(test)]
    pub(crate) fn detached(name: &str) -> Arc<Self> {
        Self::new(name, false, Weak::new())
    }
}

/// Owning handle for one alarm.
///
/// Created by [`AlarmService::new_alarm`](crate::AlarmService::new_alarm) or
/// [`AlarmService::new_periodic`](crate::AlarmService::new_periodic).
/// Dropping the handle cancels the alarm and waits out any in-flight
/// callback.
pub struct Alarm {
    pub(crate) inner: Arc<AlarmInner>,
}

impl Alarm {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_periodic(&self) -> bool {
        self.inner.periodic
    }

    /// Arm the alarm on the service's default queue.
    ///
    /// For a one-shot alarm `interval_ms` is the delay from now; for a
    /// periodic alarm it is the period, anchored at this call. Re-arming an
    /// already-armed alarm reschedules it.
    pub fn set(&self, interval_ms: u64, callback: impl Fn() + Send + Sync + 'static) -> AlarmResult<()> {
        let service = self.service()?;
        let queue = service.default_queue();
        service.set_on_queue(&self.inner, interval_ms, &queue, Arc::new(callback))
    }

    /// Arm the alarm on a specific queue.
    pub fn set_on_queue(
        &self,
        interval_ms: u64,
        queue: &AlarmQueue,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> AlarmResult<()> {
        let service = self.service()?;
        service.set_on_queue(&self.inner, interval_ms, queue, Arc::new(callback))
    }

    /// Disarm the alarm.
    ///
    /// On return the alarm will not fire again until re-armed, and no
    /// callback for it is running on any thread. Idempotent, and legal from
    /// inside the alarm's own callback.
    pub fn cancel(&self) {
        if let Some(service) = self.inner.service.upgrade() {
            service.cancel_alarm(&self.inner, true);
        }
    }

    /// Best-effort armed check without taking any lock.
    pub fn is_scheduled(&self) -> bool {
        self.inner.scheduled.load(Ordering::Acquire)
    }

    /// Milliseconds until the next firing, or 0 if not armed.
    pub fn remaining_ms(&self) -> u64 {
        self.inner
            .service
            .upgrade()
            .map_or(0, |service| service.remaining_ms(&self.inner))
    }

    /// Snapshot of this alarm's statistics.
    pub fn stats(&self) -> AlarmStats {
        self.inner.stats.lock().clone()
    }

    /// A non-owning handle, safe to capture in the alarm's own callback.
    pub fn handle(&self) -> AlarmHandle {
        AlarmHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn service(&self) -> AlarmResult<Arc<ServiceInner>> {
        self.inner
            .service
            .upgrade()
            .ok_or(AlarmError::ServiceShutdown)
    }
}

impl Drop for Alarm {
    fn drop(&mut self) {
        if let Some(service) = self.inner.service.upgrade() {
            service.free_alarm(&self.inner);
        }
    }
}

impl std::fmt::Debug for Alarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Alarm")
            .field("name", &self.inner.name)
            .field("periodic", &self.inner.periodic)
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}

/// Non-owning, cloneable alarm handle.
///
/// All operations become no-ops once the owning [`Alarm`] is dropped.
#[derive(Clone)]
pub struct AlarmHandle {
    inner: Weak<AlarmInner>,
}

impl AlarmHandle {
    /// Cancel the alarm; see [`Alarm::cancel`].
    pub fn cancel(&self) {
        if let Some(inner) = self.inner.upgrade() {
            if let Some(service) = inner.service.upgrade() {
                service.cancel_alarm(&inner, true);
            }
        }
    }

    /// Best-effort armed check; false once the owner is gone.
    pub fn is_scheduled(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.scheduled.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_alarm_defaults() {
        let inner = AlarmInner::detached("idle");
        let state = inner.state.lock();
        assert_eq!(state.deadline_ms, 0);
        assert!(state.callback.is_none());
        assert!(!inner.scheduled.load(Ordering::Acquire));
    }

    #[test]
    fn test_handle_outliving_owner_is_inert() {
        let handle = {
            let inner = AlarmInner::detached("gone");
            AlarmHandle {
                inner: Arc::downgrade(&inner),
            }
        };
        assert!(!handle.is_scheduled());
        handle.cancel();
    }

    #[test]
    fn test_callback_lock_is_reentrant() {
        let inner = AlarmInner::detached("nested");
        let outer = inner.callback_lock.lock();
        let inner_guard = inner.callback_lock.lock();
        drop(inner_guard);
        drop(outer);
    }
}
