//! Wake-lock and wake-alarm callout
//!
//! The wake policy needs two platform services: a wake lock that keeps the
//! system running while a short-horizon deadline is armed, and a wake alarm
//! that can bring the system out of suspend for a long-horizon deadline.
//! Both are reached through the [`WakeControl`] trait so platforms (and test
//! suites) can supply their own integration.
//!
//! Failures from either side are reported, not propagated: scheduling
//! continues and the alarm degrades to firing when the system is next awake.

use std::sync::Arc;

use tracing::debug;

use crate::clock::Timebase;
use crate::constants::WAKE_TIMER_THREAD_NAME;
use crate::error::AlarmResult;
use crate::timer::DeadlineTimer;

/// Invoked when a scheduled wake alarm expires.
pub type WakeAlarmCallback = Arc<dyn Fn() + Send + Sync>;

/// Platform callout for suspend-aware scheduling.
pub trait WakeControl: Send + Sync {
    /// Schedule a wake alarm `delay_ms` from now. `should_wake` asks for a
    /// wake-capable alarm (one that brings the system out of suspend).
    /// Returns false if the platform refuses; the caller logs and continues.
    fn set_wake_alarm(&self, delay_ms: u64, should_wake: bool, callback: WakeAlarmCallback)
        -> bool;

    /// Acquire the named wake lock. Returns false on failure.
    fn acquire_wake_lock(&self, lock_name: &str) -> bool;

    /// Release the named wake lock. Returns false on failure.
    fn release_wake_lock(&self, lock_name: &str) -> bool;
}

/// Default callout for hosts without suspend control.
///
/// Wake locks succeed as no-ops (an ordinary process cannot veto suspend
/// portably), and the wake alarm is an in-process deadline timer on the same
/// timebase as the rest of the service. On a platform that actually
/// suspends, replace this with a real integration via
/// [`AlarmService::with_wake_control`](crate::AlarmService::with_wake_control).
pub struct SystemWakeControl {
    clock: Arc<dyn Timebase>,
    timer: DeadlineTimer,
}

impl SystemWakeControl {
    pub fn new(clock: Arc<dyn Timebase>) -> AlarmResult<Self> {
        let timer = DeadlineTimer::spawn(WAKE_TIMER_THREAD_NAME, clock.clone())?;
        Ok(Self { clock, timer })
    }
}

impl WakeControl for SystemWakeControl {
    fn set_wake_alarm(
        &self,
        delay_ms: u64,
        _should_wake: bool,
        callback: WakeAlarmCallback,
    ) -> bool {
        let deadline_ms = self.clock.now_ms().saturating_add(delay_ms);
        self.timer.arm(deadline_ms, callback);
        true
    }

    fn acquire_wake_lock(&self, lock_name: &str) -> bool {
        debug!(lock = lock_name, "wake lock acquired (no-op)");
        true
    }

    fn release_wake_lock(&self, lock_name: &str) -> bool {
        debug!(lock = lock_name, "wake lock released (no-op)");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::BootClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

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

    #[test]
    fn test_wake_locks_are_noop_successes() {
        let control = SystemWakeControl::new(Arc::new(BootClock::new())).expect("spawn");
        assert!(control.acquire_wake_lock("test_lock"));
        assert!(control.release_wake_lock("test_lock"));
    }

    #[test]
    fn test_wake_alarm_fires_after_delay() {
        let control = SystemWakeControl::new(Arc::new(BootClock::new())).expect("spawn");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        assert!(control.set_wake_alarm(
            20,
            true,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        ));
        assert!(wait_until(
            || fired.load(Ordering::SeqCst) == 1,
            Duration::from_secs(2)
        ));
    }

    #[test]
    fn test_rescheduling_replaces_pending_wake_alarm() {
        let control = SystemWakeControl::new(Arc::new(BootClock::new())).expect("spawn");
        let fired = Arc::new(AtomicUsize::new(0));

        let first = fired.clone();
        control.set_wake_alarm(
            10_000,
            true,
            Arc::new(move || {
                first.fetch_add(100, Ordering::SeqCst);
            }),
        );
        let second = fired.clone();
        control.set_wake_alarm(
            20,
            true,
            Arc::new(move || {
                second.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(wait_until(
            || fired.load(Ordering::SeqCst) == 1,
            Duration::from_secs(2)
        ));
    }
}
