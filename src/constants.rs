//! Alarm service constants
//!
//! Centralized defaults for wake policy, queue sizing, and thread naming.

/// Deadlines closer than this are serviced by the in-process timer while
/// holding a wake lock; deadlines further out are delegated to the wake-alarm
/// callout. Runtime-tunable through
/// [`AlarmService::set_wakelock_threshold_ms`](crate::AlarmService::set_wakelock_threshold_ms)
/// so test suites can shrink it; production code must not mutate it.
pub const DEFAULT_WAKELOCK_THRESHOLD_MS: u64 = 3000;

/// Advisory capacity of a dispatch queue before backlog warnings are emitted.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A callback dispatched later than this past its deadline is logged.
pub const DISPATCH_LATENCY_WARN_MS: u64 = 1000;

/// Identifier passed to the wake-lock callout.
pub const WAKE_LOCK_ID: &str = "wakealarm_timer";

/// Name of the expiration dispatcher thread.
pub const DISPATCHER_THREAD_NAME: &str = "alarm_dispatcher";

/// Name of the default worker thread created at service init.
pub const DEFAULT_WORKER_NAME: &str = "alarm_default";

/// Name of the in-process deadline timer thread.
pub const TIMER_THREAD_NAME: &str = "alarm_timer";

/// Name of the deadline timer thread backing the default wake-alarm callout.
pub const WAKE_TIMER_THREAD_NAME: &str = "alarm_wake_timer";
