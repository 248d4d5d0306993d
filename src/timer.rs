//! In-process deadline timer
//!
//! A parked thread that fires a stored callback when the armed absolute
//! deadline passes on the shared [`Timebase`]. Re-arming replaces the armed
//! deadline; disarming clears it. The armed state can be read back, which the
//! wake policy uses to detect a deadline that expired while it was being
//! armed.
//!
//! A callback from a superseded arming may still fire after a disarm/re-arm
//! crossover; consumers post a counting signal that the dispatcher
//! re-validates, so a stale fire is harmless.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::Timebase;
use crate::error::{AlarmError, AlarmResult};

/// Invoked on the timer thread when the armed deadline passes.
pub(crate) type ExpiryCallback = Arc<dyn Fn() + Send + Sync>;

struct Armed {
    deadline_ms: u64,
    on_expire: ExpiryCallback,
}

struct TimerState {
    armed: Option<Armed>,
    stop: bool,
}

struct TimerShared {
    clock: Arc<dyn Timebase>,
    state: Mutex<TimerState>,
    cv: Condvar,
}

/// Absolute-deadline one-shot timer backed by a dedicated thread.
pub(crate) struct DeadlineTimer {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DeadlineTimer {
    pub(crate) fn spawn(name: &str, clock: Arc<dyn Timebase>) -> AlarmResult<Self> {
        let shared = Arc::new(TimerShared {
            clock,
            state: Mutex::new(TimerState {
                armed: None,
                stop: false,
            }),
            cv: Condvar::new(),
        });

        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || timer_loop(thread_shared))
            .map_err(|source| AlarmError::ThreadSpawn {
                name: name.to_owned(),
                source,
            })?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Arm for absolute `deadline_ms`, replacing any previous arming.
    ///
    /// A deadline at or before now fires as soon as the timer thread runs.
    pub(crate) fn arm(&self, deadline_ms: u64, on_expire: ExpiryCallback) {
        let mut state = self.shared.state.lock();
        state.armed = Some(Armed {
            deadline_ms,
            on_expire,
        });
        self.shared.cv.notify_all();
    }

    pub(crate) fn disarm(&self) {
        let mut state = self.shared.state.lock();
        state.armed = None;
        self.shared.cv.notify_all();
    }

    /// Whether a deadline is currently armed. False once the timer has taken
    /// the armed entry to fire it.
    pub(crate) fn is_armed(&self) -> bool {
        self.shared.state.lock().armed.is_some()
    }

    /// Stop the timer thread and join it. Idempotent.
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
            self.shared.cv.notify_all();
        }
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(shared: Arc<TimerShared>) {
    let mut state = shared.state.lock();
    loop {
        if state.stop {
            return;
        }
        let Some(deadline_ms) = state.armed.as_ref().map(|a| a.deadline_ms) else {
            shared.cv.wait(&mut state);
            continue;
        };

        let now_ms = shared.clock.now_ms();
        if now_ms >= deadline_ms {
            if let Some(armed) = state.armed.take() {
                // Fire without holding the state lock; the callback may
                // re-arm this same timer.
                drop(state);
                (armed.on_expire)();
                state = shared.state.lock();
            }
        } else {
            let timeout = Duration::from_millis(deadline_ms - now_ms);
            let _ = shared.cv.wait_for(&mut state, timeout);
        }
    }
}
