//! Per-alarm statistics
//!
//! Counters track how often an alarm was armed, canceled, and re-anchored;
//! windowed measures track callback execution time and scheduling jitter
//! (how far past or ahead of the intended deadline a callback actually ran).
//!
//! Counter fields are written under the service monitor; windowed measures
//! are written by the queue handler while it holds the alarm's callback lock.
//! Snapshots taken while a callback is in flight are best-effort.

use serde::{Deserialize, Serialize};

/// A windowed measure: observation count, running total, and maximum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowedStat {
    /// Number of observations
    pub count: u64,
    /// Sum of all observations in milliseconds
    pub total_ms: u64,
    /// Largest single observation in milliseconds
    pub max_ms: u64,
}

impl WindowedStat {
    /// Record one observation.
    pub(crate) fn update(&mut self, delta_ms: u64) {
        self.count += 1;
        self.total_ms += delta_ms;
        if delta_ms > self.max_ms {
            self.max_ms = delta_ms;
        }
    }

    /// Mean observation in milliseconds, or 0.0 with no observations.
    pub fn average_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.count as f64
        }
    }
}

/// Statistics for a single alarm.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlarmStats {
    /// Times the alarm was armed via `set`/`set_on_queue`
    pub scheduled_count: u64,
    /// Times the alarm was canceled while armed
    pub canceled_count: u64,
    /// Times a periodic alarm was re-anchored after firing
    pub rescheduled_count: u64,
    /// Total statistic updates recorded by the queue handler
    pub total_updates: u64,
    /// Wall time spent inside the user callback
    pub callback_execution: WindowedStat,
    /// Callback started after its intended deadline by this much
    pub overdue_scheduling: WindowedStat,
    /// Callback started before its intended deadline by this much
    pub premature_scheduling: WindowedStat,
}

impl AlarmStats {
    /// Record one callback invocation.
    ///
    /// `jitter_ms` is callback start time minus the intended deadline:
    /// positive means the callback ran late, negative means early.
    pub(crate) fn record_invocation(&mut self, execution_ms: u64, jitter_ms: i64) {
        self.total_updates += 1;
        self.callback_execution.update(execution_ms);
        if jitter_ms > 0 {
            self.overdue_scheduling.update(jitter_ms as u64);
        } else if jitter_ms < 0 {
            self.premature_scheduling.update(jitter_ms.unsigned_abs());
        }
    }
}
