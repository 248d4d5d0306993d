//! Service configuration

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_WAKELOCK_THRESHOLD_MS, DEFAULT_WORKER_NAME,
    DISPATCHER_THREAD_NAME,
};

/// Configuration for an [`AlarmService`](crate::AlarmService).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    /// Deadlines closer than this use the in-process timer plus wake lock;
    /// deadlines further out are delegated to the wake-alarm callout.
    pub wakelock_threshold_ms: u64,
    /// Advisory capacity of the default dispatch queue.
    pub default_queue_capacity: usize,
    /// Name given to the dispatcher thread.
    pub dispatcher_thread_name: String,
    /// Name given to the default worker thread.
    pub default_worker_name: String,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            wakelock_threshold_ms: DEFAULT_WAKELOCK_THRESHOLD_MS,
            default_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            dispatcher_thread_name: DISPATCHER_THREAD_NAME.to_owned(),
            default_worker_name: DEFAULT_WORKER_NAME.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = AlarmConfig::default();
        assert_eq!(config.wakelock_threshold_ms, 3000);
        assert_eq!(config.default_queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.dispatcher_thread_name, "alarm_dispatcher");
    }

    #[test]
    fn test_config_round_trips_through_serde() {
        let config = AlarmConfig {
            wakelock_threshold_ms: 50,
            ..AlarmConfig::default()
        };
        let json = serde_json::to_string(&config).expect("serialize");
        let back: AlarmConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.wakelock_threshold_ms, 50);
    }
}
