//! Error types for the alarm service

use thiserror::Error;

/// Result type for alarm operations
pub type AlarmResult<T> = Result<T, AlarmError>;

/// Error types for the alarm service
#[derive(Error, Debug)]
pub enum AlarmError {
    /// Spawning a service-owned thread failed
    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The alarm service has been cleaned up
    #[error("alarm service is shut down")]
    ServiceShutdown,

    /// The queue is already bound to a worker
    #[error("queue {0} is already registered with a worker")]
    QueueAlreadyRegistered(String),
}
