//! Suspend-aware deferred-callback alarm service
//!
//! This crate provides a process-wide alarm service that:
//! - Schedules one-shot and periodic callbacks against a monotonic
//!   millisecond clock
//! - Anchors periodic firings to their creation time so late callbacks do
//!   not accumulate drift
//! - Chooses per re-evaluation between a short-horizon in-process timer
//!   (holding a wake lock) and a long-horizon wake alarm that can bring the
//!   host out of suspend
//! - Runs callbacks on caller-selected worker queues, with "cancel waits for
//!   the callback" semantics that never block unrelated alarms
//!
//! # Example
//! ```no_run
//! use wakealarm::AlarmService;
//!
//! let service = AlarmService::new().expect("alarm service");
//! let alarm = service.new_alarm("demo").expect("alarm");
//! alarm.set(100, || println!("fired")).expect("set");
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod alarm;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod queue;
pub mod service;
pub mod stats;
pub mod wake;
pub mod worker;

mod pending;
mod signal;
mod timer;

pub use alarm::{Alarm, AlarmHandle};
pub use clock::{BootClock, Timebase};
pub use config::AlarmConfig;
pub use error::{AlarmError, AlarmResult};
pub use queue::AlarmQueue;
pub use service::AlarmService;
pub use stats::{AlarmStats, WindowedStat};
pub use wake::{SystemWakeControl, WakeAlarmCallback, WakeControl};
pub use worker::Worker;
