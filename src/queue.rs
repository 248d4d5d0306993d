//! Bounded FIFO dispatch queue
//!
//! The hand-off between the dispatcher and a worker thread. Enqueueing wakes
//! the reactor the queue is registered with; the queue handler later dequeues
//! under the service monitor. `remove_where` exists so cancellation can pull
//! every stale copy of an alarm out of the queue wherever it sits.
//!
//! Capacity is advisory: a backlog past capacity is logged, never dropped. A
//! due alarm that has been handed off must reach its worker exactly once.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use crate::alarm::AlarmInner;
use crate::constants::DEFAULT_QUEUE_CAPACITY;
use crate::worker::ReactorShared;

/// Callback invoked after an item becomes ready, outside the queue lock.
pub(crate) type ReadyHook = Arc<dyn Fn() + Send + Sync>;

/// FIFO queue with a reactor ready-hook.
pub(crate) struct FifoQueue<T> {
    name: String,
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    ready_hook: Mutex<Option<ReadyHook>>,
}

impl<T> FifoQueue<T> {
    pub(crate) fn new(name: &str, capacity: usize) -> Self {
        Self {
            name: name.to_owned(),
            capacity,
            items: Mutex::new(VecDeque::new()),
            ready_hook: Mutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Append an item and wake the bound reactor, if any.
    pub(crate) fn enqueue(&self, item: T) {
        let backlog = {
            let mut items = self.items.lock();
            items.push_back(item);
            items.len()
        };
        if backlog > self.capacity {
            warn!(queue = %self.name, backlog, capacity = self.capacity, "queue over capacity");
        }
        let hook = self.ready_hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Pop the oldest item, if any.
    pub(crate) fn try_dequeue(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Remove every item satisfying `pred`; returns how many were removed.
    pub(crate) fn remove_where(&self, pred: impl Fn(&T) -> bool) -> usize {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|item| !pred(item));
        before - items.len()
    }

    /// Install the reactor wakeup called on every enqueue.
    pub(crate) fn set_ready_hook(&self, hook: ReadyHook) {
        *self.ready_hook.lock() = Some(hook);
    }

    pub(crate) fn clear_ready_hook(&self) {
        *self.ready_hook.lock() = None;
    }
}

/// A worker queue callers can bind alarms to.
///
/// Cheap to clone; clones share the underlying queue. Bind the queue to a
/// [`Worker`](crate::Worker) with
/// [`AlarmService::register_processing_queue`](crate::AlarmService::register_processing_queue)
/// before pointing alarms at it, otherwise enqueued expirations sit undrained.
#[derive(Clone)]
pub struct AlarmQueue {
    pub(crate) shared: Arc<AlarmQueueShared>,
}

pub(crate) struct AlarmQueueShared {
    pub(crate) fifo: FifoQueue<Arc<AlarmInner>>,
    /// Reactor of the worker this queue is registered with, while registered.
    pub(crate) reactor: Mutex<Option<Weak<ReactorShared>>>,
}

impl AlarmQueue {
    /// Create a queue with the default advisory capacity.
    pub fn new(name: &str) -> Self {
        Self::with_capacity(name, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a queue with an explicit advisory capacity.
    pub fn with_capacity(name: &str, capacity: usize) -> Self {
        Self {
            shared: Arc::new(AlarmQueueShared {
                fifo: FifoQueue::new(name, capacity),
                reactor: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.shared.fifo.name()
    }

    /// Number of expirations waiting to be drained.
    pub fn len(&self) -> usize {
        self.shared.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.fifo.is_empty()
    }

    /// Whether two handles refer to the same queue.
    pub(crate) fn ptr_eq(&self, other: &AlarmQueue) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}
