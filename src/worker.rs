//! Worker threads and their reactor
//!
//! Each [`Worker`] owns one OS thread running a reactor loop. Dispatch queues
//! are registered on a worker; whenever a registered queue holds a ready
//! item, the reactor invokes that queue's handler on the worker thread. The
//! handler runs outside the reactor lock, so a slow callback never wedges
//! queue registration or shutdown of other workers.
//!
//! Within one queue, handlers run strictly serially in enqueue order because
//! a single thread drains the queue.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{AlarmError, AlarmResult};
use crate::queue::AlarmQueue;

/// Queue handler invoked on the worker thread for each ready item.
pub(crate) type QueueHandler = Arc<dyn Fn() + Send + Sync>;

struct Binding {
    queue: AlarmQueue,
    handler: QueueHandler,
}

struct ReactorState {
    bindings: Vec<Binding>,
    stop: bool,
}

pub(crate) struct ReactorShared {
    state: Mutex<ReactorState>,
    cv: Condvar,
}

impl ReactorShared {
    /// Wake the reactor to re-scan its queues.
    ///
    /// Takes the reactor lock so a notification cannot slip between the
    /// loop's queue scan and its wait.
    pub(crate) fn notify(&self) {
        let _state = self.state.lock();
        self.cv.notify_all();
    }

    pub(crate) fn bind(&self, queue: AlarmQueue, handler: QueueHandler) {
        let mut state = self.state.lock();
        state.bindings.push(Binding { queue, handler });
        self.cv.notify_all();
    }

    pub(crate) fn unbind(&self, queue: &AlarmQueue) {
        let mut state = self.state.lock();
        state.bindings.retain(|binding| !binding.queue.ptr_eq(queue));
        self.cv.notify_all();
    }
}

/// A named worker thread draining the queues registered on it.
pub struct Worker {
    name: String,
    shared: Arc<ReactorShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Spawn a worker thread with the given name.
    pub fn spawn(name: &str) -> AlarmResult<Self> {
        let shared = Arc::new(ReactorShared {
            state: Mutex::new(ReactorState {
                bindings: Vec::new(),
                stop: false,
            }),
            cv: Condvar::new(),
        });

        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || reactor_loop(thread_shared))
            .map_err(|source| AlarmError::ThreadSpawn {
                name: name.to_owned(),
                source,
            })?;

        debug!(worker = name, "worker thread started");
        Ok(Self {
            name: name.to_owned(),
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn reactor(&self) -> &Arc<ReactorShared> {
        &self.shared
    }

    /// Stop the reactor loop and join the thread. Idempotent.
    ///
    /// A handler already running is allowed to finish; queues left registered
    /// simply stop being drained.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
            self.shared.cv.notify_all();
        }
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
            debug!(worker = %self.name, "worker thread stopped");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reactor_loop(shared: Arc<ReactorShared>) {
    loop {
        let handler = {
            let mut state = shared.state.lock();
            loop {
                if state.stop {
                    return;
                }
                let ready = state
                    .bindings
                    .iter()
                    .find(|binding| !binding.queue.is_empty())
                    .map(|binding| binding.handler.clone());
                match ready {
                    Some(handler) => break handler,
                    None => shared.cv.wait(&mut state),
                }
            }
        };
        // Run the handler without the reactor lock; it takes the service
        // monitor and may block on a callback.
        handler();
    }
}
