//! Expiration signal
//!
//! A counting signal between the two timer paths and the dispatcher thread.
//! Both the in-process deadline timer and the wake-alarm callout post here;
//! the dispatcher blocks until at least one post is outstanding. Built on an
//! unbounded channel so posts count rather than coalesce, and a double post
//! is harmless: the dispatcher re-validates the pending front on every wake.

use crossbeam::channel::{unbounded, Receiver, Sender};

/// Counting wakeup signal for the dispatcher.
pub(crate) struct ExpirationSignal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

/// Cloneable posting end, handed to timer expiry callbacks.
#[derive(Clone)]
pub(crate) struct SignalPoster {
    tx: Sender<()>,
}

impl SignalPoster {
    pub(crate) fn post(&self) {
        // Send only fails once the service has torn the channel down.
        let _ = self.tx.send(());
    }
}

impl ExpirationSignal {
    pub(crate) fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Record one expiration.
    pub(crate) fn post(&self) {
        let _ = self.tx.send(());
    }

    /// A posting handle usable from timer threads.
    pub(crate) fn poster(&self) -> SignalPoster {
        SignalPoster {
            tx: self.tx.clone(),
        }
    }

    /// Block until a post is available and consume it.
    pub(crate) fn wait(&self) {
        // The signal owns a sender, so recv can only fail during teardown.
        let _ = self.rx.recv();
    }
}
