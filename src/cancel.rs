//! One-shot broadcast cancellation.
//!
//! A `CancellationToken` is handed to every stage at construction. Raising it
//! is idempotent; every clone observes it. Blocking waits select on
//! `signal()`, which disconnects when the token is raised, so a stage parked
//! on a channel wakes within one receive.

use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    raised: AtomicBool,
    // Dropping the only sender disconnects every receiver at once.
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (trigger, signal) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                raised: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    /// Raise the token. Returns true only for the call that raised it.
    pub fn cancel(&self) -> bool {
        if self.inner.raised.swap(true, Ordering::SeqCst) {
            return false;
        }
        let sender = match self.inner.trigger.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Receiver that never yields a value and disconnects on cancellation.
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }

    /// Block until the token is raised.
    pub fn wait(&self) {
        let _ = self.inner.signal.recv();
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
