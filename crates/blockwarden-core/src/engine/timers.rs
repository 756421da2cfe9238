//! Per-IP cancellable timer bookkeeping.
//!
//! A [`TimerTable`] owns at most one outstanding timer entry per IP.
//! Arming replaces the previous entry and drops its cancellation sender,
//! which the old task observes as a cancellation; explicit `cancel`
//! removes the entry and signals it. A firing task removes only its own
//! generation, so a replacement armed between fire and cleanup is never
//! discarded. Cancelling a timer that has already fired is a no-op.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use uuid::Uuid;

struct TimerHandle {
    generation: Uuid,
    cancel: oneshot::Sender<()>,
}

#[derive(Default)]
pub struct TimerTable {
    entries: Mutex<HashMap<String, TimerHandle>>,
}

impl TimerTable {
    /// Register a new timer for `ip`, superseding any prior one. The
    /// returned receiver resolves when the timer is cancelled or
    /// replaced; the generation identifies this timer in `complete`.
    pub fn arm(&self, ip: &str) -> (Uuid, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let generation = Uuid::new_v4();
        let mut entries = self.entries.lock().expect("timer table poisoned");
        entries.insert(
            ip.to_string(),
            TimerHandle {
                generation,
                cancel: tx,
            },
        );
        (generation, rx)
    }

    /// Cancel the outstanding timer for `ip`. Returns whether a timer
    /// was there to cancel. Idempotent.
    pub fn cancel(&self, ip: &str) -> bool {
        let handle = {
            let mut entries = self.entries.lock().expect("timer table poisoned");
            entries.remove(ip)
        };
        match handle {
            Some(handle) => {
                // The task may already have fired and dropped its
                // receiver; a failed send is benign.
                let _ = handle.cancel.send(());
                true
            }
            None => false,
        }
    }

    /// Remove bookkeeping after a natural fire. Only the firing
    /// generation may remove its own entry.
    pub fn complete(&self, ip: &str, generation: Uuid) {
        let mut entries = self.entries.lock().expect("timer table poisoned");
        if entries.get(ip).map(|h| h.generation) == Some(generation) {
            entries.remove(ip);
        }
    }

    #[cfg(test)]
    pub fn contains(&self, ip: &str) -> bool {
        self.entries
            .lock()
            .expect("timer table poisoned")
            .contains_key(ip)
    }
}
