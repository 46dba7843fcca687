//! Flight Module
//!
//! One-shot completion signal attached to every pending entry. Callers that
//! find a computation in flight park here instead of on the cache lock, and
//! all of them receive the same outcome, success or failure. Threads park on
//! a condition variable; async tasks await a notification instead, so they
//! never hold a thread while the computation runs.

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::error::Result;

// == Flight ==
#[derive(Debug)]
pub(crate) struct Flight<V> {
    outcome: Mutex<Option<Result<V>>>,
    resolved: Condvar,
    resolved_async: Notify,
}

impl<V> Default for Flight<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Flight<V> {
    pub fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            resolved: Condvar::new(),
            resolved_async: Notify::new(),
        }
    }

    // == Resolve ==
    /// Publishes the outcome and wakes every parked caller and task.
    ///
    /// Only the first outcome is kept.
    pub fn resolve(&self, outcome: Result<V>) {
        {
            let mut slot = self.outcome.lock();
            if slot.is_none() {
                *slot = Some(outcome);
            }
            self.resolved.notify_all();
        }
        self.resolved_async.notify_waiters();
    }

    #[cfg(test)]
    pub fn is_resolved(&self) -> bool {
        self.outcome.lock().is_some()
    }
}

impl<V: Clone> Flight<V> {
    // == Wait ==
    /// Blocks until the flight is resolved and returns a copy of its outcome.
    pub fn wait(&self) -> Result<V> {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.resolved.wait(&mut slot);
        }
    }

    // == Wait Async ==
    /// Awaits the outcome without blocking the current thread.
    pub async fn wait_async(&self) -> Result<V> {
        loop {
            let notified = self.resolved_async.notified();
            tokio::pin!(notified);
            // Registered before the check, so a resolve in between still wakes us.
            notified.as_mut().enable();

            let ready = self.outcome.lock().clone();
            if let Some(outcome) = ready {
                return outcome;
            }
            notified.await;
        }
    }
}
