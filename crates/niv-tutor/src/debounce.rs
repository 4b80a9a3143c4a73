//! Trailing-edge debouncing on the tokio runtime.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

/// Runs only the last of a burst of calls, once `delay` has passed without a
/// newer one.
///
/// A newer call also aborts the previous task if it is already running, so
/// a stale result can never overwrite a fresher one.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    /// Creates a debouncer with the given quiet period.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// The quiet period.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedules `task` after the quiet period, superseding any pending call.
    ///
    /// Must be called from within a tokio runtime.
    pub fn call<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        if let Some(previous) = self.lock().replace(handle) {
            trace!("Superseding pending debounced call");
            previous.abort();
        }
    }

    /// Drops the pending call, if any.
    pub fn cancel(&self) {
        if let Some(previous) = self.lock().take() {
            previous.abort();
        }
    }

    /// Returns `true` while a scheduled call has not finished.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
