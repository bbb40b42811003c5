//! Owned timer handles. Each stream keeps its own handle, and only the owner
//! replaces or cancels it.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A singular periodic job: scheduling again always aborts the previous timer
/// before installing the new one.
#[derive(Default)]
pub struct PeriodicTask {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` every `every`; `None` just clears the current schedule.
    /// The first run happens one full period after scheduling.
    pub fn schedule<F, Fut>(&self, every: Option<Duration>, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = slot.take() {
            prev.abort();
        }
        let Some(every) = every.filter(|d| !d.is_zero()) else {
            return;
        };
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                job().await;
            }
        }));
    }

    pub fn cancel(&self) {
        if let Some(prev) = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take() {
            prev.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Trailing-edge debounce: every call resets the timer, so a burst of calls
/// runs the job once, `delay` after the last call.
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, pending: Mutex::new(None) }
    }

    pub fn call<Fut>(&self, job: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = slot.take() {
            prev.abort();
        }
        let delay = self.delay;
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
        }));
    }

    pub fn cancel(&self) {
        if let Some(prev) = self.pending.lock().unwrap_or_else(PoisonError::into_inner).take() {
            prev.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
