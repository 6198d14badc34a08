//! A cancellable recurring background task for lease renewal.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Recurring timer with explicit start/stop, tied to an operation's
/// before/after-execute boundaries.
///
/// The callback runs once per interval, starting one interval after
/// [`PeriodicRenewal::start`]. Stopping aborts the task; an in-flight
/// callback invocation is cancelled at its next await point. Dropping the
/// handle also stops the task, so an abandoned context can never leak a
/// free-running renewal loop.
pub struct PeriodicRenewal {
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicRenewal {
    /// Create a stopped timer with the given interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            handle: None,
        }
    }

    /// The configured interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the timer is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Start invoking `callback` once per interval. A no-op if already
    /// started.
    pub fn start<F, Fut>(&mut self, mut callback: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        if self.handle.is_some() {
            return;
        }
        let interval = self.interval;
        self.handle = Some(tokio::spawn(async move {
            let first_tick = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                callback().await;
            }
        }));
    }

    /// Stop the timer. Idempotent.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for PeriodicRenewal {
    fn drop(&mut self) {
        self.stop();
    }
}
