// ABOUTME: Cancellable periodic background task with a stored handle
// ABOUTME: Used for rate-limiter pruning and confirmation expiry sweeps

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A periodic job. Stops when cancelled or dropped.
pub struct ScheduledTask {
    name: String,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `job` every `period`, first tick after one full period.
    ///
    /// Must be called from within a tokio runtime.
    pub fn every<F, Fut>(name: impl Into<String>, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tracing::trace!(task = %task_name, "Scheduled task tick");
                job().await;
            }
        });
        tracing::debug!(task = %name, period_ms = period.as_millis() as u64, "Scheduled task started");
        Self { name, handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the task. Idempotent.
    pub fn cancel(&self) {
        if !self.handle.is_finished() {
            tracing::debug!(task = %self.name, "Scheduled task cancelled");
        }
        self.handle.abort();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
