// ABOUTME: Sliding-window rate limiter keyed by user, channel, or connector identity
// ABOUTME: Expired timestamps are purged lazily on each check, never swept eagerly

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::metrics;

/// Default admissions per window.
pub const DEFAULT_MAX_REQUESTS: usize = 15;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(60_000);

/// Admission control over a trailing time window.
///
/// Per-key state lives for the life of the process. Keys are expected to be a
/// bounded set (user and channel IDs); `prune` exists for deployments where
/// they are not.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    admissions: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            admissions: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        self.admissions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether `at` still lies inside the window ending at `now`.
    fn in_window(&self, at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(at) < self.window
    }

    /// Admit and record a request for `key` if the window has room.
    pub fn is_allowed(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut admissions = self.lock();
        let stamps = admissions.entry(key.to_string()).or_default();

        while let Some(&oldest) = stamps.front() {
            if self.in_window(oldest, now) {
                break;
            }
            stamps.pop_front();
        }

        if stamps.len() < self.max_requests {
            stamps.push_back(now);
            true
        } else {
            tracing::debug!(key = %key, limit = self.max_requests, "Rate limit reached");
            metrics::record_rate_limited();
            false
        }
    }

    /// Quota left for `key` in the current window. Does not record anything.
    pub fn remaining(&self, key: &str) -> usize {
        let now = Instant::now();
        let admissions = self.lock();
        let used = admissions
            .get(key)
            .map(|stamps| stamps.iter().filter(|&&t| self.in_window(t, now)).count())
            .unwrap_or(0);
        self.max_requests.saturating_sub(used)
    }

    /// Forget all admissions for `key`.
    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Drop keys with no admissions left inside the window. Returns how many
    /// keys were removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut admissions = self.lock();
        let before = admissions.len();
        admissions.retain(|_, stamps| stamps.iter().any(|&t| self.in_window(t, now)));
        before - admissions.len()
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}
