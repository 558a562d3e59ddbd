// ABOUTME: Stateless retry helper with exponential backoff
// ABOUTME: Orthogonal to the circuit breaker; callers decide how to compose the two

use std::future::Future;
use std::time::Duration;

/// How many times to try and how long to wait between tries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one (values below 1 act as 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Factor applied to the delay after each failed attempt
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_multiplier: 2.0,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// Run `op` until it succeeds or the policy's attempts are spent, returning
/// the last error.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_observer(policy, op, |_: &E, _| {}).await
}

/// Like `retry_with_backoff`, calling `on_retry(error, attempt)` after each
/// failed attempt that will be retried. `attempt` starts at 1.
pub async fn retry_with_observer<F, Fut, T, E, O>(
    policy: &RetryPolicy,
    mut op: F,
    mut on_retry: O,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    O: FnMut(&E, u32),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                on_retry(&e, attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying");
                tokio::time::sleep(delay).await;
                delay = next_delay(delay, policy.backoff_multiplier);
                attempt += 1;
            }
        }
    }
}

/// Grow `delay` by `multiplier`, saturating at `Duration::MAX` instead of
/// overflowing. Negative or NaN multipliers give a zero delay.
fn next_delay(delay: Duration, multiplier: f64) -> Duration {
    let secs = delay.as_secs_f64() * multiplier;
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let mut observed = Vec::new();
        let policy = RetryPolicy::new(5, Duration::from_millis(100));

        let result: Result<&str, String> = retry_with_observer(
            &policy,
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= 2 {
                    Err(format!("fail {}", n))
                } else {
                    Ok("done")
                }
            },
            |e, attempt| observed.push((e.clone(), attempt)),
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            observed,
            vec![("fail 1".to_string(), 1), ("fail 2".to_string(), 2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rethrows_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let result: Result<(), String> = retry_with_backoff(&policy, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("attempt {}", n))
        })
        .await;

        assert_eq!(result.unwrap_err(), "attempt 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_grows_by_multiplier() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100)).with_multiplier(3.0);
        let start = Instant::now();

        let _: Result<(), ()> = retry_with_backoff(&policy, || async { Err(()) }).await;

        // 100 + 300 + 900
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1300));
        assert!(elapsed < Duration::from_millis(1400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        let _: Result<(), ()> = retry_with_backoff(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(())
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_next_delay_saturates() {
        let second = Duration::from_secs(1);
        assert_eq!(next_delay(second, 2.0), Duration::from_secs(2));
        assert_eq!(next_delay(second, 1e20), Duration::MAX);
        assert_eq!(next_delay(second, f64::INFINITY), Duration::MAX);
        assert_eq!(next_delay(Duration::MAX, 2.0), Duration::MAX);
        assert_eq!(next_delay(second, -1.0), Duration::ZERO);
        assert_eq!(next_delay(second, f64::NAN), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_multiplier_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_secs(1)).with_multiplier(1e20);

        let result: Result<(), String> = retry_with_backoff(&policy, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("attempt {}", n))
        })
        .await;

        assert_eq!(result.unwrap_err(), "attempt 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
