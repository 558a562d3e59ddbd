// ABOUTME: Three-state circuit breaker guarding calls to one unreliable dependency
// ABOUTME: Closed -> Open after N consecutive failures, single half-open probe after cooldown

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::ResilienceError;
use crate::metrics;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected without touching the dependency
    Open,
    /// One probe call is in flight or about to be
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Cooldown after the last failure before a probe is allowed
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_millis(30_000),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
    /// Bumped on every state change; outcomes from an older generation are
    /// ignored.
    generation: u64,
}

/// What `acquire` hands a call that may proceed.
#[derive(Debug, Clone, Copy)]
struct Admission {
    generation: u64,
    probe: bool,
}

/// Wraps calls to one logical dependency. Use one instance per dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Re-opens the breaker if a half-open probe is dropped before it finishes.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.admission.probe {
            self.breaker.settle(self.admission, false);
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                probe_in_flight: false,
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state. An open breaker whose cooldown has elapsed still reports
    /// `Open` until the next call attempt moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Decide whether a call may proceed, moving Open -> HalfOpen when the
    /// cooldown has elapsed.
    fn acquire(&self) -> Result<Admission, ResilienceError> {
        let mut inner = self.lock();
        let probe = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let cooled = inner
                    .last_failure
                    .map_or(true, |t| t.elapsed() >= self.config.reset_timeout);
                if !cooled {
                    return Err(self.open_error());
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.probe_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(self.open_error());
                }
                inner.probe_in_flight = true;
                true
            }
        };
        Ok(Admission {
            generation: inner.generation,
            probe,
        })
    }

    fn open_error(&self) -> ResilienceError {
        ResilienceError::CircuitOpen {
            name: self.name.clone(),
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        if inner.state == to {
            return;
        }
        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                "Circuit opened"
            ),
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "Circuit half-open, probing")
            }
            CircuitState::Closed => tracing::info!(breaker = %self.name, "Circuit closed"),
        }
        metrics::record_circuit_transition(&self.name, to.as_str());
        inner.state = to;
        inner.generation = inner.generation.wrapping_add(1);
    }

    /// Record a successful call through the breaker.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        self.apply_success(&mut inner);
    }

    /// Record a failed call through the breaker.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        self.apply_failure(&mut inner);
    }

    /// Record the outcome of an admitted call, unless the breaker changed
    /// state since it was admitted.
    fn settle(&self, admission: Admission, success: bool) {
        let mut inner = self.lock();
        if admission.generation != inner.generation {
            tracing::debug!(
                breaker = %self.name,
                success,
                "Ignoring outcome of a call admitted before the last state change"
            );
            return;
        }
        if success {
            self.apply_success(&mut inner);
        } else {
            self.apply_failure(&mut inner);
        }
    }

    fn apply_success(&self, inner: &mut BreakerInner) {
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        self.transition(inner, CircuitState::Closed);
    }

    fn apply_failure(&self, inner: &mut BreakerInner) {
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.probe_in_flight = false;
        match inner.state {
            CircuitState::HalfOpen => self.transition(inner, CircuitState::Open),
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(inner, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Run `op` through the breaker.
    ///
    /// While open the operation is not invoked and `CircuitOpen` is returned.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let admission = self.acquire()?;
        let mut guard = ProbeGuard {
            breaker: self,
            admission,
            armed: true,
        };

        let result = op().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                self.settle(admission, true);
                Ok(value)
            }
            Err(e) => {
                self.settle(admission, false);
                Err(ResilienceError::Upstream(e))
            }
        }
    }

    /// Like `call`, but a call that runs longer than `timeout` is abandoned
    /// and counted as a failure.
    pub async fn call_with_timeout<F, Fut, T>(
        &self,
        timeout: Duration,
        op: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let name = self.name.clone();
        let result = self
            .call(|| async move {
                match tokio::time::timeout(timeout, op()).await {
                    Ok(inner) => inner,
                    Err(_) => Err(anyhow::Error::new(ResilienceError::Timeout {
                        name,
                        after: timeout,
                    })),
                }
            })
            .await;

        // Surface the timeout as its own variant rather than as Upstream.
        match result {
            Err(ResilienceError::Upstream(e)) => match e.downcast::<ResilienceError>() {
                Ok(inner) => Err(inner),
                Err(e) => Err(ResilienceError::Upstream(e)),
            },
            other => other,
        }
    }

    /// Force the breaker back to closed. Intended for test isolation.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
        self.transition(&mut inner, CircuitState::Closed);
    }
}
