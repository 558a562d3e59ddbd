// ABOUTME: Typed errors for the resilience layer.
// ABOUTME: Lets callers tell breaker rejection and timeouts apart from upstream failures.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResilienceError {
    /// Breaker is open; the wrapped operation was not invoked.
    #[error("circuit '{name}' is open")]
    CircuitOpen { name: String },

    #[error("call through '{name}' timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl ResilienceError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}
