// ABOUTME: Aggregated health from named service checks
// ABOUTME: Non-critical failures degrade the service, critical failures make it unhealthy

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::traits::ChatClient;

/// A single named probe.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a failure of this check makes the whole service unhealthy
    fn critical(&self) -> bool {
        false
    }

    async fn check(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub services: BTreeMap<String, ServiceStatus>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_ready(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

#[derive(Default)]
pub struct HealthChecker {
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, check: Arc<dyn HealthCheck>) {
        self.checks.push(check);
    }

    /// Run every check concurrently and fold the results.
    pub async fn report(&self) -> HealthReport {
        let results = futures_util::future::join_all(self.checks.iter().map(|c| async move {
            (c.name().to_string(), c.critical(), c.check().await)
        }))
        .await;

        let mut status = HealthStatus::Healthy;
        let mut services = BTreeMap::new();
        for (name, critical, up) in results {
            if !up {
                tracing::warn!(service = %name, critical, "Health check failed");
                status = match (critical, status) {
                    (true, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
                    (false, _) => HealthStatus::Degraded,
                };
            }
            let service = if up {
                ServiceStatus::Up
            } else {
                ServiceStatus::Down
            };
            services.insert(name, service);
        }

        HealthReport {
            status,
            services,
            timestamp: Utc::now(),
        }
    }
}

/// Reports down while the breaker is open.
pub struct BreakerHealthCheck {
    name: String,
    breaker: Arc<CircuitBreaker>,
}

impl BreakerHealthCheck {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            name: format!("breaker:{}", breaker.name()),
            breaker,
        }
    }
}

#[async_trait]
impl HealthCheck for BreakerHealthCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> bool {
        self.breaker.state() != CircuitState::Open
    }
}

/// Asks the AI client whether it is reachable.
pub struct ChatHealthCheck {
    client: Arc<dyn ChatClient>,
}

impl ChatHealthCheck {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthCheck for ChatHealthCheck {
    fn name(&self) -> &str {
        "chat"
    }

    async fn check(&self) -> bool {
        self.client.is_available().await
    }
}
