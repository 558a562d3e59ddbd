// ABOUTME: Tests for the HTTP surface: health, readiness, permissions, and metrics routes
// ABOUTME: Routes are exercised in-process with tower's oneshot, no sockets involved

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use husk::server::{router, AppState};
use husk::Relay;
use husk_core::config::Config;
use husk_core::health::{HealthCheck, HealthChecker};
use husk_core::testing::RecordingSender;
use husk_core::{ChatClient, RoleStore};
use std::sync::Arc;
use tower::ServiceExt;

async fn get(state: AppState, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

struct Probe {
    name: &'static str,
    critical: bool,
    up: bool,
}

#[async_trait]
impl HealthCheck for Probe {
    fn name(&self) -> &str {
        self.name
    }

    fn critical(&self) -> bool {
        self.critical
    }

    async fn check(&self) -> bool {
        self.up
    }
}

fn state_with(checks: Vec<Probe>) -> AppState {
    let mut health = HealthChecker::new();
    for check in checks {
        health.register(Arc::new(check));
    }
    AppState {
        health: Arc::new(health),
        permissions: Arc::new(RoleStore::new(vec!["boss".to_string()])),
        metrics: None,
    }
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_all_up() {
    let state = state_with(vec![Probe {
        name: "chat",
        critical: false,
        up: true,
    }]);

    let (status, body) = get(state.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["services"]["chat"], "up");
    assert!(body["timestamp"].is_string());

    let (status, body) = get(state, "/health/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn test_non_critical_failure_degrades_but_stays_ready() {
    let state = state_with(vec![
        Probe {
            name: "store",
            critical: true,
            up: true,
        },
        Probe {
            name: "chat",
            critical: false,
            up: false,
        },
    ]);

    let (_, body) = get(state.clone(), "/health").await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["services"]["chat"], "down");

    let (status, body) = get(state, "/health/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn test_critical_failure_is_unavailable() {
    let state = state_with(vec![Probe {
        name: "store",
        critical: true,
        up: false,
    }]);

    let (_, body) = get(state.clone(), "/health").await;
    assert_eq!(body["status"], "unhealthy");

    let (status, body) = get(state, "/health/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);
}

struct DownClient;

#[async_trait]
impl ChatClient for DownClient {
    async fn chat(&self, _prompt: &str, _context: Option<&str>) -> Result<String> {
        anyhow::bail!("down")
    }

    async fn is_available(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn test_relay_health_reports_chat_and_breaker() {
    let relay = Relay::builder(Config::default(), RecordingSender::new())
        .chat(Arc::new(DownClient))
        .build()
        .unwrap();

    let (status, body) = get(AppState::from_relay(&relay, None), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["services"]["chat"], "down");
    assert_eq!(body["services"]["breaker:chat"], "up");
}

// =============================================================================
// Permissions
// =============================================================================

#[tokio::test]
async fn test_permissions_for_owner() {
    let (status, body) = get(state_with(Vec::new()), "/api/permissions/boss/c1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], "boss");
    assert_eq!(body["channelId"], "c1");
    assert_eq!(body["role"], "owner");
    assert_eq!(body["isOwner"], true);
    assert!(body["permissions"]
        .as_array()
        .unwrap()
        .contains(&serde_json::json!("roles:manage")));
}

#[tokio::test]
async fn test_permissions_for_unknown_user_default_to_member() {
    let (_, body) = get(state_with(Vec::new()), "/api/permissions/someone/c1").await;
    assert_eq!(body["role"], "member");
    assert_eq!(body["isOwner"], false);
    assert_eq!(
        body["permissions"],
        serde_json::json!(["memory:read", "memory:write", "calendar:write", "chat:use"])
    );
}

// =============================================================================
// Metrics
// =============================================================================

#[tokio::test]
async fn test_metrics_without_recorder_is_not_found() {
    let (status, _) = get(state_with(Vec::new()), "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
