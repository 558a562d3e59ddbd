// ABOUTME: HTTP surface: health, readiness, permission lookup, and Prometheus metrics
// ABOUTME: Axum router with a tower-http trace layer; state is built from the relay

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use husk_core::health::{HealthChecker, HealthReport};
use husk_core::PermissionChecker;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::relay::Relay;

#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthChecker>,
    pub permissions: Arc<dyn PermissionChecker>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn from_relay(relay: &Relay, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            health: Arc::new(relay.health_checker()),
            permissions: relay.permissions(),
            metrics,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsResponse {
    pub user_id: String,
    pub channel_id: String,
    pub role: String,
    pub is_owner: bool,
    pub permissions: Vec<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/ready", get(ready_handler))
        .route(
            "/api/permissions/{user_id}/{channel_id}",
            get(permissions_handler),
        )
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router(state)` on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "Starting HTTP server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.health.report().await)
}

async fn ready_handler(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let report = state.health.report().await;
    let ready = report.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadyResponse { ready }))
}

async fn permissions_handler(
    State(state): State<AppState>,
    Path((user_id, channel_id)): Path<(String, String)>,
) -> Json<PermissionsResponse> {
    let role = state.permissions.role_of(&user_id, &channel_id).await;
    let is_owner = state.permissions.is_owner(&user_id).await;

    Json(PermissionsResponse {
        role: role.as_str().to_string(),
        is_owner,
        permissions: role
            .permissions()
            .iter()
            .map(|p| p.as_str().to_string())
            .collect(),
        user_id,
        channel_id,
    })
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
