//! Health check handlers for stream pipelines.
//!
//! This module provides reusable Axum handlers for:
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`), aggregated from registered
//!   daemons and consumers
//! - Prometheus metrics (`/metrics`)

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::batch_consumer::{BatchConsumer, BatchConsumerCallback};
use crate::consumer::{Consumer, ConsumerCallback};
use crate::consumer_base::BaseConsumer;
use crate::daemon::{DaemonStatus, ProducerDaemon};
use crate::metrics;

/// A component that contributes to readiness.
pub trait HealthCheck: Send + Sync {
    fn is_healthy(&self) -> bool;
}

impl HealthCheck for ProducerDaemon {
    fn is_healthy(&self) -> bool {
        self.status() == DaemonStatus::Running
    }
}

impl HealthCheck for BaseConsumer {
    fn is_healthy(&self) -> bool {
        BaseConsumer::is_healthy(self)
    }
}

impl<C: ConsumerCallback> HealthCheck for Consumer<C> {
    fn is_healthy(&self) -> bool {
        Consumer::is_healthy(self)
    }
}

impl<C: BatchConsumerCallback> HealthCheck for BatchConsumer<C> {
    fn is_healthy(&self) -> bool {
        BatchConsumer::is_healthy(self)
    }
}

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Application name.
    pub app_name: String,
    /// Application version.
    pub app_version: String,
    components: Vec<(String, Arc<dyn HealthCheck>)>,
}

impl HealthState {
    pub fn new(app_name: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            app_version: app_version.into(),
            components: Vec::new(),
        }
    }

    /// Register a component checked by the readiness probe.
    pub fn with_component(mut self, name: impl Into<String>, component: Arc<dyn HealthCheck>) -> Self {
        self.components.push((name.into(), component));
        self
    }

    /// Readiness of every component, in registration order.
    pub fn checks(&self) -> Vec<(&str, bool)> {
        self.components
            .iter()
            .map(|(name, component)| (name.as_str(), component.is_healthy()))
            .collect()
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status (always "healthy" if responding).
    pub status: String,
    pub name: String,
    pub version: String,
}

/// Liveness probe handler.
///
/// Always returns OK if the server is running.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe handler.
///
/// Ready once every registered component reports healthy.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let checks = state.checks();
    let ready = checks.iter().all(|(_, healthy)| *healthy);

    let results: Map<String, Value> = checks
        .into_iter()
        .map(|(name, healthy)| {
            let status = if healthy { "ok" } else { "unhealthy" };
            (name.to_string(), Value::from(status))
        })
        .collect();

    if ready {
        Ok((
            StatusCode::OK,
            Json(json!({ "status": "ready", "checks": results })),
        ))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "checks": results })),
        ))
    }
}

/// Prometheus metrics endpoint handler.
///
/// Returns metrics in Prometheus text format for scraping.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Create a standard health router.
///
/// - `/health`, `/healthz` - Liveness probe
/// - `/ready`, `/readyz` - Readiness probe
/// - `/metrics` - Prometheus metrics
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acknowledge::ConsumerInput;
    use crate::settings::{ConsumerSettings, ProducerDaemonSettings};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use messaging::{InMemoryInput, InMemoryOutput};
    use tower::ServiceExt;

    struct Fixed(bool);

    impl HealthCheck for Fixed {
        fn is_healthy(&self) -> bool {
            self.0
        }
    }

    async fn get(router: axum::Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_liveness() {
        let router = health_router(HealthState::new("pipeline", "1.0.0"));

        let (status, body) = get(router, "/healthz").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["name"], "pipeline");
    }

    #[tokio::test]
    async fn test_readiness_aggregates_components() {
        let state = HealthState::new("pipeline", "1.0.0")
            .with_component("orders", Arc::new(Fixed(true)))
            .with_component("payments", Arc::new(Fixed(false)));

        let (status, body) = get(health_router(state), "/ready").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["checks"]["orders"], "ok");
        assert_eq!(body["checks"]["payments"], "unhealthy");
    }

    #[tokio::test]
    async fn test_ready_without_components() {
        let (status, body) = get(health_router(HealthState::new("pipeline", "1.0.0")), "/readyz").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
    }

    #[test]
    fn test_component_health() {
        let daemon = ProducerDaemon::new(
            "orders",
            ProducerDaemonSettings::new(),
            Arc::new(InMemoryOutput::new()),
        )
        .unwrap();
        assert!(!HealthCheck::is_healthy(&daemon));

        let input = Arc::new(InMemoryInput::new());
        let consumer = BaseConsumer::new("orders", ConsumerSettings::new(), ConsumerInput::new(input.clone())).unwrap();
        assert!(HealthCheck::is_healthy(&consumer));

        input.set_healthy(false);
        assert!(!HealthCheck::is_healthy(&consumer));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        metrics::init_metrics().unwrap();

        let response = health_router(HealthState::new("pipeline", "1.0.0"))
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
