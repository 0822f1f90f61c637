//! Administrative HTTP surface: quota configuration, selector control and
//! service health.

use crate::error::Result;
use crate::rate_limit::{normalize_endpoint, SelectionMode, SelectorStatus, ServiceSelector};
use crate::store::now_millis;
use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared state of the administrative handlers
#[derive(Clone)]
pub struct AdminState {
    pub selector: Arc<ServiceSelector>,
}

impl AdminState {
    pub fn new(selector: Arc<ServiceSelector>) -> Self {
        Self { selector }
    }
}

/// Query parameters of a configuration update
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfigParams {
    pub endpoint: String,
    pub max_requests: u32,
    pub time_window_seconds: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Body of a selection mode change
#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: SelectionMode,
}

/// Routes of the administrative surface and the health endpoint
pub fn routes(state: AdminState) -> Router {
    Router::new()
        .route("/api/admin/rate-limit/config", post(update_config))
        .route("/api/admin/rate-limit/config/*endpoint", get(get_config))
        .route("/api/admin/rate-limit/status", get(selector_status))
        .route("/api/admin/rate-limit/mode", put(set_mode))
        .route("/api/health", get(health))
        .with_state(state)
}

/// `POST /api/admin/rate-limit/config`
pub async fn update_config(
    State(state): State<AdminState>,
    Query(params): Query<UpdateConfigParams>,
) -> Result<Json<Value>> {
    info!(
        endpoint = %params.endpoint,
        max_requests = params.max_requests,
        time_window_seconds = params.time_window_seconds,
        enabled = params.enabled,
        "Updating rate limit configuration"
    );

    let config = state
        .selector
        .update_configuration(
            &params.endpoint,
            params.max_requests,
            params.time_window_seconds,
            params.enabled,
        )
        .await?;

    Ok(Json(json!({
        "message": "Rate limit configuration updated successfully",
        "endpoint": config.endpoint,
        "maxRequests": config.max_requests,
        "timeWindowSeconds": config.time_window_seconds,
        "enabled": config.enabled,
    })))
}

/// `GET /api/admin/rate-limit/config/*endpoint`
pub async fn get_config(
    State(state): State<AdminState>,
    Path(endpoint): Path<String>,
) -> Result<Json<Value>> {
    let endpoint = normalize_endpoint(&endpoint);
    debug!(endpoint = %endpoint, "Getting rate limit configuration");

    let body = match state.selector.get_configuration(&endpoint).await? {
        Some(config) => json!({
            "endpoint": config.endpoint,
            "maxRequests": config.max_requests,
            "timeWindowSeconds": config.time_window_seconds,
            "enabled": config.enabled,
            "lockTimeoutMillis": config.lock_timeout_millis,
            "message": "Configuration retrieved successfully",
        }),
        None => json!({
            "endpoint": endpoint,
            "message": "No configuration found for this endpoint",
        }),
    };

    Ok(Json(body))
}

/// `GET /api/admin/rate-limit/status`
pub async fn selector_status(State(state): State<AdminState>) -> Json<SelectorStatus> {
    Json(state.selector.status().await)
}

/// `PUT /api/admin/rate-limit/mode`
pub async fn set_mode(
    State(state): State<AdminState>,
    Json(request): Json<ModeRequest>,
) -> Json<SelectorStatus> {
    match request.mode {
        SelectionMode::Auto => state.selector.use_health_check(),
        SelectionMode::ForceFallback => state.selector.force_fallback(),
        SelectionMode::ForceDistributed => state.selector.force_distributed(),
    }

    Json(state.selector.status().await)
}

/// `GET /api/health`
pub async fn health(State(state): State<AdminState>) -> Json<Value> {
    let store = state.selector.health_info().await;
    let healthy = store.is_up();

    if !healthy {
        warn!(message = %store.message, "Service degraded, shared store is down");
    }

    Json(json!({
        "status": if healthy { "UP" } else { "DEGRADED" },
        "message": if healthy {
            "Service is running successfully"
        } else {
            "Service is running but the shared store has issues"
        },
        "version": env!("CARGO_PKG_VERSION"),
        "store": store.status,
        "storeInfo": store,
        "timestamp": now_millis(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::LocalRateLimiter;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn app() -> Router {
        let selector = ServiceSelector::local_only(Arc::new(LocalRateLimiter::new()));
        routes(AdminState::new(Arc::new(selector)))
    }

    #[tokio::test]
    async fn test_update_requires_parameters() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/admin/rate-limit/config?endpoint=/api/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_rejects_zero_limit() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/admin/rate-limit/config?endpoint=/api/test&maxRequests=0&timeWindowSeconds=60")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_mode_is_rejected() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/admin/rate-limit/mode")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"mode":"sideways"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }
}
