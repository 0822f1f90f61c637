use super::context::build_request_info;
use super::service::ServiceSelector;
use crate::observability::{get_request_id, REQUEST_ID_HEADER};
use crate::store::now_millis;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// State of the admission middleware
#[derive(Clone)]
pub struct RateLimitLayer {
    selector: Arc<ServiceSelector>,
    protected_prefix: String,
    admin_prefix: String,
}

impl RateLimitLayer {
    pub fn new(
        selector: Arc<ServiceSelector>,
        protected_prefix: impl Into<String>,
        admin_prefix: impl Into<String>,
    ) -> Self {
        Self {
            selector,
            protected_prefix: protected_prefix.into(),
            admin_prefix: admin_prefix.into(),
        }
    }

    /// Whether a path goes through admission
    pub fn is_limited(&self, path: &str) -> bool {
        path.starts_with(&self.protected_prefix) && !path.starts_with(&self.admin_prefix)
    }
}

/// Create a 429 Too Many Requests response
pub fn rate_limit_exceeded_response() -> Response {
    let body = json!({
        "error": "Too Many Requests",
        "message": "Rate limit exceeded. Please try again later.",
        "status": StatusCode::TOO_MANY_REQUESTS.as_u16(),
        "timestamp": now_millis(),
    });

    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
}

/// Axum middleware applying admission control to protected paths
pub async fn rate_limit_middleware(
    State(layer): State<RateLimitLayer>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !layer.is_limited(&path) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);

    // Set by the request id middleware when it runs first
    let request_id = get_request_id(&request)
        .or_else(|| {
            request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let info = build_request_info(&path, request.headers(), peer, &request_id);

    if layer.selector.is_request_allowed(&info).await {
        next.run(request).await
    } else {
        debug!(
            endpoint = %info.endpoint,
            client = %info.client_identifier,
            request_id = %info.request_id,
            "Rejecting request over quota"
        );
        rate_limit_exceeded_response()
    }
}
