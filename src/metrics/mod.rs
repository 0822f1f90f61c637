use crate::error::{QuotaError, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, Response, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsService").finish_non_exhaustive()
    }
}

impl MetricsService {
    /// Install the global Prometheus recorder.
    ///
    /// Only one recorder can be installed per process.
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            QuotaError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        describe_counter!(
            "quota_decisions_total",
            "Admission decisions by engine and outcome"
        );
        describe_counter!(
            "quota_fail_open_total",
            "Requests admitted because the limiter could not decide"
        );
        describe_counter!(
            "quota_engine_selected_total",
            "Logical operations routed to each engine"
        );
        describe_histogram!(
            "quota_lock_wait_seconds",
            "Time spent acquiring admission locks"
        );
        describe_gauge!(
            "quota_store_healthy",
            "Shared store health as seen by the selector (1 = healthy, 0 = unhealthy)"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(service.render()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Record an admission decision
pub fn record_decision(engine: &str, endpoint: &str, allowed: bool) {
    let labels = [
        ("engine", engine.to_string()),
        ("endpoint", endpoint.to_string()),
        ("outcome", if allowed { "allowed" } else { "denied" }.to_string()),
    ];
    counter!("quota_decisions_total", &labels).increment(1);
}

/// Record a request admitted without a decision
pub fn record_fail_open(engine: &str, reason: &str) {
    let labels = [
        ("engine", engine.to_string()),
        ("reason", reason.to_string()),
    ];
    counter!("quota_fail_open_total", &labels).increment(1);
}

/// Record which engine served a logical operation
pub fn record_engine_selected(engine: &str) {
    let labels = [("engine", engine.to_string())];
    counter!("quota_engine_selected_total", &labels).increment(1);
}

/// Record how long an admission lock took to acquire
pub fn record_lock_wait(seconds: f64) {
    histogram!("quota_lock_wait_seconds").record(seconds);
}

/// Record the store health observed by the selector
pub fn record_store_health(healthy: bool) {
    gauge!("quota_store_healthy").set(if healthy { 1.0 } else { 0.0 });
}
