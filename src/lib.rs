pub mod admin;
pub mod config;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod rate_limit;
pub mod store;

use crate::admin::AdminState;
use crate::config::{AppConfig, EndpointLimit};
use crate::error::{QuotaError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::observability::request_id_middleware;
use crate::rate_limit::{
    rate_limit_middleware, DistributedRateLimiter, LocalRateLimiter, RateLimitEngine,
    RateLimitLayer, ServiceSelector,
};
use crate::store::redis::{
    RedisCache, RedisConfigStore, RedisCounterStore, RedisHealthCheck, RedisLock, RedisStore,
};
use axum::{middleware, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Build the service selector described by the configuration.
///
/// Without a `store` section, or when the store stays unreachable after the
/// connection retries, every call is served by the local engine.
pub async fn build_selector(config: &AppConfig) -> Arc<ServiceSelector> {
    let limits = &config.rate_limiting;
    let lock_timeout = Duration::from_millis(limits.lock_timeout_ms);
    let fallback: Arc<dyn RateLimitEngine> =
        Arc::new(LocalRateLimiter::new().with_lock_timeout(lock_timeout));

    let Some(store_config) = &config.store else {
        info!("No shared store configured, rate limiting is local to this instance");
        return Arc::new(ServiceSelector::local_only(fallback));
    };

    let store = match RedisStore::connect(store_config, &limits.key_prefix).await {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "Shared store unreachable, rate limiting is local to this instance");
            return Arc::new(ServiceSelector::local_only(fallback));
        }
    };

    let cache_ttl = match limits.cache_ttl_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let lock = RedisLock::new(
        store.clone(),
        Duration::from_millis(limits.lock_lease_ms),
        Duration::from_millis(limits.lock_retry_interval_ms),
    );
    let distributed = DistributedRateLimiter::new(
        Arc::new(RedisCounterStore::new(store.clone())),
        Arc::new(RedisConfigStore::new(store.clone())),
        Arc::new(lock),
        Arc::new(RedisCache::new(store.clone(), &limits.cache_region)),
    )
    .with_lock_timeout(lock_timeout)
    .with_config_cache_ttl(cache_ttl);

    let probe_timeout = Duration::from_millis(store_config.health_probe_timeout_ms);
    let health = RedisHealthCheck::new(store, probe_timeout);

    Arc::new(
        ServiceSelector::new(Arc::new(distributed), fallback, Arc::new(health))
            .with_probe_timeout(probe_timeout),
    )
}

/// Seed startup limits through the selector; failures are logged, not fatal
pub async fn seed_defaults(selector: &ServiceSelector, limits: &[EndpointLimit]) {
    for limit in limits {
        match selector
            .update_configuration(
                &limit.endpoint,
                limit.max_requests,
                limit.time_window_seconds,
                limit.enabled,
            )
            .await
        {
            Ok(config) => info!(
                endpoint = %config.endpoint,
                max_requests = config.max_requests,
                time_window_seconds = config.time_window_seconds,
                "Seeded rate limit"
            ),
            Err(e) => warn!(endpoint = %limit.endpoint, error = %e, "Failed to seed rate limit"),
        }
    }
}

/// Assemble the HTTP application
pub fn build_app(
    config: &AppConfig,
    selector: Arc<ServiceSelector>,
    metrics: Option<MetricsService>,
) -> Router {
    let limits = &config.rate_limiting;
    let layer = RateLimitLayer::new(
        selector.clone(),
        limits.protected_prefix.clone(),
        limits.admin_prefix.clone(),
    );

    let mut app = admin::routes(AdminState::new(selector));
    if let Some(metrics) = metrics {
        app = app.merge(
            Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(metrics),
        );
    }

    // Outermost layer runs first: request id before admission
    app.layer(middleware::from_fn_with_state(layer, rate_limit_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TimeoutLayer::new(Duration::from_secs(config.server.timeout_secs)))
        .layer(TraceLayer::new_for_http())
}

/// Initialize the quota gate server
pub async fn init_server(config: AppConfig) -> Result<()> {
    // Validate configuration
    config.validate()?;

    info!("Starting quota gate");

    let metrics = if config.metrics.enabled {
        Some(MetricsService::new()?)
    } else {
        None
    };

    let selector = build_selector(&config).await;
    seed_defaults(&selector, &config.rate_limiting.defaults).await;

    let app = build_app(&config, selector, metrics);

    // Bind and serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(QuotaError::Io)?;

    info!(address = %addr, "Quota gate ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| QuotaError::Internal(format!("Server error: {}", e)))?;

    info!("Quota gate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
