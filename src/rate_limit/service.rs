use super::engine::RateLimitEngine;
use super::types::{RateLimitConfig, RequestInfo};
use crate::error::Result;
use crate::metrics;
use crate::store::{HealthCheck, HealthInfo};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(1000);

/// How the selector picks an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Distributed engine while the store is healthy, fallback otherwise
    #[serde(rename = "auto")]
    Auto,
    /// Always the local fallback engine
    #[serde(rename = "fallback")]
    ForceFallback,
    /// Always the distributed engine, regardless of health
    #[serde(rename = "distributed")]
    ForceDistributed,
}

impl SelectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionMode::Auto => "auto",
            SelectionMode::ForceFallback => "fallback",
            SelectionMode::ForceDistributed => "distributed",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SelectionMode::Auto => 0,
            SelectionMode::ForceFallback => 1,
            SelectionMode::ForceDistributed => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => SelectionMode::ForceFallback,
            2 => SelectionMode::ForceDistributed,
            _ => SelectionMode::Auto,
        }
    }
}

/// Diagnostic snapshot of the selector
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorStatus {
    pub mode: SelectionMode,
    /// Engine that serves calls right now
    pub active_engine: &'static str,
    /// Whether a distributed engine was configured at all
    pub distributed_available: bool,
    pub store_health: HealthInfo,
}

struct Distributed {
    engine: Arc<dyn RateLimitEngine>,
    health: Arc<dyn HealthCheck>,
}

enum Choice {
    Distributed(Arc<dyn RateLimitEngine>),
    Fallback,
}

/// Routes every call to the distributed engine or the local fallback.
///
/// In [`SelectionMode::Auto`] the store is probed before each logical
/// operation; the verdict is never cached. A probe that errors or does not
/// answer within the probe timeout selects the fallback.
pub struct ServiceSelector {
    distributed: Option<Distributed>,
    fallback: Arc<dyn RateLimitEngine>,
    mode: AtomicU8,
    probe_timeout: Duration,
}

impl ServiceSelector {
    pub fn new(
        distributed: Arc<dyn RateLimitEngine>,
        fallback: Arc<dyn RateLimitEngine>,
        health: Arc<dyn HealthCheck>,
    ) -> Self {
        info!(
            distributed = distributed.name(),
            fallback = fallback.name(),
            "Initializing rate limit service selector"
        );
        Self {
            distributed: Some(Distributed {
                engine: distributed,
                health,
            }),
            fallback,
            mode: AtomicU8::new(SelectionMode::Auto.as_u8()),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Selector without a shared store; every call is served by the fallback
    pub fn local_only(fallback: Arc<dyn RateLimitEngine>) -> Self {
        info!("Initializing local-only rate limit service selector");
        Self {
            distributed: None,
            fallback,
            mode: AtomicU8::new(SelectionMode::Auto.as_u8()),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Bound each health probe
    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn mode(&self) -> SelectionMode {
        SelectionMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    pub fn set_mode(&self, mode: SelectionMode) {
        let previous = SelectionMode::from_u8(self.mode.swap(mode.as_u8(), Ordering::SeqCst));
        if previous != mode {
            info!(from = previous.as_str(), to = mode.as_str(), "Selection mode changed");
        }
    }

    /// Always serve from the fallback engine
    pub fn force_fallback(&self) {
        self.set_mode(SelectionMode::ForceFallback);
    }

    /// Always serve from the distributed engine
    pub fn force_distributed(&self) {
        self.set_mode(SelectionMode::ForceDistributed);
    }

    /// Return to health-driven selection
    pub fn use_health_check(&self) {
        self.set_mode(SelectionMode::Auto);
    }

    pub fn has_distributed(&self) -> bool {
        self.distributed.is_some()
    }

    /// The engine that should serve the next logical operation
    pub async fn select(&self) -> Arc<dyn RateLimitEngine> {
        match self.choose().await {
            Choice::Distributed(engine) => engine,
            Choice::Fallback => self.fallback.clone(),
        }
    }

    async fn choose(&self) -> Choice {
        let Some(distributed) = &self.distributed else {
            return Choice::Fallback;
        };

        match self.mode() {
            SelectionMode::ForceFallback => Choice::Fallback,
            SelectionMode::ForceDistributed => Choice::Distributed(distributed.engine.clone()),
            SelectionMode::Auto => {
                if self.probe(distributed.health.as_ref()).await {
                    Choice::Distributed(distributed.engine.clone())
                } else {
                    Choice::Fallback
                }
            }
        }
    }

    async fn probe(&self, health: &dyn HealthCheck) -> bool {
        let healthy = match tokio::time::timeout(self.probe_timeout, health.is_healthy()).await {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(e)) => {
                warn!(error = %e, "Store health probe failed");
                false
            }
            Err(_) => {
                warn!(timeout = ?self.probe_timeout, "Store health probe timed out");
                false
            }
        };

        if !healthy {
            debug!("Store unhealthy, using fallback rate limiter");
        }
        metrics::record_store_health(healthy);
        healthy
    }

    pub async fn is_request_allowed(&self, request: &RequestInfo) -> bool {
        let engine = self.select().await;
        metrics::record_engine_selected(engine.name());
        engine.is_request_allowed(request).await
    }

    /// Update an endpoint's configuration on the selected engine.
    ///
    /// Updates applied to the distributed engine are mirrored into the
    /// fallback so that it enforces the same quotas once selected.
    pub async fn update_configuration(
        &self,
        endpoint: &str,
        max_requests: u32,
        time_window_seconds: u64,
        enabled: bool,
    ) -> Result<RateLimitConfig> {
        match self.choose().await {
            Choice::Distributed(engine) => {
                metrics::record_engine_selected(engine.name());
                let config = engine
                    .update_configuration(endpoint, max_requests, time_window_seconds, enabled)
                    .await?;

                if let Err(e) = self
                    .fallback
                    .update_configuration(endpoint, max_requests, time_window_seconds, enabled)
                    .await
                {
                    warn!(endpoint, error = %e, "Failed to mirror configuration into fallback");
                }

                Ok(config)
            }
            Choice::Fallback => {
                metrics::record_engine_selected(self.fallback.name());
                self.fallback
                    .update_configuration(endpoint, max_requests, time_window_seconds, enabled)
                    .await
            }
        }
    }

    pub async fn get_configuration(&self, endpoint: &str) -> Result<Option<RateLimitConfig>> {
        let engine = self.select().await;
        metrics::record_engine_selected(engine.name());
        engine.get_configuration(endpoint).await
    }

    /// Diagnostic report of the shared store
    pub async fn health_info(&self) -> HealthInfo {
        match &self.distributed {
            Some(distributed) => {
                match tokio::time::timeout(self.probe_timeout, distributed.health.health_info())
                    .await
                {
                    Ok(info) => info,
                    Err(_) => HealthInfo::down("Store health probe timed out"),
                }
            }
            None => HealthInfo::down("No shared store configured"),
        }
    }

    pub async fn status(&self) -> SelectorStatus {
        let active_engine = self.select().await.name();
        SelectorStatus {
            mode: self.mode(),
            active_engine,
            distributed_available: self.has_distributed(),
            store_health: self.health_info().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuotaError;
    use crate::rate_limit::distributed::DistributedRateLimiter;
    use crate::rate_limit::local::LocalRateLimiter;
    use crate::store::{CounterStore, MemoryStore};
    use async_trait::async_trait;

    struct FailingHealth;

    #[async_trait]
    impl HealthCheck for FailingHealth {
        async fn is_healthy(&self) -> Result<bool> {
            Err(QuotaError::Store("connection refused".to_string()))
        }

        async fn health_info(&self) -> HealthInfo {
            HealthInfo::down("connection refused")
        }
    }

    struct HangingHealth;

    #[async_trait]
    impl HealthCheck for HangingHealth {
        async fn is_healthy(&self) -> Result<bool> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(true)
        }

        async fn health_info(&self) -> HealthInfo {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            HealthInfo::up(0, "late")
        }
    }

    fn selector_with(store: Arc<MemoryStore>, health: Arc<dyn HealthCheck>) -> ServiceSelector {
        let distributed = Arc::new(DistributedRateLimiter::from_store(store));
        ServiceSelector::new(distributed, Arc::new(LocalRateLimiter::new()), health)
    }

    fn selector() -> (Arc<MemoryStore>, ServiceSelector) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), selector_with(store.clone(), store))
    }

    #[tokio::test]
    async fn test_healthy_store_selects_distributed() {
        let (_store, selector) = selector();
        assert_eq!(selector.select().await.name(), "distributed");
    }

    #[tokio::test]
    async fn test_unhealthy_store_selects_fallback() {
        let (store, selector) = selector();
        store.set_available(false);
        assert_eq!(selector.select().await.name(), "local");

        // Health is probed per call, never cached
        store.set_available(true);
        assert_eq!(selector.select().await.name(), "distributed");
    }

    #[tokio::test]
    async fn test_probe_error_selects_fallback() {
        let store = Arc::new(MemoryStore::new());
        let selector = selector_with(store, Arc::new(FailingHealth));
        assert_eq!(selector.select().await.name(), "local");
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_selects_fallback() {
        let store = Arc::new(MemoryStore::new());
        let selector = selector_with(store, Arc::new(HangingHealth))
            .with_probe_timeout(Duration::from_millis(100));

        assert_eq!(selector.select().await.name(), "local");
        assert!(!selector.health_info().await.is_up());
    }

    #[tokio::test]
    async fn test_overrides() {
        let (store, selector) = selector();
        store.set_available(false);

        selector.force_distributed();
        assert_eq!(selector.mode(), SelectionMode::ForceDistributed);
        assert_eq!(selector.select().await.name(), "distributed");

        store.set_available(true);
        selector.force_fallback();
        assert_eq!(selector.select().await.name(), "local");

        selector.use_health_check();
        assert_eq!(selector.mode(), SelectionMode::Auto);
        assert_eq!(selector.select().await.name(), "distributed");
    }

    #[tokio::test]
    async fn test_local_only_always_uses_fallback() {
        let selector = ServiceSelector::local_only(Arc::new(LocalRateLimiter::new()));
        selector.force_distributed();

        assert!(!selector.has_distributed());
        assert_eq!(selector.select().await.name(), "local");
        assert!(!selector.health_info().await.is_up());
    }

    #[tokio::test]
    async fn test_update_is_mirrored_into_fallback() {
        let (store, selector) = selector();
        selector
            .update_configuration("/api/test", 1, 60, true)
            .await
            .unwrap();

        // The store goes away; the fallback still knows the quota
        store.set_available(false);
        let request = RequestInfo::new("/api/test", "c", "req-1");
        assert!(selector.is_request_allowed(&request).await);
        assert!(!selector.is_request_allowed(&request).await);

        let config = selector.get_configuration("/api/test").await.unwrap().unwrap();
        assert_eq!(config.max_requests, 1);
    }

    #[tokio::test]
    async fn test_unhealthy_store_is_never_touched() {
        let (store, selector) = selector();
        selector
            .update_configuration("/api/test", 5, 60, true)
            .await
            .unwrap();

        store.set_available(false);
        let request = RequestInfo::new("/api/test", "c", "req-1");
        assert!(selector.is_request_allowed(&request).await);

        store.set_available(true);
        assert_eq!(CounterStore::get(store.as_ref(), "/api/test:c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_status() {
        let (_store, selector) = selector();
        let status = selector.status().await;
        assert_eq!(status.mode, SelectionMode::Auto);
        assert_eq!(status.active_engine, "distributed");
        assert!(status.distributed_available);
        assert!(status.store_health.is_up());

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["mode"], "auto");
        assert_eq!(value["activeEngine"], "distributed");
    }

    #[test]
    fn test_mode_serde() {
        let mode: SelectionMode = serde_json::from_str("\"fallback\"").unwrap();
        assert_eq!(mode, SelectionMode::ForceFallback);
        assert_eq!(serde_json::to_string(&SelectionMode::ForceDistributed).unwrap(), "\"distributed\"");
        assert!(serde_json::from_str::<SelectionMode>("\"other\"").is_err());
    }
}
