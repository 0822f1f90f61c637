use super::cache_aside::{read_through, write_behind};
use super::engine::RateLimitEngine;
use super::types::{
    config_lock_name, normalize_endpoint, request_lock_name, RateLimitConfig, RequestInfo,
    DEFAULT_LOCK_TIMEOUT_MS,
};
use crate::error::{QuotaError, Result};
use crate::metrics;
use crate::store::{
    ConfigStore, CounterStore, DistributedCache, DistributedLock, LockGuard,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const ENGINE_NAME: &str = "distributed";

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// No configuration exists for the endpoint
    Unlimited,
    /// Configuration exists but is not enforced
    Disabled,
    /// Counted; carries the counter value after the increment
    Allowed(u64),
    /// Quota exhausted; carries the counter value that was observed
    Denied(u64),
    /// The per-key lock could not be taken in time
    LockTimeout,
}

/// Fixed-window decision engine coordinating through the shared store.
///
/// The read-check-increment of every admission runs under a per-key
/// distributed lock so that instances sharing the store never both admit the
/// last slot of a window. Configuration is read cache-aside and written under
/// a per-endpoint lock in a separate namespace.
pub struct DistributedRateLimiter {
    counters: Arc<dyn CounterStore>,
    configs: Arc<dyn ConfigStore>,
    lock: Arc<dyn DistributedLock>,
    cache: Arc<dyn DistributedCache>,
    /// Lock timeout given to new configurations and wait for the config lock
    lock_timeout: Duration,
    /// TTL of cached configuration entries
    config_cache_ttl: Option<Duration>,
}

impl DistributedRateLimiter {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        configs: Arc<dyn ConfigStore>,
        lock: Arc<dyn DistributedLock>,
        cache: Arc<dyn DistributedCache>,
    ) -> Self {
        Self {
            counters,
            configs,
            lock,
            cache,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            config_cache_ttl: None,
        }
    }

    /// Build an engine whose adapters are all served by one store
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CounterStore + ConfigStore + DistributedLock + DistributedCache + 'static,
    {
        Self::new(store.clone(), store.clone(), store.clone(), store)
    }

    /// Set the lock timeout applied to new configurations and config updates
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Set the TTL of cached configuration entries
    pub fn with_config_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.config_cache_ttl = ttl;
        self
    }

    async fn load_config(&self, endpoint: &str) -> Result<Option<RateLimitConfig>> {
        read_through(self.cache.as_ref(), endpoint, self.config_cache_ttl, || {
            self.configs.get(endpoint)
        })
        .await
    }

    async fn check(&self, request: &RequestInfo) -> Result<Admission> {
        let Some(config) = self.load_config(request.config_key()).await? else {
            return Ok(Admission::Unlimited);
        };
        if !config.enabled {
            return Ok(Admission::Disabled);
        }

        let key = request.rate_limit_key();
        let started = Instant::now();
        let guard = LockGuard::acquire(
            self.lock.clone(),
            &request_lock_name(&key),
            config.lock_timeout(),
        )
        .await?;
        let Some(guard) = guard else {
            return Ok(Admission::LockTimeout);
        };
        let waited = started.elapsed();
        metrics::record_lock_wait(waited.as_secs_f64());
        debug!(lock = guard.name(), waited = ?waited, "Admission lock acquired");

        let admission = self.count(&key, &config).await;
        guard.release().await;
        admission
    }

    /// Critical section: must run with the request lock held
    async fn count(&self, key: &str, config: &RateLimitConfig) -> Result<Admission> {
        let current = self.counters.get(key).await?;
        if config.has_reached_limit(current) {
            return Ok(Admission::Denied(current));
        }

        let updated = self.counters.increment_with_ttl(key, config.window()).await?;
        Ok(Admission::Allowed(updated))
    }

    /// Critical section: must run with the config lock held
    async fn apply(&self, config: &RateLimitConfig) -> Result<()> {
        self.configs.save(config).await?;
        write_behind(
            self.cache.as_ref(),
            &config.endpoint,
            config,
            self.config_cache_ttl,
        )
        .await;

        if !config.enabled {
            let cleared = self
                .configs
                .delete_all_counters_for_endpoint(&config.endpoint)
                .await?;
            info!(
                endpoint = %config.endpoint,
                cleared,
                "Rate limiting disabled, counters cleared"
            );
        }

        Ok(())
    }
}

#[async_trait]
impl RateLimitEngine for DistributedRateLimiter {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    async fn is_request_allowed(&self, request: &RequestInfo) -> bool {
        let request = request.normalized();

        match self.check(&request).await {
            Ok(Admission::Unlimited) | Ok(Admission::Disabled) => true,
            Ok(Admission::Allowed(count)) => {
                debug!(
                    key = %request.rate_limit_key(),
                    request_id = %request.request_id,
                    count,
                    "Request allowed"
                );
                metrics::record_decision(ENGINE_NAME, &request.endpoint, true);
                true
            }
            Ok(Admission::Denied(count)) => {
                warn!(
                    key = %request.rate_limit_key(),
                    request_id = %request.request_id,
                    count,
                    "Rate limit exceeded"
                );
                metrics::record_decision(ENGINE_NAME, &request.endpoint, false);
                false
            }
            Ok(Admission::LockTimeout) => {
                warn!(
                    key = %request.rate_limit_key(),
                    request_id = %request.request_id,
                    "Could not acquire rate limit lock in time, allowing request"
                );
                metrics::record_fail_open(ENGINE_NAME, "lock_timeout");
                true
            }
            Err(e) => {
                warn!(
                    key = %request.rate_limit_key(),
                    request_id = %request.request_id,
                    error = %e,
                    "Rate limit check failed, allowing request"
                );
                let reason = if e.is_store_failure() {
                    "store_error"
                } else {
                    "internal_error"
                };
                metrics::record_fail_open(ENGINE_NAME, reason);
                true
            }
        }
    }

    async fn update_configuration(
        &self,
        endpoint: &str,
        max_requests: u32,
        time_window_seconds: u64,
        enabled: bool,
    ) -> Result<RateLimitConfig> {
        let config = RateLimitConfig::new(endpoint, max_requests, time_window_seconds, enabled)
            .with_lock_timeout(self.lock_timeout);
        config.validate()?;

        let guard = LockGuard::acquire(
            self.lock.clone(),
            &config_lock_name(&config.endpoint),
            self.lock_timeout,
        )
        .await?
        .ok_or_else(|| {
            QuotaError::LockUnavailable(format!(
                "configuration of {} is being updated concurrently",
                config.endpoint
            ))
        })?;

        debug!(lock = guard.name(), "Configuration lock acquired");
        let applied = self.apply(&config).await;
        guard.release().await;
        applied?;

        info!(
            endpoint = %config.endpoint,
            max_requests = config.max_requests,
            time_window_seconds = config.time_window_seconds,
            enabled = config.enabled,
            "Rate limit configuration updated"
        );

        Ok(config)
    }

    async fn get_configuration(&self, endpoint: &str) -> Result<Option<RateLimitConfig>> {
        self.load_config(&normalize_endpoint(endpoint)).await
    }
}
