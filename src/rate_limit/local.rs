use super::engine::RateLimitEngine;
use super::types::{normalize_endpoint, RateLimitConfig, RequestInfo, DEFAULT_LOCK_TIMEOUT_MS};
use crate::error::Result;
use crate::metrics;
use crate::store::instant_after;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const ENGINE_NAME: &str = "local";

/// How often admissions sweep windows that have already reset
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One fixed window of one rate limit key
#[derive(Debug, Clone, Copy)]
struct FixedWindow {
    count: u64,
    resets_at: Instant,
}

impl FixedWindow {
    fn starting(now: Instant, config: &RateLimitConfig) -> Self {
        Self {
            count: 0,
            resets_at: instant_after(now, config.window()),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.resets_at <= now
    }
}

/// In-process fallback engine.
///
/// Same fixed-window algorithm as the distributed engine, but counters and
/// configuration live in this process only. Each admission runs inside a
/// single `DashMap` entry, which serializes concurrent checks of one key.
/// Windows that have reset are swept from the map during admissions, at most
/// once per minute, so idle clients do not accumulate.
pub struct LocalRateLimiter {
    configs: DashMap<String, RateLimitConfig>,
    windows: DashMap<String, FixedWindow>,
    next_sweep: Mutex<Instant>,
    lock_timeout: Duration,
}

impl Default for LocalRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRateLimiter {
    pub fn new() -> Self {
        Self {
            configs: DashMap::new(),
            windows: DashMap::new(),
            next_sweep: Mutex::new(instant_after(Instant::now(), SWEEP_INTERVAL)),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }

    /// Set the lock timeout recorded on new configurations
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Number of tracked windows (for monitoring)
    pub fn active_windows(&self) -> usize {
        self.windows.len()
    }

    /// Drop windows that have already reset, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_expired(now));
        before.saturating_sub(self.windows.len())
    }

    /// Purge expired windows if the sweep interval has elapsed.
    ///
    /// Must not be called while holding a `windows` entry.
    fn sweep_if_due(&self, now: Instant) {
        let due = match self.next_sweep.try_lock() {
            Ok(mut next_sweep) if *next_sweep <= now => {
                *next_sweep = instant_after(now, SWEEP_INTERVAL);
                true
            }
            _ => false,
        };

        if due {
            let purged = self.purge_expired_at(now);
            if purged > 0 {
                debug!(purged, remaining = self.windows.len(), "Swept expired local windows");
            }
        }
    }

    fn clear_endpoint(&self, endpoint: &str) -> usize {
        let prefix = format!("{}:", endpoint);
        let before = self.windows.len();
        self.windows.retain(|key, _| !key.starts_with(&prefix));
        before.saturating_sub(self.windows.len())
    }

    /// Count one request against its window, returning the decision and count
    fn admit(&self, key: String, config: &RateLimitConfig) -> (bool, u64) {
        let now = Instant::now();
        self.sweep_if_due(now);

        let mut window = self
            .windows
            .entry(key)
            .or_insert_with(|| FixedWindow::starting(now, config));

        if window.is_expired(now) {
            *window = FixedWindow::starting(now, config);
        }

        if config.has_reached_limit(window.count) {
            return (false, window.count);
        }

        window.count += 1;
        (true, window.count)
    }
}

#[async_trait]
impl RateLimitEngine for LocalRateLimiter {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    async fn is_request_allowed(&self, request: &RequestInfo) -> bool {
        let request = request.normalized();
        let config = match self.configs.get(request.config_key()) {
            Some(config) => config.value().clone(),
            None => return true,
        };
        if !config.enabled {
            return true;
        }

        let key = request.rate_limit_key();
        let (allowed, count) = self.admit(key.clone(), &config);

        if allowed {
            debug!(key = %key, count, "Request allowed by local limiter");
        } else {
            warn!(key = %key, count, "Rate limit exceeded (local)");
        }
        metrics::record_decision(ENGINE_NAME, &request.endpoint, allowed);

        allowed
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

        self.configs.insert(config.endpoint.clone(), config.clone());
        if !config.enabled {
            let cleared = self.clear_endpoint(&config.endpoint);
            debug!(endpoint = %config.endpoint, cleared, "Local windows cleared");
        }

        info!(
            endpoint = %config.endpoint,
            max_requests = config.max_requests,
            time_window_seconds = config.time_window_seconds,
            enabled = config.enabled,
            "Local rate limit configuration updated"
        );

        Ok(config)
    }

    async fn get_configuration(&self, endpoint: &str) -> Result<Option<RateLimitConfig>> {
        Ok(self
            .configs
            .get(&normalize_endpoint(endpoint))
            .map(|config| config.value().clone()))
    }
}
