//! Narrow adapters over the shared key/value store.
//!
//! Every adapter returns `Result<Option<T>>` (or a plain `Result`) so that a
//! value that is absent is never confused with a store that could not be
//! reached. The decision engine relies on that distinction to apply its
//! fail-open policy.
//!
//! Two implementations are provided:
//!
//! - [`redis`]: the production adapters, sharing one Redis connection manager
//! - [`memory`]: an in-process implementation of the same contracts, used as a
//!   test double and for single-node deployments

pub mod memory;
pub mod redis;

use crate::error::Result;
use crate::rate_limit::types::RateLimitConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::{debug, warn};

const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

pub use self::memory::MemoryStore;

/// Per-(endpoint, client) request counters with expiry
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value of a counter, 0 when absent
    async fn get(&self, key: &str) -> Result<u64>;

    /// Increment a counter, setting its TTL only when the increment creates it
    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64>;
}

/// Per-endpoint configuration records
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, endpoint: &str) -> Result<Option<RateLimitConfig>>;

    async fn save(&self, config: &RateLimitConfig) -> Result<()>;

    /// Delete every counter belonging to an endpoint, returning how many were removed
    async fn delete_all_counters_for_endpoint(&self, endpoint: &str) -> Result<u64>;
}

/// Proof of holding a named lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    /// Lock name
    pub name: String,
    /// Unique value identifying this acquisition
    pub token: String,
}

/// Diagnostic view of a named lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    pub name: String,
    pub held: bool,
    /// Acquisitions of this lock held through this adapter
    pub hold_count: u32,
    /// Remaining lease, when the lock is held with an expiry
    pub remaining_ttl: Option<Duration>,
}

/// Named, timeout-bounded mutual exclusion
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to acquire a lock, waiting at most `wait`. `None` means the wait elapsed.
    async fn try_acquire(&self, name: &str, wait: Duration) -> Result<Option<LockToken>>;

    /// Release a lock held by `token`. Releasing a lock that is no longer held
    /// by that token is a no-op returning `false`.
    async fn release(&self, token: &LockToken) -> Result<bool>;

    async fn is_held(&self, name: &str) -> Result<bool>;

    async fn info(&self, name: &str) -> Result<LockInfo>;
}

/// Remaining lifetime of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTtl {
    /// Entry expires after the given duration
    Expires(Duration),
    /// Entry exists without an expiry
    Persistent,
    /// Entry does not exist
    Absent,
}

/// Shared cache region fronting the configuration store
#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn ttl(&self, key: &str) -> Result<CacheTtl>;
}

/// Liveness report of the shared store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthInfo {
    /// "UP" or "DOWN"
    pub status: String,
    pub message: String,
    /// Number of keys in the store, when it could be read
    pub total_keys: Option<u64>,
    /// Milliseconds since the Unix epoch when the probe ran
    pub timestamp: u64,
}

impl HealthInfo {
    pub fn up(total_keys: u64, message: impl Into<String>) -> Self {
        Self {
            status: "UP".to_string(),
            message: message.into(),
            total_keys: Some(total_keys),
            timestamp: now_millis(),
        }
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self {
            status: "DOWN".to_string(),
            message: message.into(),
            total_keys: None,
            timestamp: now_millis(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == "UP"
    }
}

/// Single-shot liveness probe of the shared store
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn is_healthy(&self) -> Result<bool>;

    async fn health_info(&self) -> HealthInfo;
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or_default()
}

/// `now + after`, saturating at a far-future instant instead of overflowing
pub fn instant_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Scoped lock acquisition.
///
/// The lock is released by [`LockGuard::release`] on the normal path. A guard
/// dropped without an explicit release (early return, `?`, panic or a
/// cancelled task) releases the lock from a task spawned on the current
/// runtime; outside a runtime the store-side lease frees it.
pub struct LockGuard {
    lock: Arc<dyn DistributedLock>,
    token: Option<LockToken>,
}

impl LockGuard {
    /// Acquire `name`, waiting at most `wait`. `Ok(None)` means the wait elapsed.
    pub async fn acquire(
        lock: Arc<dyn DistributedLock>,
        name: &str,
        wait: Duration,
    ) -> Result<Option<Self>> {
        let token = lock.try_acquire(name, wait).await?;
        Ok(token.map(|token| Self {
            lock,
            token: Some(token),
        }))
    }

    /// Name of the held lock
    pub fn name(&self) -> &str {
        self.token.as_ref().map(|t| t.name.as_str()).unwrap_or("")
    }

    /// Release the lock now
    pub async fn release(mut self) {
        if let Some(token) = self.token.take() {
            release_logged(self.lock.as_ref(), &token).await;
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let lock = self.lock.clone();
                handle.spawn(async move {
                    release_logged(lock.as_ref(), &token).await;
                });
            }
            Err(_) => {
                warn!(
                    lock = %token.name,
                    "Lock guard dropped outside a runtime, relying on lease expiry"
                );
            }
        }
    }
}

async fn release_logged(lock: &dyn DistributedLock, token: &LockToken) {
    match lock.release(token).await {
        Ok(true) => debug!(lock = %token.name, "Lock released"),
        Ok(false) => warn!(lock = %token.name, "Lock was no longer held at release"),
        Err(e) => warn!(lock = %token.name, error = %e, "Failed to release lock"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_releases_explicitly() {
        let store = Arc::new(MemoryStore::new());
        let lock: Arc<dyn DistributedLock> = store.clone();

        let guard = LockGuard::acquire(lock.clone(), "test-lock", Duration::from_millis(100))
            .await
            .unwrap()
            .expect("lock should be free");
        assert_eq!(guard.name(), "test-lock");
        assert!(lock.is_held("test-lock").await.unwrap());

        guard.release().await;
        assert!(!lock.is_held("test-lock").await.unwrap());
    }

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let store = Arc::new(MemoryStore::new());
        let lock: Arc<dyn DistributedLock> = store.clone();

        {
            let _guard = LockGuard::acquire(lock.clone(), "drop-lock", Duration::from_millis(100))
                .await
                .unwrap()
                .expect("lock should be free");
        }

        // The release runs on a spawned task
        let reacquired = LockGuard::acquire(lock.clone(), "drop-lock", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(reacquired.is_some());
    }

    #[tokio::test]
    async fn test_guard_times_out_when_held() {
        let store = Arc::new(MemoryStore::new());
        let lock: Arc<dyn DistributedLock> = store.clone();

        let _held = lock
            .try_acquire("busy-lock", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        let guard = LockGuard::acquire(lock.clone(), "busy-lock", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(guard.is_none());
    }

    #[test]
    fn test_health_info() {
        let up = HealthInfo::up(42, "ok");
        assert!(up.is_up());
        assert_eq!(up.total_keys, Some(42));

        let down = HealthInfo::down("connection refused");
        assert!(!down.is_up());
        assert_eq!(down.total_keys, None);
    }

    #[test]
    fn test_instant_after_saturates() {
        let now = Instant::now();
        assert_eq!(instant_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert!(instant_after(now, Duration::MAX) > now + Duration::from_secs(365 * 24 * 60 * 60));
    }
}
