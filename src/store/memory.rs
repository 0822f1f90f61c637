use super::{
    instant_after, CacheTtl, ConfigStore, CounterStore, DistributedCache, DistributedLock,
    HealthCheck, HealthInfo, LockInfo, LockToken,
};
use crate::error::{QuotaError, Result};
use crate::rate_limit::types::RateLimitConfig;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use moka::future::Cache;
use moka::Expiry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(30);
const DEFAULT_LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);
const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    value: u64,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

#[derive(Debug, Clone)]
struct LockEntry {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    ttl: Option<Duration>,
    inserted_at: std::time::Instant,
}

/// Gives each cache entry its own time-to-live
struct CacheEntryExpiry;

impl Expiry<String, CacheEntry> for CacheEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-process implementation of every store adapter.
///
/// Counters, configuration and locks live in `DashMap`s; the cache region is a
/// `moka` cache with per-entry expiry. Marking the store unavailable makes
/// every operation fail the way a lost network connection would.
pub struct MemoryStore {
    counters: DashMap<String, CounterEntry>,
    configs: DashMap<String, RateLimitConfig>,
    locks: DashMap<String, LockEntry>,
    cache: Cache<String, CacheEntry>,
    available: AtomicBool,
    lock_lease: Duration,
    lock_retry_interval: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store with default lock timings
    pub fn new() -> Self {
        Self::with_lock_settings(DEFAULT_LOCK_LEASE, DEFAULT_LOCK_RETRY_INTERVAL)
    }

    /// Create an empty store with custom lock lease and polling interval
    pub fn with_lock_settings(lock_lease: Duration, lock_retry_interval: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(DEFAULT_CACHE_CAPACITY)
            .expire_after(CacheEntryExpiry)
            .build();

        Self {
            counters: DashMap::new(),
            configs: DashMap::new(),
            locks: DashMap::new(),
            cache,
            available: AtomicBool::new(true),
            lock_lease,
            lock_retry_interval,
        }
    }

    /// Simulate losing (or regaining) the connection to the store
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of live keys across counters, configuration and locks
    pub fn key_count(&self) -> u64 {
        let now = Instant::now();
        let counters = self.counters.iter().filter(|e| !e.is_expired(now)).count();
        let locks = self.locks.iter().filter(|e| e.expires_at > now).count();
        (counters + self.configs.len() + locks) as u64
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(QuotaError::Store("memory store unavailable".to_string()))
        }
    }

    fn try_lock_once(&self, name: &str) -> Option<LockToken> {
        let now = Instant::now();
        let token = Uuid::new_v4().to_string();
        let entry = LockEntry {
            token: token.clone(),
            expires_at: instant_after(now, self.lock_lease),
        };

        match self.locks.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > now {
                    return None;
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }

        Some(LockToken {
            name: name.to_string(),
            token,
        })
    }

    fn live_lock(&self, name: &str) -> Option<LockEntry> {
        let now = Instant::now();
        self.locks
            .get(name)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<u64> {
        self.ensure_available()?;
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value)
            .unwrap_or(0))
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert(CounterEntry {
                value: 0,
                expires_at: None,
            });

        if entry.is_expired(now) {
            entry.value = 0;
            entry.expires_at = None;
        }

        entry.value += 1;
        if entry.value == 1 {
            entry.expires_at = Some(instant_after(now, ttl));
        }

        Ok(entry.value)
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get(&self, endpoint: &str) -> Result<Option<RateLimitConfig>> {
        self.ensure_available()?;
        Ok(self.configs.get(endpoint).map(|c| c.value().clone()))
    }

    async fn save(&self, config: &RateLimitConfig) -> Result<()> {
        self.ensure_available()?;
        self.configs.insert(config.endpoint.clone(), config.clone());
        Ok(())
    }

    async fn delete_all_counters_for_endpoint(&self, endpoint: &str) -> Result<u64> {
        self.ensure_available()?;
        let prefix = format!("{}:", endpoint);
        let before = self.counters.len();
        self.counters.retain(|key, _| !key.starts_with(&prefix));
        let removed = before.saturating_sub(self.counters.len()) as u64;
        debug!(endpoint, removed, "Deleted counters for endpoint");
        Ok(removed)
    }
}

#[async_trait]
impl DistributedLock for MemoryStore {
    async fn try_acquire(&self, name: &str, wait: Duration) -> Result<Option<LockToken>> {
        let deadline = instant_after(Instant::now(), wait);

        loop {
            self.ensure_available()?;

            if let Some(token) = self.try_lock_once(name) {
                return Ok(Some(token));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.lock_retry_interval.min(deadline - now)).await;
        }
    }

    async fn release(&self, token: &LockToken) -> Result<bool> {
        self.ensure_available()?;
        Ok(self
            .locks
            .remove_if(&token.name, |_, entry| entry.token == token.token)
            .is_some())
    }

    async fn is_held(&self, name: &str) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.live_lock(name).is_some())
    }

    async fn info(&self, name: &str) -> Result<LockInfo> {
        self.ensure_available()?;
        let lock = self.live_lock(name);
        Ok(LockInfo {
            name: name.to_string(),
            held: lock.is_some(),
            hold_count: u32::from(lock.is_some()),
            remaining_ttl: lock.map(|entry| entry.expires_at.saturating_duration_since(Instant::now())),
        })
    }
}

#[async_trait]
impl DistributedCache for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_available()?;
        Ok(self.cache.get(key).await.map(|entry| entry.value))
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.ensure_available()?;
        let entry = CacheEntry {
            value,
            ttl,
            inserted_at: std::time::Instant::now(),
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.ensure_available()?;
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.cache.contains_key(key))
    }

    async fn ttl(&self, key: &str) -> Result<CacheTtl> {
        self.ensure_available()?;
        Ok(match self.cache.get(key).await {
            Some(CacheEntry {
                ttl: Some(ttl),
                inserted_at,
                ..
            }) => CacheTtl::Expires(ttl.saturating_sub(inserted_at.elapsed())),
            Some(_) => CacheTtl::Persistent,
            None => CacheTtl::Absent,
        })
    }
}

#[async_trait]
impl HealthCheck for MemoryStore {
    async fn is_healthy(&self) -> Result<bool> {
        Ok(self.is_available())
    }

    async fn health_info(&self) -> HealthInfo {
        if self.is_available() {
            let total = self.key_count();
            HealthInfo::up(total, format!("Memory store is healthy - Total Keys: {}", total))
        } else {
            HealthInfo::down("Memory store health check failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counter_absent_is_zero() {
        let store = MemoryStore::new();
        assert_eq!(CounterStore::get(&store, "/api/test:1.2.3.4").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_ttl_set_only_on_creation() {
        let store = MemoryStore::new();
        let key = "/api/test:1.2.3.4";

        assert_eq!(store.increment_with_ttl(key, Duration::from_secs(10)).await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(6)).await;

        // A later increment with a longer TTL must not extend the window
        assert_eq!(store.increment_with_ttl(key, Duration::from_secs(60)).await.unwrap(), 2);
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(CounterStore::get(&store, key).await.unwrap(), 0);
        assert_eq!(store.increment_with_ttl(key, Duration::from_secs(10)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_counters_for_endpoint() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.increment_with_ttl("/api/test:1.2.3.4", ttl).await.unwrap();
        store.increment_with_ttl("/api/test:5.6.7.8", ttl).await.unwrap();
        store.increment_with_ttl("/api/test/nested:1.2.3.4", ttl).await.unwrap();
        store.increment_with_ttl("/api/other:1.2.3.4", ttl).await.unwrap();

        let removed = store.delete_all_counters_for_endpoint("/api/test").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(CounterStore::get(&store, "/api/test:1.2.3.4").await.unwrap(), 0);
        assert_eq!(CounterStore::get(&store, "/api/test/nested:1.2.3.4").await.unwrap(), 1);
        assert_eq!(CounterStore::get(&store, "/api/other:1.2.3.4").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let store = MemoryStore::new();
        assert!(ConfigStore::get(&store, "/api/test").await.unwrap().is_none());

        let config = RateLimitConfig::new("/api/test", 2, 60, true);
        store.save(&config).await.unwrap();
        assert_eq!(ConfigStore::get(&store, "/api/test").await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn test_lock_release_is_holder_checked_and_idempotent() {
        let store = MemoryStore::new();
        let token = store
            .try_acquire("lock-a", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        let impostor = LockToken {
            name: "lock-a".to_string(),
            token: "someone-else".to_string(),
        };
        assert!(!store.release(&impostor).await.unwrap());
        assert!(store.is_held("lock-a").await.unwrap());

        assert!(store.release(&token).await.unwrap());
        assert!(!store.release(&token).await.unwrap());
        assert!(!store.is_held("lock-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_info() {
        let store = MemoryStore::new();
        let info = store.info("lock-b").await.unwrap();
        assert!(!info.held);
        assert_eq!(info.hold_count, 0);
        assert_eq!(info.remaining_ttl, None);

        let _token = store
            .try_acquire("lock-b", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let info = store.info("lock-b").await.unwrap();
        assert!(info.held);
        assert_eq!(info.hold_count, 1);
        assert!(info.remaining_ttl.unwrap() <= DEFAULT_LOCK_LEASE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_lease_expires() {
        let store = MemoryStore::with_lock_settings(Duration::from_secs(1), Duration::from_millis(5));
        let _orphan = store
            .try_acquire("lock-c", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        let token = store.try_acquire("lock-c", Duration::from_millis(10)).await.unwrap();
        assert!(token.is_some());
    }

    #[tokio::test]
    async fn test_cache_operations() {
        let store = MemoryStore::new();
        assert_eq!(DistributedCache::get(&store, "k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), CacheTtl::Absent);

        store.put("k", "v".to_string(), None).await.unwrap();
        assert_eq!(DistributedCache::get(&store, "k").await.unwrap(), Some("v".to_string()));
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.ttl("k").await.unwrap(), CacheTtl::Persistent);

        store
            .put("k", "v2".to_string(), Some(Duration::from_secs(600)))
            .await
            .unwrap();
        match store.ttl("k").await.unwrap() {
            CacheTtl::Expires(remaining) => assert!(remaining <= Duration::from_secs(600)),
            other => panic!("expected an expiring entry, got {:?}", other),
        }

        store.remove("k").await.unwrap();
        assert_eq!(DistributedCache::get(&store, "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_instead_of_reporting_absent() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(CounterStore::get(&store, "k").await.is_err());
        assert!(ConfigStore::get(&store, "/api/test").await.is_err());
        assert!(DistributedCache::get(&store, "k").await.is_err());
        assert!(store.try_acquire("l", Duration::from_millis(10)).await.is_err());
        assert!(!store.is_healthy().await.unwrap());
        assert!(!store.health_info().await.is_up());
    }
}
