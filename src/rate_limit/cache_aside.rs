use crate::error::Result;
use crate::store::DistributedCache;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Read `key` through the cache.
///
/// Tries the cache first; on a miss loads from the authoritative store and,
/// when found, populates the cache before returning. Cache failures (read,
/// decode or write) degrade to the store and never fail the read. Store
/// failures are returned to the caller.
pub async fn read_through<T, F, Fut>(
    cache: &dyn DistributedCache,
    key: &str,
    ttl: Option<Duration>,
    load: F,
) -> Result<Option<T>>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    match cache.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
            Ok(value) => {
                debug!(key, "Served from cache");
                return Ok(Some(value));
            }
            Err(e) => warn!(key, error = %e, "Discarding undecodable cache entry"),
        },
        Ok(None) => debug!(key, "Cache miss"),
        Err(e) => warn!(key, error = %e, "Cache unavailable, reading from store"),
    }

    let Some(value) = load().await? else {
        return Ok(None);
    };

    write_behind(cache, key, &value, ttl).await;
    Ok(Some(value))
}

/// Store `value` in the cache, logging instead of failing
pub async fn write_behind<T: Serialize>(
    cache: &dyn DistributedCache,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(key, error = %e, "Failed to encode cache entry");
            return;
        }
    };

    if let Err(e) = cache.put(key, raw, ttl).await {
        warn!(key, error = %e, "Failed to update cache entry");
    }
}
