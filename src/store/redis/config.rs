use super::RedisStore;
use crate::error::Result;
use crate::rate_limit::types::{RateLimitConfig, DEFAULT_LOCK_TIMEOUT_MS};
use crate::store::ConfigStore;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};

const SCAN_BATCH: usize = 500;

/// Redis-backed configuration records, one hash per endpoint
pub struct RedisConfigStore {
    store: RedisStore,
}

impl RedisConfigStore {
    pub fn new(store: RedisStore) -> Self {
        Self { store }
    }
}

/// Build a configuration from its hash fields, `None` if any required field is missing or malformed
fn config_from_fields(endpoint: &str, fields: &HashMap<String, String>) -> Option<RateLimitConfig> {
    let max_requests = fields.get("maxRequests")?.parse().ok()?;
    let time_window_seconds = fields.get("timeWindowSeconds")?.parse().ok()?;
    let enabled = fields.get("enabled")?.parse().ok()?;
    let lock_timeout_millis = match fields.get("lockTimeoutMillis") {
        Some(value) => value.parse().ok()?,
        None => DEFAULT_LOCK_TIMEOUT_MS,
    };

    Some(RateLimitConfig {
        endpoint: endpoint.to_string(),
        max_requests,
        time_window_seconds,
        enabled,
        lock_timeout_millis,
    })
}

#[async_trait]
impl ConfigStore for RedisConfigStore {
    async fn get(&self, endpoint: &str) -> Result<Option<RateLimitConfig>> {
        let config_key = self.store.config_key(endpoint);
        let mut conn = self.store.connection();

        let fields = self
            .store
            .run(
                "HGETALL",
                redis::cmd("HGETALL")
                    .arg(&config_key)
                    .query_async::<_, HashMap<String, String>>(&mut conn),
            )
            .await?;

        if fields.is_empty() {
            debug!(key = %config_key, "No configuration found");
            return Ok(None);
        }

        let config = config_from_fields(endpoint, &fields);
        if config.is_none() {
            warn!(key = %config_key, "Incomplete configuration in store, ignoring it");
        }
        Ok(config)
    }

    async fn save(&self, config: &RateLimitConfig) -> Result<()> {
        let config_key = self.store.config_key(&config.endpoint);
        let mut conn = self.store.connection();

        self.store
            .run(
                "HSET",
                redis::pipe()
                    .atomic()
                    .cmd("HSET")
                    .arg(&config_key)
                    .arg("maxRequests")
                    .arg(config.max_requests)
                    .arg("timeWindowSeconds")
                    .arg(config.time_window_seconds)
                    .arg("enabled")
                    .arg(config.enabled.to_string())
                    .arg("lockTimeoutMillis")
                    .arg(config.lock_timeout_millis)
                    .ignore()
                    .cmd("PERSIST")
                    .arg(&config_key)
                    .ignore()
                    .query_async::<_, ()>(&mut conn),
            )
            .await?;

        debug!(key = %config_key, "Saved configuration");
        Ok(())
    }

    async fn delete_all_counters_for_endpoint(&self, endpoint: &str) -> Result<u64> {
        let pattern = self.store.counter_pattern(endpoint);
        let mut conn = self.store.connection();
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let (next_cursor, keys) = self
                .store
                .run(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async::<_, (u64, Vec<String>)>(&mut conn),
                )
                .await?;

            if !keys.is_empty() {
                deleted += self
                    .store
                    .run(
                        "DEL",
                        redis::cmd("DEL")
                            .arg(&keys)
                            .query_async::<_, u64>(&mut conn),
                    )
                    .await?;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!(endpoint, pattern = %pattern, deleted, "Deleted counters for endpoint");
        Ok(deleted)
    }
}
