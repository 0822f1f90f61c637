use super::lua_scripts::INCREMENT_WITH_TTL_SCRIPT;
use super::{expire_millis, RedisStore};
use crate::error::Result;
use crate::store::CounterStore;
use async_trait::async_trait;
use redis::Script;
use std::time::Duration;
use tracing::debug;

/// Redis-backed request counters
pub struct RedisCounterStore {
    store: RedisStore,
    increment_script: Script,
}

impl RedisCounterStore {
    pub fn new(store: RedisStore) -> Self {
        Self {
            store,
            increment_script: Script::new(INCREMENT_WITH_TTL_SCRIPT),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<u64> {
        let redis_key = self.store.counter_key(key);
        let mut conn = self.store.connection();

        let count = self
            .store
            .run(
                "GET",
                redis::cmd("GET")
                    .arg(&redis_key)
                    .query_async::<_, Option<u64>>(&mut conn),
            )
            .await?
            .unwrap_or(0);

        debug!(key = %redis_key, count, "Read request counter");
        Ok(count)
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64> {
        let redis_key = self.store.counter_key(key);
        let mut conn = self.store.connection();

        let count = self
            .store
            .run(
                "EVALSHA increment",
                self.increment_script
                    .key(&redis_key)
                    .arg(expire_millis(ttl)?)
                    .invoke_async::<_, u64>(&mut conn),
            )
            .await?;

        debug!(key = %redis_key, count, ttl_secs = ttl.as_secs(), "Incremented request counter");
        Ok(count)
    }
}
