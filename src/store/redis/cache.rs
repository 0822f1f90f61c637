use super::{expire_millis, RedisStore};
use crate::error::Result;
use crate::store::{CacheTtl, DistributedCache};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Redis-backed shared cache region
pub struct RedisCache {
    store: RedisStore,
    region: String,
}

impl RedisCache {
    pub fn new(store: RedisStore, region: &str) -> Self {
        Self {
            store,
            region: region.to_string(),
        }
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}:{}", self.region, key)
    }
}

#[async_trait]
impl DistributedCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entry_key = self.entry_key(key);
        let mut conn = self.store.connection();

        let value = self
            .store
            .run(
                "GET",
                redis::cmd("GET")
                    .arg(&entry_key)
                    .query_async::<_, Option<String>>(&mut conn),
            )
            .await?;

        if value.is_some() {
            debug!(key = %entry_key, "Cache hit");
        } else {
            debug!(key = %entry_key, "Cache miss");
        }
        Ok(value)
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let entry_key = self.entry_key(key);
        let mut conn = self.store.connection();

        let mut cmd = redis::cmd("SET");
        cmd.arg(&entry_key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(expire_millis(ttl)?);
        }

        self.store
            .run("SET", cmd.query_async::<_, ()>(&mut conn))
            .await?;

        debug!(key = %entry_key, ttl = ?ttl, "Stored cache entry");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let entry_key = self.entry_key(key);
        let mut conn = self.store.connection();

        self.store
            .run(
                "DEL",
                redis::cmd("DEL")
                    .arg(&entry_key)
                    .query_async::<_, ()>(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let entry_key = self.entry_key(key);
        let mut conn = self.store.connection();

        self.store
            .run(
                "EXISTS",
                redis::cmd("EXISTS")
                    .arg(&entry_key)
                    .query_async::<_, bool>(&mut conn),
            )
            .await
    }

    async fn ttl(&self, key: &str) -> Result<CacheTtl> {
        let entry_key = self.entry_key(key);
        let mut conn = self.store.connection();

        let pttl = self
            .store
            .run(
                "PTTL",
                redis::cmd("PTTL")
                    .arg(&entry_key)
                    .query_async::<_, i64>(&mut conn),
            )
            .await?;

        Ok(match pttl {
            -2 => CacheTtl::Absent,
            -1 => CacheTtl::Persistent,
            ms => CacheTtl::Expires(Duration::from_millis(ms.max(0) as u64)),
        })
    }
}
