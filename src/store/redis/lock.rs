use super::lua_scripts::RELEASE_LOCK_SCRIPT;
use super::{expire_millis, RedisStore};
use crate::error::Result;
use crate::store::{instant_after, DistributedLock, LockInfo, LockToken};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::Script;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Redis-backed named locks.
///
/// A lock is a key set with `NX` and a lease (`PX`) holding a per-acquisition
/// token. Acquisition polls until the wait elapses; release deletes the key
/// only when it still holds the caller's token. The lease frees locks whose
/// holder vanished without releasing.
pub struct RedisLock {
    store: RedisStore,
    lease: Duration,
    retry_interval: Duration,
    release_script: Script,
    /// Tokens of locks acquired through this adapter and not yet released
    held: DashMap<String, String>,
}

impl RedisLock {
    pub fn new(store: RedisStore, lease: Duration, retry_interval: Duration) -> Self {
        Self {
            store,
            lease,
            retry_interval,
            release_script: Script::new(RELEASE_LOCK_SCRIPT),
            held: DashMap::new(),
        }
    }

    async fn try_set(&self, name: &str, token: &str) -> Result<bool> {
        let mut conn = self.store.connection();
        let reply = self
            .store
            .run(
                "SET NX",
                redis::cmd("SET")
                    .arg(name)
                    .arg(token)
                    .arg("NX")
                    .arg("PX")
                    .arg(expire_millis(self.lease)?)
                    .query_async::<_, Option<String>>(&mut conn),
            )
            .await?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_acquire(&self, name: &str, wait: Duration) -> Result<Option<LockToken>> {
        let token = Uuid::new_v4().to_string();
        let deadline = instant_after(Instant::now(), wait);

        loop {
            if self.try_set(name, &token).await? {
                debug!(lock = name, "Lock acquired");
                self.held.insert(name.to_string(), token.clone());
                return Ok(Some(LockToken {
                    name: name.to_string(),
                    token,
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(lock = name, wait = ?wait, "Lock wait elapsed");
                return Ok(None);
            }
            tokio::time::sleep(self.retry_interval.min(deadline - now)).await;
        }
    }

    async fn release(&self, token: &LockToken) -> Result<bool> {
        self.held
            .remove_if(&token.name, |_, held| *held == token.token);

        let mut conn = self.store.connection();
        let released = self
            .store
            .run(
                "EVALSHA release",
                self.release_script
                    .key(&token.name)
                    .arg(&token.token)
                    .invoke_async::<_, i64>(&mut conn),
            )
            .await?;

        Ok(released == 1)
    }

    async fn is_held(&self, name: &str) -> Result<bool> {
        let mut conn = self.store.connection();
        let exists = self
            .store
            .run(
                "EXISTS",
                redis::cmd("EXISTS")
                    .arg(name)
                    .query_async::<_, bool>(&mut conn),
            )
            .await?;
        Ok(exists)
    }

    async fn info(&self, name: &str) -> Result<LockInfo> {
        let mut conn = self.store.connection();
        let pttl = self
            .store
            .run(
                "PTTL",
                redis::cmd("PTTL")
                    .arg(name)
                    .query_async::<_, i64>(&mut conn),
            )
            .await?;

        // PTTL: -2 = no such key, -1 = no expiry
        let held = pttl != -2;
        let remaining_ttl = (pttl >= 0).then(|| Duration::from_millis(pttl as u64));

        Ok(LockInfo {
            name: name.to_string(),
            held,
            hold_count: u32::from(held && self.held.contains_key(name)),
            remaining_ttl,
        })
    }
}
