use super::RedisStore;
use crate::error::Result;
use crate::store::{HealthCheck, HealthInfo};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error};

/// Redis liveness probe: one `DBSIZE` per call, no retries, no caching
pub struct RedisHealthCheck {
    store: RedisStore,
    probe_timeout: Duration,
}

impl RedisHealthCheck {
    pub fn new(store: RedisStore, probe_timeout: Duration) -> Self {
        Self {
            store,
            probe_timeout,
        }
    }

    async fn total_keys(&self) -> Result<u64> {
        let mut conn = self.store.connection();
        self.store
            .run_with_timeout(
                self.probe_timeout,
                "DBSIZE",
                redis::cmd("DBSIZE").query_async::<_, u64>(&mut conn),
            )
            .await
    }
}

#[async_trait]
impl HealthCheck for RedisHealthCheck {
    async fn is_healthy(&self) -> Result<bool> {
        let total_keys = self.total_keys().await?;
        debug!(total_keys, "Redis health check passed");
        Ok(true)
    }

    async fn health_info(&self) -> HealthInfo {
        match self.total_keys().await {
            Ok(total_keys) => HealthInfo::up(
                total_keys,
                format!("Redis is healthy - Total Keys: {}", total_keys),
            ),
            Err(e) => {
                error!(error = %e, "Redis health check failed");
                HealthInfo::down(format!("Redis health check failed: {}", e))
            }
        }
    }
}
