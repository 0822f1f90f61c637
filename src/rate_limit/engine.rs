use super::types::{RateLimitConfig, RequestInfo};
use crate::error::Result;
use async_trait::async_trait;

/// Admission control capability shared by the distributed and local engines
#[async_trait]
pub trait RateLimitEngine: Send + Sync {
    /// Short engine name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Decide whether a request is admitted. Never fails: internal errors admit.
    async fn is_request_allowed(&self, request: &RequestInfo) -> bool;

    /// Create or replace the configuration of an endpoint
    async fn update_configuration(
        &self,
        endpoint: &str,
        max_requests: u32,
        time_window_seconds: u64,
        enabled: bool,
    ) -> Result<RateLimitConfig>;

    /// Read the configuration of an endpoint; `None` when there is none
    async fn get_configuration(&self, endpoint: &str) -> Result<Option<RateLimitConfig>>;
}
