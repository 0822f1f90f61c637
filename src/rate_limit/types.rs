use crate::error::{QuotaError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time to wait for a rate limit lock, in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

/// Longest accepted window: one year
pub const MAX_TIME_WINDOW_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Longest accepted lock wait: ten minutes
pub const MAX_LOCK_TIMEOUT_MS: u64 = 10 * 60 * 1000;

const REQUEST_LOCK_PREFIX: &str = "rate-limit:request:";
const CONFIG_LOCK_PREFIX: &str = "rate-limit:config:lock:";

/// Normalize an endpoint to its leading-slash form
pub fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return "/".to_string();
    }

    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Lock name serializing admission checks for one rate limit key
pub fn request_lock_name(rate_limit_key: &str) -> String {
    format!("{}{}", REQUEST_LOCK_PREFIX, rate_limit_key)
}

/// Lock name serializing configuration updates for one endpoint
pub fn config_lock_name(endpoint: &str) -> String {
    format!("{}{}", CONFIG_LOCK_PREFIX, endpoint)
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

/// Per-endpoint rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Normalized endpoint this limit applies to
    pub endpoint: String,
    /// Maximum number of requests allowed per window
    pub max_requests: u32,
    /// Window length in seconds
    pub time_window_seconds: u64,
    /// Whether the limit is enforced
    pub enabled: bool,
    /// How long to wait for the admission lock, in milliseconds
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_millis: u64,
}

impl RateLimitConfig {
    /// Create a configuration with the default lock timeout
    pub fn new(endpoint: &str, max_requests: u32, time_window_seconds: u64, enabled: bool) -> Self {
        Self {
            endpoint: normalize_endpoint(endpoint),
            max_requests,
            time_window_seconds,
            enabled,
            lock_timeout_millis: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    /// Override the lock timeout
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout_millis = u64::try_from(lock_timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Reject limits that could never admit a request
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(QuotaError::InvalidInput(format!(
                "maxRequests must be > 0 for endpoint: {}",
                self.endpoint
            )));
        }
        if self.time_window_seconds == 0 {
            return Err(QuotaError::InvalidInput(format!(
                "timeWindowSeconds must be > 0 for endpoint: {}",
                self.endpoint
            )));
        }
        if self.time_window_seconds > MAX_TIME_WINDOW_SECONDS {
            return Err(QuotaError::InvalidInput(format!(
                "timeWindowSeconds must be <= {} for endpoint: {}",
                MAX_TIME_WINDOW_SECONDS, self.endpoint
            )));
        }
        if self.lock_timeout_millis == 0 || self.lock_timeout_millis > MAX_LOCK_TIMEOUT_MS {
            return Err(QuotaError::InvalidInput(format!(
                "lockTimeoutMillis must be in 1..={} for endpoint: {}",
                MAX_LOCK_TIMEOUT_MS, self.endpoint
            )));
        }
        Ok(())
    }

    /// Whether a counter value already exhausts the quota
    pub fn has_reached_limit(&self, current_count: u64) -> bool {
        current_count >= u64::from(self.max_requests)
    }

    /// Get the window as a Duration, capped at the longest accepted window.
    ///
    /// Configurations read back from a shared store are not re-validated.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.time_window_seconds.min(MAX_TIME_WINDOW_SECONDS))
    }

    /// Get the lock timeout as a Duration, capped at the longest accepted wait
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_millis.min(MAX_LOCK_TIMEOUT_MS))
    }
}

/// Metadata of one inbound request, as seen by the rate limiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// Requested endpoint
    pub endpoint: String,
    /// Caller address
    pub client_identifier: String,
    /// Unique id of the inbound call, for diagnostics only
    pub request_id: String,
}

impl RequestInfo {
    pub fn new(
        endpoint: impl Into<String>,
        client_identifier: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_identifier: client_identifier.into(),
            request_id: request_id.into(),
        }
    }

    /// Copy of this request with the endpoint normalized
    pub fn normalized(&self) -> Self {
        Self {
            endpoint: normalize_endpoint(&self.endpoint),
            client_identifier: self.client_identifier.clone(),
            request_id: self.request_id.clone(),
        }
    }

    /// Key of the counter for this (endpoint, client) pair
    pub fn rate_limit_key(&self) -> String {
        format!("{}:{}", self.endpoint, self.client_identifier)
    }

    /// Key of the configuration governing this request
    pub fn config_key(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("/api/test"), "/api/test");
        assert_eq!(normalize_endpoint("api/test"), "/api/test");
        assert_eq!(normalize_endpoint("  api/test  "), "/api/test");
        assert_eq!(normalize_endpoint(""), "/");
        assert_eq!(normalize_endpoint("   "), "/");
    }

    #[test]
    fn test_request_keys() {
        let request = RequestInfo::new("api/test", "1.2.3.4", "req-1").normalized();
        assert_eq!(request.endpoint, "/api/test");
        assert_eq!(request.rate_limit_key(), "/api/test:1.2.3.4");
        assert_eq!(request.config_key(), "/api/test");
        assert_eq!(
            request_lock_name(&request.rate_limit_key()),
            "rate-limit:request:/api/test:1.2.3.4"
        );
        assert_eq!(
            config_lock_name(&request.endpoint),
            "rate-limit:config:lock:/api/test"
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = RateLimitConfig::new("api/test", 10, 60, true);
        assert_eq!(config.endpoint, "/api/test");
        assert_eq!(config.lock_timeout_millis, 5000);
        assert_eq!(config.window(), Duration::from_secs(60));
        assert_eq!(config.lock_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_has_reached_limit() {
        let config = RateLimitConfig::new("/api/test", 2, 60, true);
        assert!(!config.has_reached_limit(0));
        assert!(!config.has_reached_limit(1));
        assert!(config.has_reached_limit(2));
        assert!(config.has_reached_limit(3));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(RateLimitConfig::new("/api/test", 0, 60, true).validate().is_err());
        assert!(RateLimitConfig::new("/api/test", 10, 0, true).validate().is_err());
        assert!(RateLimitConfig::new("/api/test", 0, 60, false).validate().is_err());
        assert!(RateLimitConfig::new("/api/test", 10, 60, false).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_values() {
        let huge_window = RateLimitConfig::new("/api/test", 10, u64::MAX, true);
        assert!(matches!(huge_window.validate(), Err(QuotaError::InvalidInput(_))));
        assert_eq!(huge_window.window(), Duration::from_secs(MAX_TIME_WINDOW_SECONDS));

        let longest = RateLimitConfig::new("/api/test", 10, MAX_TIME_WINDOW_SECONDS, true);
        assert!(longest.validate().is_ok());

        let long_wait = RateLimitConfig::new("/api/test", 10, 60, true)
            .with_lock_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(long_wait.lock_timeout_millis, u64::MAX);
        assert!(matches!(long_wait.validate(), Err(QuotaError::InvalidInput(_))));
        assert_eq!(long_wait.lock_timeout(), Duration::from_millis(MAX_LOCK_TIMEOUT_MS));
    }

    #[test]
    fn test_config_json_shape() {
        let json = r#"{"endpoint":"/api/test","maxRequests":2,"timeWindowSeconds":60,"enabled":true}"#;
        let config: RateLimitConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_requests, 2);
        assert_eq!(config.lock_timeout_millis, DEFAULT_LOCK_TIMEOUT_MS);

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["timeWindowSeconds"], 60);
        assert_eq!(value["lockTimeoutMillis"], 5000);
    }
}
