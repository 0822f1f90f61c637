use crate::error::{QuotaError, Result};
use crate::rate_limit::types::{MAX_LOCK_TIMEOUT_MS, MAX_TIME_WINDOW_SECONDS};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;

/// Prefix of environment variables overriding the configuration file
pub const ENV_PREFIX: &str = "QUOTA";

/// Main service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Shared store connection; local-only limiting when absent
    #[serde(default)]
    pub store: Option<StoreConfig>,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Shared key/value store connection
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL
    pub url: String,
    /// Password, when not embedded in the URL
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Timeout of one connection attempt in milliseconds
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Timeout of one command in milliseconds
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Additional connection attempts at startup
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Initial delay between connection attempts in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Bound on each health probe in milliseconds
    #[serde(default = "default_health_probe_timeout_ms")]
    pub health_probe_timeout_ms: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitingConfig {
    /// Default wait for rate limit locks in milliseconds
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Store-side lease of a lock in milliseconds
    #[serde(default = "default_lock_lease_ms")]
    pub lock_lease_ms: u64,
    /// Delay between lock acquisition attempts in milliseconds
    #[serde(default = "default_lock_retry_interval_ms")]
    pub lock_retry_interval_ms: u64,
    /// TTL of cached configuration entries in seconds (0 = no expiry)
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Name of the shared cache region
    #[serde(default = "default_cache_region")]
    pub cache_region: String,
    /// Prefix of every counter and configuration key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Paths under this prefix go through admission
    #[serde(default = "default_protected_prefix")]
    pub protected_prefix: String,
    /// Paths under this prefix are never limited
    #[serde(default = "default_admin_prefix")]
    pub admin_prefix: String,
    /// Limits seeded at startup
    #[serde(default = "default_endpoint_limits")]
    pub defaults: Vec<EndpointLimit>,
}

/// A limit seeded at startup
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EndpointLimit {
    pub endpoint: String,
    pub max_requests: u32,
    pub time_window_seconds: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Emit JSON lines instead of compact text
    #[serde(default)]
    pub json: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Expose Prometheus metrics on /metrics
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_response_timeout_ms() -> u64 {
    5_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_interval_ms() -> u64 {
    1_500
}

fn default_health_probe_timeout_ms() -> u64 {
    1_000
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_lock_lease_ms() -> u64 {
    30_000
}

fn default_lock_retry_interval_ms() -> u64 {
    25
}

fn default_cache_ttl_secs() -> u64 {
    600
}

fn default_cache_region() -> String {
    "distributed-cache".to_string()
}

fn default_key_prefix() -> String {
    "rate-limit:".to_string()
}

fn default_protected_prefix() -> String {
    "/api/".to_string()
}

fn default_admin_prefix() -> String {
    "/api/admin/".to_string()
}

fn default_endpoint_limits() -> Vec<EndpointLimit> {
    vec![
        EndpointLimit {
            endpoint: "/api/health".to_string(),
            max_requests: 5,
            time_window_seconds: 60,
            enabled: true,
        },
        EndpointLimit {
            endpoint: "/api/currency/convert".to_string(),
            max_requests: 10,
            time_window_seconds: 60,
            enabled: true,
        },
    ]
}

fn default_log_filter() -> String {
    "quota_gate=debug,tower_http=debug".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

impl StoreConfig {
    /// Connection settings for a URL, with default timeouts and retries
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            password: None,
            connection_timeout_ms: default_connection_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
            health_probe_timeout_ms: default_health_probe_timeout_ms(),
        }
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_lease_ms: default_lock_lease_ms(),
            lock_retry_interval_ms: default_lock_retry_interval_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_region: default_cache_region(),
            key_prefix: default_key_prefix(),
            protected_prefix: default_protected_prefix(),
            admin_prefix: default_admin_prefix(),
            defaults: default_endpoint_limits(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file, with `QUOTA__SECTION__FIELD`
    /// environment variables taking precedence over the file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                QuotaError::Config(format!("Failed to load {}: {}", path.display(), e))
            })?;

        let app: Self = config
            .try_deserialize()
            .map_err(|e| QuotaError::Config(format!("Failed to parse config: {}", e)))?;
        app.validate()?;
        Ok(app)
    }

    /// Load configuration from a YAML file, without environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| QuotaError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| QuotaError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let limits = &self.rate_limiting;
        if limits.lock_timeout_ms == 0 || limits.lock_timeout_ms > MAX_LOCK_TIMEOUT_MS {
            return Err(QuotaError::Config(format!(
                "rate_limiting.lock_timeout_ms must be in 1..={}",
                MAX_LOCK_TIMEOUT_MS
            )));
        }
        if limits.lock_lease_ms == 0 {
            return Err(QuotaError::Config(
                "rate_limiting.lock_lease_ms must be > 0".to_string(),
            ));
        }
        if limits.lock_retry_interval_ms == 0 {
            return Err(QuotaError::Config(
                "rate_limiting.lock_retry_interval_ms must be > 0".to_string(),
            ));
        }
        if !limits.protected_prefix.starts_with('/') || !limits.admin_prefix.starts_with('/') {
            return Err(QuotaError::Config(
                "rate_limiting prefixes must start with '/'".to_string(),
            ));
        }

        for limit in &limits.defaults {
            if limit.max_requests == 0 {
                return Err(QuotaError::Config(format!(
                    "Default limit max_requests must be > 0 for endpoint: {}",
                    limit.endpoint
                )));
            }
            if limit.time_window_seconds == 0 || limit.time_window_seconds > MAX_TIME_WINDOW_SECONDS
            {
                return Err(QuotaError::Config(format!(
                    "Default limit time_window_seconds must be in 1..={} for endpoint: {}",
                    MAX_TIME_WINDOW_SECONDS, limit.endpoint
                )));
            }
        }

        if let Some(store) = &self.store {
            if store.url.is_empty() {
                return Err(QuotaError::Config("store.url cannot be empty".to_string()));
            }
            if store.response_timeout_ms == 0 || store.health_probe_timeout_ms == 0 {
                return Err(QuotaError::Config(
                    "store timeouts must be > 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Create a default configuration for testing
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            store: None,
            rate_limiting: RateLimitingConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9090

store:
  url: "redis://127.0.0.1:6379"
  password: "hunter2"
  retry_attempts: 5

rate_limiting:
  lock_timeout_ms: 2000
  cache_ttl_secs: 120
  defaults:
    - endpoint: "/api/orders"
      max_requests: 100
      time_window_seconds: 60
"#;

        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);

        let store = config.store.as_ref().unwrap();
        assert_eq!(store.retry_attempts, 5);
        assert_eq!(store.retry_interval_ms, 1_500);
        assert_eq!(store.password.as_ref().unwrap().expose_secret(), "hunter2");

        assert_eq!(config.rate_limiting.lock_timeout_ms, 2000);
        assert_eq!(config.rate_limiting.defaults.len(), 1);
        assert!(config.rate_limiting.defaults[0].enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert!(config.store.is_none());
        assert_eq!(config.rate_limiting.lock_timeout_ms, 5_000);
        assert_eq!(config.rate_limiting.cache_ttl_secs, 600);
        assert_eq!(config.rate_limiting.cache_region, "distributed-cache");
        assert_eq!(config.rate_limiting.key_prefix, "rate-limit:");
        assert_eq!(config.rate_limiting.defaults, default_endpoint_limits());
        assert!(config.metrics.enabled);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let yaml = r#"
store:
  url: "redis://cache:6379"
  password: "hunter2"
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_validate_zero_default_limit() {
        let mut config = AppConfig::default_config();
        config.rate_limiting.defaults.push(EndpointLimit {
            endpoint: "/api/broken".to_string(),
            max_requests: 0,
            time_window_seconds: 60,
            enabled: true,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_lock_timeout() {
        let mut config = AppConfig::default_config();
        config.rate_limiting.lock_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_oversized_values() {
        let mut config = AppConfig::default_config();
        config.rate_limiting.lock_timeout_ms = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default_config();
        config.rate_limiting.defaults.push(EndpointLimit {
            endpoint: "/api/forever".to_string(),
            max_requests: 1,
            time_window_seconds: u64::MAX,
            enabled: true,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_store() {
        let mut config = AppConfig::default_config();
        config.store = Some(StoreConfig::new(""));
        assert!(config.validate().is_err());

        config.store = Some(StoreConfig::new("redis://127.0.0.1:6379"));
        assert!(config.validate().is_ok());
    }
}
