//! Redis-backed store adapters.
//!
//! All adapters share one [`RedisStore`], a cheaply clonable handle around a
//! multiplexed `ConnectionManager`. Every command is bounded by the configured
//! response timeout so a stalled store surfaces as an error instead of a hang.

mod cache;
mod config;
mod counter;
mod health;
mod lock;
pub mod lua_scripts;

pub use cache::RedisCache;
pub use config::RedisConfigStore;
pub use counter::RedisCounterStore;
pub use health::RedisHealthCheck;
pub use lock::RedisLock;

use crate::config::StoreConfig;
use crate::error::{QuotaError, Result};
use backoff::ExponentialBackoffBuilder;
use redis::aio::ConnectionManager;
use redis::{IntoConnectionInfo, RedisResult};
use secrecy::ExposeSecret;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Shared Redis connection with key layout and timeouts
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: String,
    response_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"<redis::aio::ConnectionManager>")
            .field("key_prefix", &self.key_prefix)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect to Redis, retrying with exponential backoff
    pub async fn connect(config: &StoreConfig, key_prefix: &str) -> Result<Self> {
        let mut connection_info = config.url.as_str().into_connection_info()?;
        if let Some(password) = &config.password {
            connection_info.redis.password = Some(password.expose_secret().clone());
        }
        let client = redis::Client::open(connection_info)?;

        let connect_timeout = Duration::from_millis(config.connection_timeout_ms);
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(config.retry_interval_ms))
            .with_max_elapsed_time(None)
            .build();

        let max_attempts = config.retry_attempts + 1;
        let mut attempt = 0u32;

        let connection = backoff::future::retry(policy, || {
            attempt += 1;
            let client = client.clone();
            let current_attempt = attempt;
            async move {
                let error = match tokio::time::timeout(connect_timeout, ConnectionManager::new(client)).await {
                    Ok(Ok(connection)) => return Ok(connection),
                    Ok(Err(e)) => QuotaError::Redis(e),
                    Err(_) => QuotaError::Timeout(format!(
                        "Redis connection timed out after {:?}",
                        connect_timeout
                    )),
                };

                if current_attempt >= max_attempts {
                    warn!(attempt = current_attempt, error = %error, "Redis connection failed after max retries");
                    Err(backoff::Error::permanent(error))
                } else {
                    warn!(attempt = current_attempt, error = %error, "Redis connection failed, retrying");
                    Err(backoff::Error::transient(error))
                }
            }
        })
        .await?;

        info!(
            url = %redact_url(&config.url),
            key_prefix,
            "Connected to Redis"
        );

        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
            response_timeout: Duration::from_millis(config.response_timeout_ms),
        })
    }

    /// A handle on the shared multiplexed connection
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Key of a request counter
    pub fn counter_key(&self, rate_limit_key: &str) -> String {
        format!("{}{}", self.key_prefix, rate_limit_key)
    }

    /// Key of an endpoint's configuration hash
    pub fn config_key(&self, endpoint: &str) -> String {
        format!("{}config:{}", self.key_prefix, endpoint)
    }

    /// SCAN pattern matching every counter of an endpoint
    pub fn counter_pattern(&self, endpoint: &str) -> String {
        format!(
            "{}{}:*",
            escape_glob(&self.key_prefix),
            escape_glob(endpoint)
        )
    }

    /// Run a command bounded by the response timeout
    pub async fn run<T, F>(&self, operation: &str, command: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        self.run_with_timeout(self.response_timeout, operation, command)
            .await
    }

    /// Run a command bounded by a specific timeout
    pub async fn run_with_timeout<T, F>(
        &self,
        timeout: Duration,
        operation: &str,
        command: F,
    ) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(timeout, command).await {
            Ok(result) => result.map_err(QuotaError::from),
            Err(_) => Err(QuotaError::Timeout(format!(
                "Redis {} timed out after {:?}",
                operation, timeout
            ))),
        }
    }
}

/// Escape glob metacharacters so a literal string can be used in a MATCH pattern
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Millisecond argument for PX and PEXPIRE, which Redis bounds to a signed 64-bit value
pub(crate) fn expire_millis(ttl: Duration) -> Result<u64> {
    u64::try_from(ttl.as_millis())
        .ok()
        .filter(|ms| i64::try_from(*ms).is_ok())
        .ok_or_else(|| QuotaError::InvalidInput(format!("Expiry {:?} is out of range", ttl)))
}

/// Hide credentials embedded in a connection URL
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
