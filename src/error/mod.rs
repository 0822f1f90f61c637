use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for quota operations
pub type Result<T> = std::result::Result<T, QuotaError>;

/// Quota gate error types
#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Could not acquire lock: {0}")]
    LockUnavailable(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl QuotaError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            QuotaError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            QuotaError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            QuotaError::LockUnavailable(_) => StatusCode::CONFLICT,
            QuotaError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            QuotaError::Redis(_) => StatusCode::SERVICE_UNAVAILABLE,
            QuotaError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            QuotaError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            QuotaError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            QuotaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error comes from talking to the shared store
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            QuotaError::Store(_) | QuotaError::Redis(_) | QuotaError::Timeout(_)
        )
    }
}

impl IntoResponse for QuotaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            QuotaError::InvalidInput("test".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            QuotaError::LockUnavailable("test".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            QuotaError::Store("test".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            QuotaError::Timeout("test".to_string()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_error_display() {
        let err = QuotaError::LockUnavailable("rate-limit:config:lock:/api/test".to_string());
        assert_eq!(
            err.to_string(),
            "Could not acquire lock: rate-limit:config:lock:/api/test"
        );
    }

    #[test]
    fn test_store_failure_classification() {
        assert!(QuotaError::Store("down".to_string()).is_store_failure());
        assert!(QuotaError::Timeout("slow".to_string()).is_store_failure());
        assert!(!QuotaError::InvalidInput("bad".to_string()).is_store_failure());
        assert!(!QuotaError::LockUnavailable("busy".to_string()).is_store_failure());
    }
}
