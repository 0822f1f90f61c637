//! Rate limiting module
//!
//! Per-endpoint, per-client fixed-window quotas enforced across instances
//! that share one key/value store:
//!
//! - **Distributed engine**: lock-guarded read-check-increment over the store
//!   adapters, cache-aside configuration reads, fail-open on store faults
//! - **Local engine**: the same algorithm in process memory, used as fallback
//! - **Service selector**: picks an engine per call from store health, with
//!   operator overrides
//!
//! # Example
//!
//! ```rust,no_run
//! use quota_gate::rate_limit::{LocalRateLimiter, RequestInfo, ServiceSelector};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Create local-only selector
//!     let selector = ServiceSelector::local_only(Arc::new(LocalRateLimiter::new()));
//!
//!     selector
//!         .update_configuration("/api/test", 2, 60, true)
//!         .await
//!         .unwrap();
//!
//!     let request = RequestInfo::new("/api/test", "1.2.3.4", "req-1");
//!     assert!(selector.is_request_allowed(&request).await);
//! }
//! ```

pub mod cache_aside;
pub mod context;
pub mod distributed;
pub mod engine;
pub mod local;
pub mod middleware;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use context::{build_request_info, client_identifier};
pub use distributed::DistributedRateLimiter;
pub use engine::RateLimitEngine;
pub use local::LocalRateLimiter;
pub use middleware::{rate_limit_middleware, RateLimitLayer};
pub use service::{SelectionMode, SelectorStatus, ServiceSelector};
pub use types::{normalize_endpoint, RateLimitConfig, RequestInfo};
