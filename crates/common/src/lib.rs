//! Core resilience layer shared across GraphGuard crates.
//!
//! Protects calls to the knowledge-graph service and its dependencies
//! (embedding model, graph database) with category-aware retries and
//! named circuit breakers.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: errors, failure categories, classifier, policies, backoff
//! - `runtime`: circuit breakers, retry executor, metrics, status reporting
//! - `http`: structured classification of `reqwest` errors

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod resilience;
#[cfg(feature = "foundation")]
pub mod utils;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "foundation")]
pub use resilience::{
    classify, CircuitBreakerPolicy, ErrorCategory, RetryPolicy, RetryPolicyBuilder, StatusError,
};
#[cfg(feature = "runtime")]
pub use resilience::{
    BreakerStatus, CircuitBreaker, CircuitState, Clock, MockClock, OperationKind,
    ResilienceContext, ResilienceStatus, RetryError, RetryExecutor, RetryMetrics, RetryOutcome,
    Retrying, SystemClock,
};
#[cfg(feature = "foundation")]
pub use utils::serde::duration_secs;
