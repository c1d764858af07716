//! Retry and circuit breaker subsystem
//!
//! Data flow for one protected call:
//!
//! ```text
//! caller → RetryExecutor → (CircuitBreaker →) operation
//!            ↑                                   │ failure
//!            └── sleep ← backoff ← classify ←────┘
//! ```
//!
//! until the operation succeeds, the failure's category has no retries
//! left, or the breaker rejects the call. The outcome of every call lands in
//! the [`RetryMetrics`] of the executor's [`ResilienceContext`].
//!
//! The foundation tier holds the pure pieces (categories, classifier,
//! policies, backoff math). The runtime tier adds the stateful pieces and
//! the executor, which sleep on tokio and log through tracing.
//!
//! ## Example
//!
//! ```rust,no_run
//! use graphguard_common::resilience::{ResilienceContext, RetryPolicy, EMBEDDER_BREAKER};
//!
//! # async fn embed(_: &str) -> Result<Vec<f32>, std::io::Error> { Ok(vec![]) }
//! # async fn run() {
//! let context = ResilienceContext::with_standard_breakers();
//! let executor = context.executor_with(RetryPolicy::embedding());
//!
//! let vector = executor
//!     .execute("embed_query", Some(EMBEDDER_BREAKER), || embed("hello"))
//!     .await;
//! # }
//! ```

pub mod backoff;
pub mod category;
pub mod classifier;
pub mod policy;

#[cfg(feature = "runtime")]
pub mod circuit_breaker;
#[cfg(feature = "runtime")]
pub mod clock;
#[cfg(feature = "runtime")]
pub mod context;
#[cfg(feature = "runtime")]
pub mod executor;
#[cfg(feature = "runtime")]
pub mod metrics;
#[cfg(feature = "runtime")]
pub mod registry;
#[cfg(feature = "runtime")]
pub mod wrapper;

pub use backoff::{compute_delay_with_rng, MIN_JITTERED_DELAY};
pub use category::ErrorCategory;
pub use classifier::{classify, classify_dyn, classify_message, classify_status, StatusError};
pub use policy::{
    CircuitBreakerPolicy, CircuitBreakerPolicyBuilder, RetryPolicy, RetryPolicyBuilder,
};

#[cfg(feature = "runtime")]
pub use circuit_breaker::{BreakerPermit, BreakerStatus, CircuitBreaker, CircuitState};
#[cfg(feature = "runtime")]
pub use clock::{Clock, MockClock, SystemClock};
#[cfg(feature = "runtime")]
pub use context::{
    OperationKind, PolicySummary, ResilienceContext, ResilienceStatus, DATABASE_BREAKER,
    EMBEDDER_BREAKER,
};
#[cfg(feature = "runtime")]
pub use executor::{BoxError, RetryError, RetryExecutor, RetryOutcome};
#[cfg(feature = "runtime")]
pub use metrics::{CategoryStats, MetricsSummary, RetryMetrics};
#[cfg(feature = "runtime")]
pub use registry::BreakerRegistry;
#[cfg(feature = "runtime")]
pub use wrapper::Retrying;
