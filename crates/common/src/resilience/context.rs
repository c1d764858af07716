//! Shared resilience state and ops-facing status
//!
//! A [`ResilienceContext`] owns the two pieces of mutable shared state: the
//! breaker registry and the metrics aggregator. It is built explicitly and
//! handed to executors, so independent contexts never see each other's
//! breakers or counters.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::circuit_breaker::BreakerStatus;
use super::clock::Clock;
use super::executor::{RetryError, RetryExecutor};
use super::metrics::{MetricsSummary, RetryMetrics};
use super::policy::{CircuitBreakerPolicy, RetryPolicy};
use super::registry::BreakerRegistry;
use crate::error::CommonResult;
use crate::utils::serde::duration_secs;

/// Breaker name used for the embedding service
pub const EMBEDDER_BREAKER: &str = "embedder";
/// Breaker name used for the graph database
pub const DATABASE_BREAKER: &str = "database";

/// Breaker registry, metrics and default policy shared by executors
#[derive(Debug, Clone, Default)]
pub struct ResilienceContext {
    breakers: Arc<BreakerRegistry>,
    metrics: Arc<RetryMetrics>,
    default_policy: Arc<RetryPolicy>,
}

impl ResilienceContext {
    /// Context with default policies and no pre-registered breakers
    pub fn new() -> Self {
        Self::default()
    }

    /// Context using `policy` for executors built by [`ResilienceContext::executor`]
    pub fn with_policy(policy: RetryPolicy) -> CommonResult<Self> {
        policy.validate()?;
        Ok(Self { default_policy: Arc::new(policy), ..Self::default() })
    }

    /// Context around an existing registry
    pub fn with_registry(registry: BreakerRegistry, policy: RetryPolicy) -> CommonResult<Self> {
        policy.validate()?;
        Ok(Self {
            breakers: Arc::new(registry),
            metrics: Arc::new(RetryMetrics::new()),
            default_policy: Arc::new(policy),
        })
    }

    /// Context with the `embedder` and `database` breakers registered
    pub fn with_standard_breakers() -> Self {
        let context = Self::new();
        context.register_standard_breakers();
        context
    }

    /// Same as [`ResilienceContext::with_standard_breakers`] with a custom clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> CommonResult<Self> {
        let registry = BreakerRegistry::with_clock(CircuitBreakerPolicy::default(), clock)?;
        let context = Self::with_registry(registry, RetryPolicy::default())?;
        context.register_standard_breakers();
        Ok(context)
    }

    fn register_standard_breakers(&self) {
        self.breakers.register_validated(EMBEDDER_BREAKER, CircuitBreakerPolicy::embedder());
        self.breakers.register_validated(DATABASE_BREAKER, CircuitBreakerPolicy::database());
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn metrics(&self) -> &RetryMetrics {
        &self.metrics
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.default_policy
    }

    /// Executor using the context's default policy
    pub fn executor(&self) -> RetryExecutor {
        RetryExecutor::new(self.clone(), (*self.default_policy).clone())
    }

    /// Executor using `policy`
    pub fn executor_with(&self, policy: RetryPolicy) -> RetryExecutor {
        RetryExecutor::new(self.clone(), policy)
    }

    /// Run `operation` with the preset policy and breaker of `kind`
    ///
    /// The operation name is `"{kind}_{id}"`.
    pub async fn execute_operation<F, Fut, T, E>(
        &self,
        kind: OperationKind,
        id: &str,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let name = kind.operation_name(id);
        self.executor_with(kind.policy()).execute(&name, kind.breaker(), operation).await
    }

    /// Everything a health endpoint needs, as plain data
    pub fn status(&self) -> ResilienceStatus {
        ResilienceStatus {
            metrics: self.metrics.summary(),
            circuit_breakers: self.breakers.statuses(),
            retry_policy: PolicySummary::from(&*self.default_policy),
        }
    }
}

/// Kind of protected call, selecting preset policy and breaker
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperationKind {
    /// Embedding generation, guarded by the `embedder` breaker
    Embedding,
    /// Graph database access
    Database,
    /// Anything else, with a caller-chosen retry count and base delay
    General { retries: u32, base_delay: Duration },
}

impl OperationKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::Database => "database",
            Self::General { .. } => "general",
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        match *self {
            Self::Embedding => RetryPolicy::embedding(),
            Self::Database => RetryPolicy::database(),
            Self::General { retries, base_delay } => RetryPolicy::general(retries, base_delay),
        }
    }

    pub fn breaker(&self) -> Option<&'static str> {
        match self {
            Self::Embedding => Some(EMBEDDER_BREAKER),
            Self::Database | Self::General { .. } => None,
        }
    }

    pub fn operation_name(&self, id: &str) -> String {
        format!("{}_{}", self.as_str(), id)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Headline values of a [`RetryPolicy`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySummary {
    pub max_retries: u32,
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_enabled: bool,
    pub jitter_range: f64,
}

impl From<&RetryPolicy> for PolicySummary {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            base_delay: policy.base_delay,
            max_delay: policy.max_delay,
            backoff_multiplier: policy.backoff_multiplier,
            jitter_enabled: policy.jitter_enabled,
            jitter_range: policy.jitter_range,
        }
    }
}

/// Serializable health report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceStatus {
    pub metrics: MetricsSummary,
    pub circuit_breakers: BTreeMap<String, BreakerStatus>,
    pub retry_policy: PolicySummary,
}
