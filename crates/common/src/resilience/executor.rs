//! Category-aware retry executor
//!
//! One call to [`RetryExecutor::execute`] runs the operation, optionally
//! through a named circuit breaker, until it succeeds, fails with a category
//! whose retry budget is spent, or the breaker rejects it. The only
//! suspension the executor adds is the backoff sleep between attempts.
//! Exactly one outcome is recorded in the context metrics per call.

use std::error::Error as StdError;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::backoff::compute_delay_with_rng;
use super::category::ErrorCategory;
use super::classifier::{classify, classify_dyn};
use super::context::ResilienceContext;
use super::policy::RetryPolicy;
use crate::error::{ErrorClassification, ErrorSeverity};
use crate::utils::serde::duration_secs;

/// Type-erased operation error accepted by [`RetryExecutor::execute_dyn`]
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Terminal failure of an executor call
///
/// Never retryable: the executor already spent the budget, or the breaker
/// asked callers to back off.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The failure category's retry budget is spent
    #[error("operation '{operation}' failed after {attempts} retries ({category}): {source}")]
    Exhausted {
        operation: String,
        category: ErrorCategory,
        attempts: u32,
        #[source]
        source: E,
    },

    /// The named breaker rejected the next attempt without running it
    #[error("circuit breaker '{breaker}' is open; '{operation}' rejected after {attempts} retries")]
    CircuitOpen { breaker: String, operation: String, attempts: u32 },

    /// The caller's cancellation token fired
    #[error("operation '{operation}' was cancelled after {attempts} retries")]
    Cancelled { operation: String, attempts: u32 },
}

impl<E> RetryError<E> {
    /// Category of the last failure; circuit-open and cancelled map to `Unknown`
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Exhausted { category, .. } => *category,
            Self::CircuitOpen { .. } | Self::Cancelled { .. } => ErrorCategory::Unknown,
        }
    }

    /// Retries performed before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::CircuitOpen { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn operation(&self) -> &str {
        match self {
            Self::Exhausted { operation, .. }
            | Self::CircuitOpen { operation, .. }
            | Self::Cancelled { operation, .. } => operation,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// The last error returned by the operation, if it ran
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Exhausted { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl<E> ErrorClassification for RetryError<E> {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Exhausted { .. } => ErrorSeverity::Error,
            Self::CircuitOpen { .. } => ErrorSeverity::Warning,
            Self::Cancelled { .. } => ErrorSeverity::Info,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Summary of one executor call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub operation_name: String,
    pub success: bool,
    /// Retries performed (0 when the first attempt settled the call)
    pub attempts_used: u32,
    #[serde(with = "duration_secs")]
    pub total_elapsed: Duration,
    /// Category of the last classified failure, if any
    pub final_category: Option<ErrorCategory>,
}

/// Retry executor bound to a [`ResilienceContext`] and a default policy
///
/// Cheap to clone; clones share the context and the jitter source.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    context: ResilienceContext,
    policy: Arc<RetryPolicy>,
    jitter_rng: Option<Arc<Mutex<StdRng>>>,
}

impl RetryExecutor {
    pub fn new(context: ResilienceContext, policy: RetryPolicy) -> Self {
        Self { context, policy: Arc::new(policy), jitter_rng: None }
    }

    /// Draw jitter from an RNG seeded with `seed` for reproducible delays
    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_rng = Some(Arc::new(Mutex::new(StdRng::seed_from_u64(seed))));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn context(&self) -> &ResilienceContext {
        &self.context
    }

    /// Run `operation` with the executor's policy
    ///
    /// `breaker` names the circuit breaker to route every attempt through.
    /// The error type must implement `std::error::Error`; operations that
    /// return `anyhow::Error` or a boxed error go through
    /// [`RetryExecutor::execute_dyn`].
    #[instrument(skip_all, fields(operation = operation_name, breaker = ?breaker))]
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation_name: &str,
        breaker: Option<&str>,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let policy = Arc::clone(&self.policy);
        self.run(&policy, operation_name, breaker, None, classify::<E>, operation).await.0
    }

    /// Run `operation` with an explicit policy instead of the executor's
    #[instrument(skip_all, fields(operation = operation_name, breaker = ?breaker))]
    pub async fn execute_with_policy<F, Fut, T, E>(
        &self,
        policy: &RetryPolicy,
        operation_name: &str,
        breaker: Option<&str>,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        self.run(policy, operation_name, breaker, None, classify::<E>, operation).await.0
    }

    /// Like [`RetryExecutor::execute`], also returning the recorded outcome
    pub async fn execute_with_outcome<F, Fut, T, E>(
        &self,
        operation_name: &str,
        breaker: Option<&str>,
        operation: F,
    ) -> (Result<T, RetryError<E>>, RetryOutcome)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let policy = Arc::clone(&self.policy);
        self.run(&policy, operation_name, breaker, None, classify::<E>, operation).await
    }

    /// Run `operation` until it settles or `token` is cancelled
    ///
    /// Cancellation interrupts the in-flight attempt or backoff sleep and
    /// returns [`RetryError::Cancelled`].
    #[instrument(skip_all, fields(operation = operation_name, breaker = ?breaker))]
    pub async fn execute_until_cancelled<F, Fut, T, E>(
        &self,
        token: &CancellationToken,
        operation_name: &str,
        breaker: Option<&str>,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let policy = Arc::clone(&self.policy);
        self.run(&policy, operation_name, breaker, Some(token), classify::<E>, operation).await.0
    }

    /// Run an operation whose errors are boxed trait objects
    ///
    /// Classification reads the boxed error's `source()` chain and message
    /// the same way [`RetryExecutor::execute`] does, minus the type-name
    /// hint. An `anyhow::Error` converts with `Into::<BoxError>::into`.
    #[instrument(skip_all, fields(operation = operation_name, breaker = ?breaker))]
    pub async fn execute_dyn<F, Fut, T>(
        &self,
        operation_name: &str,
        breaker: Option<&str>,
        operation: F,
    ) -> Result<T, RetryError<BoxError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        let policy = Arc::clone(&self.policy);
        self.run(&policy, operation_name, breaker, None, classify_boxed, operation).await.0
    }

    async fn run<F, Fut, T, E>(
        &self,
        policy: &RetryPolicy,
        operation_name: &str,
        breaker_name: Option<&str>,
        cancel: Option<&CancellationToken>,
        classify_error: fn(&E) -> ErrorCategory,
        mut operation: F,
    ) -> (Result<T, RetryError<E>>, RetryOutcome)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let started = Instant::now();
        let breaker = breaker_name.map(|name| self.context.breakers().get_or_create(name));
        let mut attempt: u32 = 0;
        let mut last_category: Option<ErrorCategory> = None;

        loop {
            let permit = match &breaker {
                Some(cb) => match cb.try_acquire() {
                    Some(permit) => Some(permit),
                    None => {
                        warn!(
                            operation = operation_name,
                            breaker = cb.name(),
                            retries = attempt,
                            "Circuit breaker open, failing fast"
                        );
                        let err = RetryError::CircuitOpen {
                            breaker: cb.name().to_string(),
                            operation: operation_name.to_string(),
                            attempts: attempt,
                        };
                        return self.finish(
                            Err(err),
                            operation_name,
                            attempt,
                            started,
                            last_category,
                        );
                    }
                },
                None => None,
            };

            debug!(operation = operation_name, attempt = attempt + 1, "Executing operation");

            let Some(result) = race(cancel, operation()).await else {
                // The permit is dropped unsettled here, releasing any probe slot
                return self.cancelled(operation_name, attempt, started, last_category);
            };

            let error = match result {
                Ok(value) => {
                    if let Some(permit) = permit {
                        permit.record_success();
                    }
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            retries = attempt,
                            "Operation succeeded after retries"
                        );
                    }
                    return self.finish(Ok(value), operation_name, attempt, started, last_category);
                }
                Err(error) => error,
            };

            if let Some(permit) = permit {
                permit.record_failure();
            }

            let category = classify_error(&error);
            last_category = Some(category);
            let budget = policy.effective_retries(category);

            if attempt >= budget {
                error!(
                    operation = operation_name,
                    %category,
                    retries = attempt,
                    error = %error,
                    "Operation failed, no retries left"
                );
                let err = RetryError::Exhausted {
                    operation: operation_name.to_string(),
                    category,
                    attempts: attempt,
                    source: error,
                };
                return self.finish(Err(err), operation_name, attempt, started, last_category);
            }

            let delay = self.next_delay(policy, attempt, category);
            warn!(
                operation = operation_name,
                %category,
                attempt = attempt + 1,
                max_retries = budget,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Operation failed, retrying"
            );

            if race(cancel, tokio::time::sleep(delay)).await.is_none() {
                return self.cancelled(operation_name, attempt, started, last_category);
            }
            attempt += 1;
        }
    }

    fn next_delay(&self, policy: &RetryPolicy, attempt: u32, category: ErrorCategory) -> Duration {
        match &self.jitter_rng {
            Some(rng) => compute_delay_with_rng(policy, attempt, category, &mut *rng.lock()),
            None => policy.compute_delay(attempt, category),
        }
    }

    fn cancelled<T, E>(
        &self,
        operation_name: &str,
        attempt: u32,
        started: Instant,
        category: Option<ErrorCategory>,
    ) -> (Result<T, RetryError<E>>, RetryOutcome) {
        warn!(operation = operation_name, retries = attempt, "Operation cancelled");
        let err =
            RetryError::Cancelled { operation: operation_name.to_string(), attempts: attempt };
        self.finish(Err(err), operation_name, attempt, started, category)
    }

    fn finish<T, E>(
        &self,
        result: Result<T, RetryError<E>>,
        operation_name: &str,
        attempts_used: u32,
        started: Instant,
        final_category: Option<ErrorCategory>,
    ) -> (Result<T, RetryError<E>>, RetryOutcome) {
        let outcome = RetryOutcome {
            operation_name: operation_name.to_string(),
            success: result.is_ok(),
            attempts_used,
            total_elapsed: started.elapsed(),
            final_category,
        };

        // Circuit-open rejections count as failures without a category
        let recorded_category = match &result {
            Err(RetryError::CircuitOpen { .. }) => None,
            _ => outcome.final_category,
        };
        self.context.metrics().record(
            outcome.success,
            outcome.attempts_used,
            outcome.total_elapsed,
            recorded_category,
        );

        (result, outcome)
    }
}

fn classify_boxed(error: &BoxError) -> ErrorCategory {
    classify_dyn(&**error)
}

/// Await `fut` unless `cancel` fires first
async fn race<Fut: Future>(cancel: Option<&CancellationToken>, fut: Fut) -> Option<Fut::Output> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            output = fut => Some(output),
        },
        None => Some(fut.await),
    }
}
