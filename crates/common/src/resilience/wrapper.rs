//! Retry-wrapped callables
//!
//! [`Retrying`] turns any `Fn(A) -> Future<Output = Result<T, E>>` into a
//! callable with the same argument whose calls go through a
//! [`RetryExecutor`]. Third-party clients are wrapped by composition; they
//! are never modified.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;

use super::executor::{RetryError, RetryExecutor};

/// A callable whose every call is retried by an executor
pub struct Retrying<F> {
    executor: RetryExecutor,
    operation_name: String,
    breaker: Option<String>,
    inner: F,
}

impl<F> fmt::Debug for Retrying<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrying")
            .field("operation_name", &self.operation_name)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

impl<F> Retrying<F> {
    pub fn new(executor: RetryExecutor, operation_name: impl Into<String>, inner: F) -> Self {
        Self { executor, operation_name: operation_name.into(), breaker: None, inner }
    }

    /// Route every call through the named breaker
    pub fn with_breaker(mut self, name: impl Into<String>) -> Self {
        self.breaker = Some(name.into());
        self
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// Call the wrapped function with retries
    ///
    /// `args` is cloned for every attempt.
    pub async fn call<A, Fut, T, E>(&self, args: A) -> Result<T, RetryError<E>>
    where
        F: Fn(A) -> Fut,
        A: Clone,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        self.executor
            .execute(&self.operation_name, self.breaker.as_deref(), || (self.inner)(args.clone()))
            .await
    }

    /// Unwrap the original callable
    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl RetryExecutor {
    /// Wrap `inner` so each call is retried under `operation_name`
    pub fn wrap<F>(&self, operation_name: impl Into<String>, inner: F) -> Retrying<F> {
        Retrying::new(self.clone(), operation_name, inner)
    }
}
