//! Integration tests for the retry executor
//!
//! Exercises retry budgets, backoff timing, metrics recording and
//! cancellation with tokio's paused clock, so every sleep is observed
//! exactly and no test waits in real time.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use graphguard_common::resilience::{
    ErrorCategory, ResilienceContext, RetryError, RetryPolicy, StatusError,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Error returned by the simulated dependency
#[derive(Debug, Clone)]
struct OpError(String);

impl OpError {
    fn new(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl std::fmt::Display for OpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for OpError {}

fn scenario_policy() -> RetryPolicy {
    RetryPolicy::builder()
        .clear_category_overrides()
        .max_retries(3)
        .base_delay(Duration::from_secs(1))
        .backoff_multiplier(2.0)
        .no_jitter()
        .build()
        .expect("valid policy")
}

fn assert_close(actual: Duration, expected: Duration) {
    let tolerance = Duration::from_millis(5);
    assert!(
        actual >= expected && actual <= expected + tolerance,
        "expected ~{expected:?}, got {actual:?}"
    );
}

/// Validates the two-failures-then-success scenario: exactly two sleeps of
/// 1s and 2s, and two retries reported.
///
/// # Test Steps
/// 1. Fail twice with a network message, then succeed
/// 2. Record the (paused) instant of every invocation
/// 3. Check the gaps between invocations match the backoff schedule
#[tokio::test(start_paused = true)]
async fn test_network_failures_then_success() {
    let context = ResilienceContext::new();
    let executor = context.executor_with(scenario_policy());
    let invocations = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&invocations);

    let (result, outcome) = executor
        .execute_with_outcome("fetch_node", None, || {
            let mut calls = seen.lock().expect("lock poisoned");
            calls.push(Instant::now());
            let attempt = calls.len();
            async move {
                if attempt <= 2 {
                    Err(OpError::new("connection refused by graph service"))
                } else {
                    Ok("node")
                }
            }
        })
        .await;

    assert_eq!(result.expect("third attempt succeeds"), "node");
    assert!(outcome.success);
    assert_eq!(outcome.attempts_used, 2);
    assert_eq!(outcome.final_category, Some(ErrorCategory::Network));

    let calls = invocations.lock().expect("lock poisoned");
    assert_eq!(calls.len(), 3);
    assert_close(calls[1] - calls[0], Duration::from_secs(1));
    assert_close(calls[2] - calls[1], Duration::from_secs(2));

    let summary = context.metrics().summary();
    assert_eq!(summary.total_calls, 1);
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.total_retries, 2);
}

/// Validates fail-fast on authentication errors: one invocation, no sleep,
/// one failure recorded.
#[tokio::test(start_paused = true)]
async fn test_auth_failure_is_not_retried() {
    let context = ResilienceContext::new();
    let policy = RetryPolicy::builder()
        .no_jitter()
        .category_retries(ErrorCategory::Auth, 0)
        .build()
        .expect("valid policy");
    let executor = context.executor_with(policy);
    let calls = AtomicU32::new(0);
    let started = Instant::now();

    let result = executor
        .execute("login", None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(OpError::new("401 Unauthorized")) }
        })
        .await;

    let err = result.expect_err("auth failures are terminal");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(err.category(), ErrorCategory::Auth);
    assert_eq!(err.attempts(), 0);
    assert_eq!(context.metrics().summary().failure_count, 1);
}

/// Validates that every zero-budget category in the default tables fails on
/// the first error without sleeping.
#[tokio::test(start_paused = true)]
async fn test_zero_budget_categories_fail_fast() {
    let executor = ResilienceContext::new().executor();
    let cases = [
        (OpError::new("403 Forbidden"), ErrorCategory::Auth),
        (OpError::new("400 Bad Request: missing group_id"), ErrorCategory::ClientError),
        (OpError::new("episode not found"), ErrorCategory::ClientError),
    ];

    for (error, expected) in cases {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let err = executor
            .execute("zero_budget", None, || {
                calls.fetch_add(1, Ordering::SeqCst);
                let error = error.clone();
                async move { Err::<(), _>(error) }
            })
            .await
            .expect_err("must fail");

        assert_eq!(err.category(), expected, "{error}");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "{error}");
        assert_eq!(started.elapsed(), Duration::ZERO, "{error}");
    }
}

/// Validates that the retry budget comes from the category of the failure,
/// and that a structured status wins over message keywords.
#[tokio::test(start_paused = true)]
async fn test_budget_follows_category() {
    let executor = ResilienceContext::new().executor_with(
        RetryPolicy::builder().no_jitter().build().expect("valid policy"),
    );

    let calls = AtomicU32::new(0);
    let err = executor
        .execute("rate_limited", None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(StatusError::new(429, "slow down")) }
        })
        .await
        .expect_err("must exhaust");

    // Default table: rate_limit gets 2 retries
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(err.category(), ErrorCategory::RateLimit);
    assert_eq!(err.attempts(), 2);
}

/// Validates that N successes and M exhausted failures without retries are
/// all counted exactly once.
#[tokio::test(start_paused = true)]
async fn test_metrics_round_trip() {
    let context = ResilienceContext::new();
    let executor = context.executor();

    for _ in 0..4 {
        executor.execute("ok", None, || async { Ok::<_, OpError>(()) }).await.expect("success");
    }
    for _ in 0..3 {
        let result = executor
            .execute("denied", None, || async { Err::<(), _>(OpError::new("unauthorized")) })
            .await;
        assert!(result.is_err());
    }

    let summary = context.metrics().summary();
    assert_eq!(summary.total_calls, 7);
    assert_eq!(summary.success_count, 4);
    assert_eq!(summary.failure_count, 3);
    assert_eq!(summary.total_retries, 0);
    assert_eq!(summary.categories[&ErrorCategory::Auth].failures, 3);
}

/// Validates that concurrent calls sharing one context lose no metric
/// updates.
#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_share_metrics() {
    let context = ResilienceContext::new();
    let executor = context.executor_with(scenario_policy());

    let calls = (0..50u32).map(|i| {
        let executor = executor.clone();
        async move {
            let attempts = AtomicU32::new(0);
            executor
                .execute("parallel", None, || {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 && i % 2 == 0 {
                            Err(OpError::new("dns lookup failed"))
                        } else {
                            Ok(i)
                        }
                    }
                })
                .await
        }
    });

    let results = join_all(calls).await;
    assert!(results.iter().all(Result::is_ok));

    let summary = context.metrics().summary();
    assert_eq!(summary.total_calls, 50);
    assert_eq!(summary.success_count, 50);
    assert_eq!(summary.total_retries, 25);
}

/// Validates that a cancellation token interrupts the backoff sleep and the
/// operation is not invoked again.
#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_backoff() {
    let context = ResilienceContext::new();
    let policy = RetryPolicy::builder()
        .clear_category_overrides()
        .max_retries(5)
        .base_delay(Duration::from_secs(10))
        .no_jitter()
        .build()
        .expect("valid policy");
    let executor = context.executor_with(policy);
    let token = CancellationToken::new();
    let calls = AtomicU32::new(0);
    let started = Instant::now();

    let (result, ()) = tokio::join!(
        executor.execute_until_cancelled(&token, "slow", None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(OpError::new("network is unreachable")) }
        }),
        async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            token.cancel();
        }
    );

    assert!(matches!(result, Err(RetryError::Cancelled { attempts: 0, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_close(started.elapsed(), Duration::from_millis(500));
    assert_eq!(context.metrics().summary().failure_count, 1);
}

/// Validates that dropping the executor future (an outer timeout) stops the
/// retry loop.
#[tokio::test(start_paused = true)]
async fn test_outer_timeout_stops_retrying() {
    let executor = ResilienceContext::new().executor_with(scenario_policy());
    let calls = Arc::new(AtomicU32::new(0));
    let counted = Arc::clone(&calls);

    let outcome = tokio::time::timeout(
        Duration::from_millis(1500),
        executor.execute("bounded", None, move || {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(OpError::new("connection reset")) }
        }),
    )
    .await;

    assert!(outcome.is_err(), "outer timeout should fire first");
    tokio::time::sleep(Duration::from_secs(30)).await;
    // One call at t=0 and one after the 1s backoff; nothing after the drop
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Validates that the same seed reproduces the same jittered schedule.
#[tokio::test(start_paused = true)]
async fn test_seeded_jitter_schedule_is_reproducible() {
    let policy = RetryPolicy::builder()
        .clear_category_overrides()
        .max_retries(3)
        .jitter(0.5)
        .build()
        .expect("valid policy");

    let mut schedules = Vec::new();
    for _ in 0..2 {
        let executor = ResilienceContext::new().executor_with(policy.clone()).with_jitter_seed(7);
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&stamps);
        let _ = executor
            .execute("jittered", None, || {
                seen.lock().expect("lock poisoned").push(Instant::now());
                async { Err::<(), _>(OpError::new("request timed out")) }
            })
            .await;

        let stamps = stamps.lock().expect("lock poisoned");
        let gaps: Vec<u128> = stamps.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
        schedules.push(gaps);
    }

    assert_eq!(schedules[0].len(), 3);
    for (first, second) in schedules[0].iter().zip(&schedules[1]) {
        assert!(first.abs_diff(*second) <= 1, "{schedules:?}");
    }
}
