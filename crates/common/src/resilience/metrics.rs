//! Aggregated retry metrics
//!
//! Every executor call records exactly one outcome here. Response times are
//! kept in a bounded rolling window: once it grows past [`MAX_SAMPLES`] only
//! the most recent [`TRIMMED_SAMPLES`] are kept.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::category::ErrorCategory;

/// Window size that triggers trimming
pub const MAX_SAMPLES: usize = 1000;
/// Samples kept after trimming
pub const TRIMMED_SAMPLES: usize = 500;

/// Counters for one error category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub calls: u64,
    pub failures: u64,
    pub retries: u64,
}

/// Serializable snapshot of [`RetryMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_retries: u64,
    /// Fraction of calls that succeeded, 0 when nothing was recorded
    pub success_rate: f64,
    pub avg_retries: f64,
    pub avg_response_time_secs: f64,
    pub p95_response_time_secs: f64,
    pub p99_response_time_secs: f64,
    pub sample_count: usize,
    pub categories: BTreeMap<ErrorCategory, CategoryStats>,
    pub uptime_secs: f64,
}

#[derive(Debug)]
struct MetricsInner {
    total_calls: u64,
    success_count: u64,
    failure_count: u64,
    total_retries: u64,
    categories: BTreeMap<ErrorCategory, CategoryStats>,
    response_times: Vec<Duration>,
    started_at: Instant,
}

impl MetricsInner {
    fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            total_retries: 0,
            categories: BTreeMap::new(),
            response_times: Vec::with_capacity(MAX_SAMPLES + 1),
            started_at: Instant::now(),
        }
    }
}

/// Thread-safe metrics aggregator
#[derive(Debug)]
pub struct RetryMetrics {
    inner: Mutex<MetricsInner>,
}

impl Default for RetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryMetrics {
    pub fn new() -> Self {
        Self { inner: Mutex::new(MetricsInner::new()) }
    }

    /// Record the outcome of one executor call
    ///
    /// `category` is the classification of the last failure, if any.
    pub fn record(
        &self,
        success: bool,
        retries_used: u32,
        elapsed: Duration,
        category: Option<ErrorCategory>,
    ) {
        let mut inner = self.inner.lock();
        let retries = u64::from(retries_used);

        inner.total_calls += 1;
        inner.total_retries += retries;
        if success {
            inner.success_count += 1;
        } else {
            inner.failure_count += 1;
        }

        if let Some(category) = category {
            let stats = inner.categories.entry(category).or_default();
            stats.calls += 1;
            stats.retries += retries;
            if !success {
                stats.failures += 1;
            }
        }

        inner.response_times.push(elapsed);
        if inner.response_times.len() > MAX_SAMPLES {
            let excess = inner.response_times.len() - TRIMMED_SAMPLES;
            inner.response_times.drain(..excess);
        }
    }

    /// Snapshot of all counters and response-time statistics
    pub fn summary(&self) -> MetricsSummary {
        let inner = self.inner.lock();

        let mut sorted: Vec<f64> =
            inner.response_times.iter().map(Duration::as_secs_f64).collect();
        sorted.sort_by(f64::total_cmp);

        let calls = inner.total_calls as f64;
        let ratio = |value: u64| if inner.total_calls == 0 { 0.0 } else { value as f64 / calls };
        let avg_response = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };

        MetricsSummary {
            total_calls: inner.total_calls,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            total_retries: inner.total_retries,
            success_rate: ratio(inner.success_count),
            avg_retries: ratio(inner.total_retries),
            avg_response_time_secs: avg_response,
            p95_response_time_secs: percentile(&sorted, 0.95),
            p99_response_time_secs: percentile(&sorted, 0.99),
            sample_count: sorted.len(),
            categories: inner.categories.clone(),
            uptime_secs: inner.started_at.elapsed().as_secs_f64(),
        }
    }

    /// Clear every counter and restart the uptime clock
    pub fn reset(&self) {
        *self.inner.lock() = MetricsInner::new();
    }
}

/// Value at index `floor(n * q)` of an ascending slice
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64 * q).floor() as usize).min(sorted.len() - 1);
    sorted[index]
}
