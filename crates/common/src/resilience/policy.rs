//! Immutable retry and circuit breaker policies
//!
//! Policies are built once (from code, the environment or a settings file),
//! validated, and then shared read-only by every caller, typically behind an
//! `Arc`.
//!
//! ## Environment Variables
//! - `RETRY_MAX_RETRIES`: default retry count when no category override applies
//! - `RETRY_BASE_DELAY`: default base delay in seconds
//! - `RETRY_MAX_DELAY`: delay cap in seconds
//! - `RETRY_BACKOFF_MULTIPLIER`: exponential growth factor
//! - `RETRY_JITTER`: enable/disable jitter (`true`/`false`, `1`/`0`, `yes`/`no`, `on`/`off`)
//! - `RETRY_JITTER_RANGE`: jitter fraction, 0-1

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::category::ErrorCategory;
use crate::error::{CommonError, CommonResult};
use crate::utils::serde::{duration_secs, secs_to_duration};

/// Environment variable for [`RetryPolicy::max_retries`]
pub const ENV_MAX_RETRIES: &str = "RETRY_MAX_RETRIES";
/// Environment variable for [`RetryPolicy::base_delay`]
pub const ENV_BASE_DELAY: &str = "RETRY_BASE_DELAY";
/// Environment variable for [`RetryPolicy::max_delay`]
pub const ENV_MAX_DELAY: &str = "RETRY_MAX_DELAY";
/// Environment variable for [`RetryPolicy::backoff_multiplier`]
pub const ENV_BACKOFF_MULTIPLIER: &str = "RETRY_BACKOFF_MULTIPLIER";
/// Environment variable for [`RetryPolicy::jitter_enabled`]
pub const ENV_JITTER: &str = "RETRY_JITTER";
/// Environment variable for [`RetryPolicy::jitter_range`]
pub const ENV_JITTER_RANGE: &str = "RETRY_JITTER_RANGE";

/// Default retry count
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default base delay
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Default delay cap
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
/// Default exponential growth factor
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
/// Default jitter fraction (±25%)
pub const DEFAULT_JITTER_RANGE: f64 = 0.25;

/// Cap applied by [`RetryPolicy::general`]
const GENERAL_DELAY_CAP: Duration = Duration::from_secs(30);

/// Retry behaviour shared by all callers of an executor
///
/// The category maps override the global `max_retries` and `base_delay` for
/// failures of that category. Categories missing from a map use the global
/// value. `max_retries` also caps every category budget, so a call never
/// makes more than `max_retries + 1` attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed when no category override applies
    pub max_retries: u32,
    /// Delay before the first retry when no category override applies
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,
    /// Upper bound for the un-jittered delay
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    /// Exponential growth factor per attempt
    pub backoff_multiplier: f64,
    /// Whether delays are randomized
    pub jitter_enabled: bool,
    /// Jitter band as a fraction of the delay (0.25 = ±25%)
    pub jitter_range: f64,
    /// Per-category retry budgets
    pub retries_by_category: BTreeMap<ErrorCategory, u32>,
    /// Per-category base delays
    #[serde(with = "category_delays")]
    pub base_delay_by_category: BTreeMap<ErrorCategory, Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter_enabled: true,
            jitter_range: DEFAULT_JITTER_RANGE,
            retries_by_category: default_category_retries(),
            base_delay_by_category: default_category_delays(),
        }
    }
}

/// Retry budgets per category
///
/// Auth and client errors fail fast; transport-level trouble gets the most
/// attempts.
fn default_category_retries() -> BTreeMap<ErrorCategory, u32> {
    BTreeMap::from([
        (ErrorCategory::Network, 5),
        (ErrorCategory::Timeout, 3),
        (ErrorCategory::RateLimit, 2),
        (ErrorCategory::Auth, 0),
        (ErrorCategory::ServerError, 3),
        (ErrorCategory::ClientError, 0),
        (ErrorCategory::Embedding, 4),
        (ErrorCategory::Database, 3),
        (ErrorCategory::Unknown, 2),
    ])
}

/// Base delays per category
///
/// Rate-limited and database failures back off from a higher base than
/// network and timeout failures.
fn default_category_delays() -> BTreeMap<ErrorCategory, Duration> {
    BTreeMap::from([
        (ErrorCategory::Network, Duration::from_secs(1)),
        (ErrorCategory::Timeout, Duration::from_secs(2)),
        (ErrorCategory::RateLimit, Duration::from_secs(5)),
        (ErrorCategory::Auth, Duration::ZERO),
        (ErrorCategory::ServerError, Duration::from_secs(2)),
        (ErrorCategory::ClientError, Duration::ZERO),
        (ErrorCategory::Embedding, Duration::from_millis(1500)),
        (ErrorCategory::Database, Duration::from_secs(3)),
        (ErrorCategory::Unknown, Duration::from_secs(2)),
    ])
}

impl RetryPolicy {
    /// Create a policy builder starting from the defaults
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Preset for embedding calls: more retries, gentler growth, wider jitter
    pub fn embedding() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.8,
            jitter_range: 0.3,
            ..Self::default()
        }
    }

    /// Preset for graph database calls: quick first retry, low cap
    pub fn database() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_range: 0.2,
            ..Self::default()
        }
    }

    /// Preset for callers that only know a retry count and a base delay
    ///
    /// The delay cap is `min(base_delay * 2^retries, 30s)`.
    pub fn general(retries: u32, base_delay: Duration) -> Self {
        let growth = 2_f64.powi(retries.min(30) as i32);
        let cap_secs = (base_delay.as_secs_f64() * growth).min(GENERAL_DELAY_CAP.as_secs_f64());
        let cap = Duration::from_secs_f64(cap_secs).max(base_delay);
        Self {
            max_retries: retries,
            base_delay,
            max_delay: cap,
            backoff_multiplier: 2.0,
            ..Self::default()
        }
    }

    /// Build the default policy from `RETRY_*` environment variables
    ///
    /// Unset variables keep their defaults; the category tables are kept.
    ///
    /// # Errors
    /// Returns `CommonError::Config` naming the variable when a value cannot
    /// be parsed, or a validation error when the result is inconsistent.
    pub fn from_env() -> CommonResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the default policy from an arbitrary variable source
    ///
    /// # Errors
    /// Same as [`RetryPolicy::from_env`].
    pub fn from_lookup<F>(lookup: F) -> CommonResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut policy = Self::default();

        if let Some(value) = lookup(ENV_MAX_RETRIES) {
            policy.max_retries = parse_var(ENV_MAX_RETRIES, &value)?;
        }
        if let Some(value) = lookup(ENV_BASE_DELAY) {
            policy.base_delay = parse_secs(ENV_BASE_DELAY, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_DELAY) {
            policy.max_delay = parse_secs(ENV_MAX_DELAY, &value)?;
        }
        if let Some(value) = lookup(ENV_BACKOFF_MULTIPLIER) {
            policy.backoff_multiplier = parse_var(ENV_BACKOFF_MULTIPLIER, &value)?;
        }
        if let Some(value) = lookup(ENV_JITTER) {
            policy.jitter_enabled = parse_bool(ENV_JITTER, &value)?;
        }
        if let Some(value) = lookup(ENV_JITTER_RANGE) {
            policy.jitter_range = parse_var(ENV_JITTER_RANGE, &value)?;
        }

        policy.validate()?;
        Ok(policy)
    }

    /// Check the policy invariants
    ///
    /// # Errors
    /// Returns a validation error if `max_delay < base_delay`, if
    /// `jitter_range` is outside `[0, 1]`, or if `backoff_multiplier` is not a
    /// finite number ≥ 1.
    pub fn validate(&self) -> CommonResult<()> {
        if self.max_delay < self.base_delay {
            return Err(CommonError::validation_with_value(
                "max_delay",
                format!("must not be smaller than base_delay ({:?})", self.base_delay),
                format!("{:?}", self.max_delay),
            ));
        }

        if !(self.jitter_range.is_finite() && (0.0..=1.0).contains(&self.jitter_range)) {
            return Err(CommonError::validation_with_value(
                "jitter_range",
                "must be within [0, 1]",
                self.jitter_range.to_string(),
            ));
        }

        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(CommonError::validation_with_value(
                "backoff_multiplier",
                "must be a finite number >= 1.0",
                self.backoff_multiplier.to_string(),
            ));
        }

        Ok(())
    }

    /// Retry budget configured for a category
    pub fn retries_for(&self, category: ErrorCategory) -> u32 {
        self.retries_by_category.get(&category).copied().unwrap_or(self.max_retries)
    }

    /// Retries the executor allows for a category, capped by `max_retries`
    pub fn effective_retries(&self, category: ErrorCategory) -> u32 {
        self.retries_for(category).min(self.max_retries)
    }

    /// Base delay for a category
    pub fn base_delay_for(&self, category: ErrorCategory) -> Duration {
        self.base_delay_by_category.get(&category).copied().unwrap_or(self.base_delay)
    }
}

/// Builder for [`RetryPolicy`] with fluent API
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self { policy: RetryPolicy::default() }
    }

    /// Start from an existing policy, e.g. a preset
    pub fn from_policy(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.policy.max_retries = retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.policy.backoff_multiplier = multiplier;
        self
    }

    pub fn jitter(mut self, range: f64) -> Self {
        self.policy.jitter_enabled = true;
        self.policy.jitter_range = range;
        self
    }

    pub fn no_jitter(mut self) -> Self {
        self.policy.jitter_enabled = false;
        self
    }

    pub fn category_retries(mut self, category: ErrorCategory, retries: u32) -> Self {
        self.policy.retries_by_category.insert(category, retries);
        self
    }

    pub fn category_base_delay(mut self, category: ErrorCategory, delay: Duration) -> Self {
        self.policy.base_delay_by_category.insert(category, delay);
        self
    }

    /// Drop every category override so the global values always apply
    pub fn clear_category_overrides(mut self) -> Self {
        self.policy.retries_by_category.clear();
        self.policy.base_delay_by_category.clear();
        self
    }

    pub fn build(self) -> CommonResult<RetryPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

/// Circuit breaker thresholds for one named dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerPolicy {
    /// Failures counted while closed before the breaker opens
    pub failure_threshold: u32,
    /// Time an open breaker waits before letting a probe through
    #[serde(with = "duration_secs")]
    pub open_timeout: Duration,
    /// Time without failures after which a closed breaker forgets old failures
    #[serde(with = "duration_secs")]
    pub reset_timeout: Duration,
    /// Probe calls admitted while half-open; this many successes close it
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(300),
            half_open_max_probes: 3,
        }
    }
}

impl CircuitBreakerPolicy {
    /// Create a builder starting from the defaults
    pub fn builder() -> CircuitBreakerPolicyBuilder {
        CircuitBreakerPolicyBuilder::new()
    }

    /// Preset for the embedding service
    pub fn embedder() -> Self {
        Self {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(120),
            half_open_max_probes: 2,
        }
    }

    /// Preset for the graph database
    pub fn database() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(300),
            half_open_max_probes: 3,
        }
    }

    /// Check the policy invariants
    pub fn validate(&self) -> CommonResult<()> {
        if self.failure_threshold == 0 {
            return Err(CommonError::validation(
                "failure_threshold",
                "must be greater than 0",
            ));
        }

        if self.half_open_max_probes == 0 {
            return Err(CommonError::validation(
                "half_open_max_probes",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Builder for [`CircuitBreakerPolicy`]
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerPolicyBuilder {
    policy: CircuitBreakerPolicy,
}

impl CircuitBreakerPolicyBuilder {
    pub fn new() -> Self {
        Self { policy: CircuitBreakerPolicy::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.policy.failure_threshold = threshold;
        self
    }

    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.policy.open_timeout = timeout;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.policy.reset_timeout = timeout;
        self
    }

    pub fn half_open_max_probes(mut self, probes: u32) -> Self {
        self.policy.half_open_max_probes = probes;
        self
    }

    pub fn build(self) -> CommonResult<CircuitBreakerPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

/// Serde adapter for the per-category delay map (seconds on the wire)
mod category_delays {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{secs_to_duration, ErrorCategory};

    pub fn serialize<S>(
        delays: &BTreeMap<ErrorCategory, Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(delays.iter().map(|(category, delay)| (category, delay.as_secs_f64())))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<ErrorCategory, Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<ErrorCategory, f64>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(category, secs)| {
                secs_to_duration(secs).map(|delay| (category, delay)).ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        "invalid base delay for category {category}: {secs}"
                    ))
                })
            })
            .collect()
    }
}

fn parse_var<T>(key: &str, value: &str) -> CommonResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| CommonError::config_field(key, format!("invalid value '{value}': {e}")))
}

fn parse_secs(key: &str, value: &str) -> CommonResult<Duration> {
    let secs: f64 = parse_var(key, value)?;
    secs_to_duration(secs).ok_or_else(|| {
        CommonError::config_field(key, format!("'{value}' is not a non-negative number of seconds"))
    })
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn parse_bool(key: &str, value: &str) -> CommonResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CommonError::config_field(key, format!("invalid boolean '{value}'"))),
    }
}
