//! Exponential backoff with symmetric jitter
//!
//! The un-jittered delay for retry `attempt` (0-based) is
//! `min(base_delay(category) * multiplier^attempt, max_delay)`. With jitter
//! enabled the delay is moved by up to `±jitter_range` of itself and never
//! drops below [`MIN_JITTERED_DELAY`].

use std::time::Duration;

use rand::Rng;

use super::category::ErrorCategory;
use super::policy::RetryPolicy;

/// Lower bound for a jittered delay
pub const MIN_JITTERED_DELAY: Duration = Duration::from_millis(100);

impl RetryPolicy {
    /// Delay before retry `attempt` of a failure in `category`
    ///
    /// Uses the thread-local RNG for jitter.
    pub fn compute_delay(&self, attempt: u32, category: ErrorCategory) -> Duration {
        compute_delay_with_rng(self, attempt, category, &mut rand::thread_rng())
    }

    /// Delay before retry `attempt` without jitter
    pub fn backoff_ceiling(&self, attempt: u32, category: ErrorCategory) -> Duration {
        saturating_secs(raw_delay_secs(self, attempt, category))
    }
}

/// Compute a delay drawing jitter from the supplied RNG
///
/// A seeded RNG makes the jitter sequence reproducible.
pub fn compute_delay_with_rng<R>(
    policy: &RetryPolicy,
    attempt: u32,
    category: ErrorCategory,
    rng: &mut R,
) -> Duration
where
    R: Rng + ?Sized,
{
    let raw = raw_delay_secs(policy, attempt, category);

    if !policy.jitter_enabled {
        return saturating_secs(raw);
    }

    let offset = raw * policy.jitter_range * rng.gen_range(-1.0..=1.0);
    saturating_secs((raw + offset).max(MIN_JITTERED_DELAY.as_secs_f64()))
}

/// Seconds to a `Duration`, clamped to `Duration::MAX` on overflow
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

fn raw_delay_secs(policy: &RetryPolicy, attempt: u32, category: ErrorCategory) -> f64 {
    let base = policy.base_delay_for(category).as_secs_f64();
    let cap = policy.max_delay.as_secs_f64();

    // 0 * inf is NaN, so a zero base short-circuits before the power grows
    if base == 0.0 {
        return 0.0;
    }

    let exponent = attempt.min(i32::MAX as u32) as i32;
    let grown = base * policy.backoff_multiplier.powi(exponent);
    if grown.is_finite() {
        grown.min(cap)
    } else {
        cap
    }
}
