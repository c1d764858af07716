//! Named circuit breaker guarding one downstream dependency
//!
//! State machine:
//! - **Closed**: calls pass. Failures accumulate; reaching
//!   `failure_threshold` opens the breaker. Successes walk the failure count
//!   back toward zero, and a failure count whose last failure is older than
//!   `reset_timeout` is cleared.
//! - **Open**: calls are rejected until `open_timeout` has elapsed since the
//!   last failure, then the next call moves the breaker to half-open.
//! - **HalfOpen**: at most `half_open_max_probes` probes run. That many
//!   successes close the breaker; any failure reopens it.
//!
//! All state lives behind one mutex that is never held across an `.await`.
//! Callers get a [`BreakerPermit`] on admission and report the outcome
//! through it; a permit dropped without an outcome (e.g. a cancelled call)
//! hands its half-open probe slot back.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::policy::CircuitBreakerPolicy;
use crate::error::CommonResult;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected
    Open,
    /// A limited number of probes test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of a breaker, shaped for health endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    /// Successful probes in the current half-open window
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    last_failure: Option<Instant>,
    last_failure_wall: Option<SystemTime>,
    /// Bumped on every transition so stale permits cannot touch a newer window
    generation: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            half_open_in_flight: 0,
            last_failure: None,
            last_failure_wall: None,
            generation: 0,
        }
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.half_open_successes = 0;
        self.half_open_in_flight = 0;
        self.generation += 1;
    }
}

/// Circuit breaker for one named dependency
pub struct CircuitBreaker {
    name: String,
    policy: CircuitBreakerPolicy,
    state: Mutex<BreakerState>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("state", &state.state)
            .field("failure_count", &state.failure_count)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker using the system clock
    ///
    /// # Errors
    /// Returns a validation error if the policy is invalid.
    pub fn new(name: impl Into<String>, policy: CircuitBreakerPolicy) -> CommonResult<Self> {
        Self::with_clock(name, policy, Arc::new(SystemClock))
    }

    /// Create a breaker with a custom clock (useful for testing)
    pub fn with_clock(
        name: impl Into<String>,
        policy: CircuitBreakerPolicy,
        clock: Arc<dyn Clock>,
    ) -> CommonResult<Self> {
        policy.validate()?;
        Ok(Self::from_validated(name, policy, clock))
    }

    pub(crate) fn from_validated(
        name: impl Into<String>,
        policy: CircuitBreakerPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { name: name.into(), policy, state: Mutex::new(BreakerState::new()), clock }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &CircuitBreakerPolicy {
        &self.policy
    }

    /// Current state, without applying any time-based transition
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Ask to run one call through the breaker
    ///
    /// Returns `None` when the call must be rejected. Time-based transitions
    /// (open → half-open, closed failure reset) are applied here.
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => {
                let stale = self
                    .elapsed_since_failure(&state, now)
                    .is_some_and(|elapsed| elapsed >= self.policy.reset_timeout);
                if state.failure_count > 0 && stale {
                    debug!(
                        breaker = %self.name,
                        failures = state.failure_count,
                        "Failure count cleared after reset timeout"
                    );
                    state.failure_count = 0;
                }
            }
            CircuitState::Open => {
                let ready = self
                    .elapsed_since_failure(&state, now)
                    .map_or(true, |elapsed| elapsed >= self.policy.open_timeout);
                if !ready {
                    return None;
                }
                state.transition(CircuitState::HalfOpen);
                info!(breaker = %self.name, "Circuit breaker half-open, probing dependency");
                state.half_open_in_flight += 1;
            }
            CircuitState::HalfOpen => {
                let admitted = state.half_open_successes + state.half_open_in_flight;
                if admitted >= self.policy.half_open_max_probes {
                    return None;
                }
                state.half_open_in_flight += 1;
            }
        }

        Some(BreakerPermit {
            breaker: self,
            probe: state.state == CircuitState::HalfOpen,
            generation: state.generation,
            settled: false,
        })
    }

    /// Snapshot for status reporting
    pub fn status(&self) -> BreakerStatus {
        let state = self.state.lock();
        BreakerStatus {
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.half_open_successes,
            last_failure_time: state.last_failure_wall.map(DateTime::<Utc>::from),
        }
    }

    /// Force the breaker back to closed with no recorded failures
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.transition(CircuitState::Closed);
        state.failure_count = 0;
        state.last_failure = None;
        state.last_failure_wall = None;
        info!(breaker = %self.name, "Circuit breaker manually reset to closed state");
    }

    fn elapsed_since_failure(&self, state: &BreakerState, now: Instant) -> Option<Duration> {
        state.last_failure.map(|at| now.saturating_duration_since(at))
    }

    fn on_success(&self, probe: bool, generation: u64) {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => {
                state.failure_count = state.failure_count.saturating_sub(1);
            }
            CircuitState::HalfOpen if probe && generation == state.generation => {
                state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
                state.half_open_successes += 1;
                if state.half_open_successes >= self.policy.half_open_max_probes {
                    let successes = state.half_open_successes;
                    state.transition(CircuitState::Closed);
                    state.failure_count = 0;
                    info!(breaker = %self.name, successes, "Circuit breaker closed");
                }
            }
            // Late result from a call admitted under an earlier window
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool, generation: u64) {
        let now = self.clock.now();
        let wall = self.clock.system_time();
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                state.last_failure = Some(now);
                state.last_failure_wall = Some(wall);
                if state.failure_count >= self.policy.failure_threshold {
                    state.transition(CircuitState::Open);
                    warn!(
                        breaker = %self.name,
                        failures = state.failure_count,
                        open_for_secs = self.policy.open_timeout.as_secs_f64(),
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen if probe && generation == state.generation => {
                state.failure_count += 1;
                state.last_failure = Some(now);
                state.last_failure_wall = Some(wall);
                state.transition(CircuitState::Open);
                warn!(breaker = %self.name, "Circuit breaker reopened after failed probe");
            }
            _ => {}
        }
    }

    fn on_abandon(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.state == CircuitState::HalfOpen && generation == state.generation {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
            debug!(breaker = %self.name, "Half-open probe abandoned, slot released");
        }
    }
}

/// Admission ticket for one call through a [`CircuitBreaker`]
#[must_use = "report the call outcome with record_success or record_failure"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    generation: u64,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Whether this call is a half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe, self.generation);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe, self.generation);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.on_abandon(self.generation);
        }
    }
}

impl fmt::Debug for BreakerPermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerPermit")
            .field("breaker", &self.breaker.name)
            .field("probe", &self.probe)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::clock::MockClock;

    fn breaker(threshold: u32, open_secs: u64, probes: u32) -> (CircuitBreaker, MockClock) {
        let clock = MockClock::new();
        let policy = CircuitBreakerPolicy::builder()
            .failure_threshold(threshold)
            .open_timeout(Duration::from_secs(open_secs))
            .reset_timeout(Duration::from_secs(300))
            .half_open_max_probes(probes)
            .build()
            .expect("valid policy");
        let cb = CircuitBreaker::with_clock("test", policy, Arc::new(clock.clone()))
            .expect("valid breaker");
        (cb, clock)
    }

    fn fail(cb: &CircuitBreaker) {
        cb.try_acquire().expect("call should be admitted").record_failure();
    }

    fn succeed(cb: &CircuitBreaker) {
        cb.try_acquire().expect("call should be admitted").record_success();
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let policy = CircuitBreakerPolicy { failure_threshold: 0, ..Default::default() };
        assert!(CircuitBreaker::new("bad", policy).is_err());
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let (cb, _clock) = breaker(3, 30, 2);

        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_none());
        assert!(cb.status().last_failure_time.is_some());
    }

    /// Validates gradual recovery: successes while closed pay down the
    /// failure count without going below zero.
    #[test]
    fn test_success_while_closed_decrements_failures() {
        let (cb, _clock) = breaker(3, 30, 2);

        fail(&cb);
        fail(&cb);
        succeed(&cb);
        assert_eq!(cb.status().failure_count, 1);

        succeed(&cb);
        succeed(&cb);
        assert_eq!(cb.status().failure_count, 0);

        // Two more failures are not enough after the pay-down
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_rejects_until_open_timeout() {
        let (cb, clock) = breaker(1, 30, 2);
        fail(&cb);

        clock.advance_secs(10);
        assert!(cb.try_acquire().is_none());
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance_secs(20);
        let permit = cb.try_acquire().expect("probe admitted at open_timeout");
        assert!(permit.is_probe());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        permit.record_success();
    }

    #[test]
    fn test_half_open_closes_after_probe_successes() {
        let (cb, clock) = breaker(2, 30, 2);
        fail(&cb);
        fail(&cb);
        clock.advance_secs(31);

        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.status().success_count, 1);
        succeed(&cb);

        let status = cb.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let (cb, clock) = breaker(1, 30, 3);
        fail(&cb);
        clock.advance_secs(31);

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        // The open window restarts from the probe failure
        clock.advance_secs(10);
        assert!(cb.try_acquire().is_none());
    }

    #[test]
    fn test_half_open_limits_concurrent_probes() {
        let (cb, clock) = breaker(1, 30, 2);
        fail(&cb);
        clock.advance_secs(31);

        let first = cb.try_acquire().expect("first probe");
        let second = cb.try_acquire().expect("second probe");
        assert!(cb.try_acquire().is_none(), "probe budget exhausted");

        first.record_success();
        assert!(cb.try_acquire().is_none(), "successes still count against the budget");
        second.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    /// Validates that a dropped probe permit returns its slot.
    #[test]
    fn test_abandoned_probe_releases_slot() {
        let (cb, clock) = breaker(1, 30, 1);
        fail(&cb);
        clock.advance_secs(31);

        let probe = cb.try_acquire().expect("probe admitted");
        assert!(cb.try_acquire().is_none());
        drop(probe);

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_stale_permit_does_not_affect_new_window() {
        let (cb, clock) = breaker(1, 30, 2);
        fail(&cb);
        clock.advance_secs(31);

        let stale = cb.try_acquire().expect("probe admitted");
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        stale.record_success();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset_timeout_clears_old_failures() {
        let (cb, clock) = breaker(3, 30, 2);
        fail(&cb);
        fail(&cb);

        clock.advance(Duration::from_secs(301));
        let permit = cb.try_acquire().expect("closed breaker admits");
        assert_eq!(cb.status().failure_count, 0);
        permit.record_failure();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.status().failure_count, 1);
    }

    #[test]
    fn test_manual_reset() {
        let (cb, _clock) = breaker(1, 30, 2);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        let status = cb.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
        assert!(status.last_failure_time.is_none());
    }

    #[test]
    fn test_status_serializes_for_health_endpoint() {
        let (cb, _clock) = breaker(3, 30, 2);
        fail(&cb);

        let json = serde_json::to_value(cb.status()).expect("status should serialize");
        assert_eq!(json["state"], "closed");
        assert_eq!(json["failure_count"], 1);
        assert!(json["last_failure_time"].is_string());
    }
}
