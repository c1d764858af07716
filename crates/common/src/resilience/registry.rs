//! Name → breaker map shared by every executor of a context
//!
//! Breakers are created lazily on first use and live as long as the
//! registry. A name configured with [`BreakerRegistry::register`] uses its
//! own policy; every other name gets the registry default.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::circuit_breaker::{BreakerStatus, CircuitBreaker};
use super::clock::{Clock, SystemClock};
use super::policy::CircuitBreakerPolicy;
use crate::error::CommonResult;

/// Concurrent registry of named circuit breakers
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    policies: DashMap<String, CircuitBreakerPolicy>,
    default_policy: CircuitBreakerPolicy,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("breakers", &self.names())
            .field("default_policy", &self.default_policy)
            .finish()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self {
            breakers: DashMap::new(),
            policies: DashMap::new(),
            default_policy: CircuitBreakerPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl BreakerRegistry {
    /// Create a registry whose unconfigured breakers use `default_policy`
    pub fn new(default_policy: CircuitBreakerPolicy) -> CommonResult<Self> {
        Self::with_clock(default_policy, Arc::new(SystemClock))
    }

    /// Create a registry whose breakers read time from `clock`
    pub fn with_clock(
        default_policy: CircuitBreakerPolicy,
        clock: Arc<dyn Clock>,
    ) -> CommonResult<Self> {
        default_policy.validate()?;
        Ok(Self { breakers: DashMap::new(), policies: DashMap::new(), default_policy, clock })
    }

    /// Configure `name` with its own policy and return its breaker
    ///
    /// A breaker that already exists keeps the policy it was created with.
    pub fn register(
        &self,
        name: &str,
        policy: CircuitBreakerPolicy,
    ) -> CommonResult<Arc<CircuitBreaker>> {
        policy.validate()?;
        Ok(self.register_validated(name, policy))
    }

    /// [`BreakerRegistry::register`] for a policy already known to be valid
    pub(crate) fn register_validated(
        &self,
        name: &str,
        policy: CircuitBreakerPolicy,
    ) -> Arc<CircuitBreaker> {
        self.policies.insert(name.to_string(), policy);
        self.get_or_create(name)
    }

    /// Breaker for `name`, created on first use
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }

        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            let policy = self
                .policies
                .get(name)
                .map(|configured| configured.value().clone())
                .unwrap_or_else(|| self.default_policy.clone());
            debug!(breaker = name, ?policy, "Creating circuit breaker");
            Arc::new(CircuitBreaker::from_validated(name, policy, Arc::clone(&self.clock)))
        });
        Arc::clone(entry.value())
    }

    /// Existing breaker for `name`, without creating one
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Status of every breaker, keyed by name
    pub fn statuses(&self) -> BTreeMap<String, BreakerStatus> {
        self.breakers.iter().map(|entry| (entry.key().clone(), entry.value().status())).collect()
    }

    /// Manually close every breaker
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }
}
