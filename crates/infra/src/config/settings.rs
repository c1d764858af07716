use std::collections::BTreeMap;

use graphguard_common::resilience::{
    BreakerRegistry, CircuitBreakerPolicy, ResilienceContext, RetryPolicy, DATABASE_BREAKER,
    EMBEDDER_BREAKER,
};
use graphguard_common::CommonError;
use serde::{Deserialize, Serialize};

use crate::errors::InfraResult;

/// Retry and breaker settings for one process
///
/// Every field has a default, so a settings file only needs to name what it
/// changes:
///
/// ```toml
/// [retry]
/// max_retries = 5
/// base_delay = 0.5
///
/// [breakers.embedder]
/// failure_threshold = 2
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Policy used by executors that do not pick their own
    pub retry: RetryPolicy,
    /// Per-name breaker policies, registered up front
    pub breakers: BTreeMap<String, CircuitBreakerPolicy>,
    /// Policy for breakers created on first use
    pub default_breaker: CircuitBreakerPolicy,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        let breakers = BTreeMap::from([
            (EMBEDDER_BREAKER.to_string(), CircuitBreakerPolicy::embedder()),
            (DATABASE_BREAKER.to_string(), CircuitBreakerPolicy::database()),
        ]);
        Self { retry: RetryPolicy::default(), breakers, default_breaker: CircuitBreakerPolicy::default() }
    }
}

impl ResilienceSettings {
    /// Check every policy in the settings
    ///
    /// # Errors
    /// Returns the first validation error, with the field prefixed by the
    /// settings path it came from (`retry`, `breakers.<name>`,
    /// `default_breaker`).
    pub fn validate(&self) -> InfraResult<()> {
        self.retry.validate().map_err(|e| scoped("retry", e))?;
        self.default_breaker.validate().map_err(|e| scoped("default_breaker", e))?;
        for (name, policy) in &self.breakers {
            policy.validate().map_err(|e| scoped(&format!("breakers.{name}"), e))?;
        }
        Ok(())
    }

    /// Build a context with every configured breaker registered
    ///
    /// # Errors
    /// Returns a validation error if any policy is invalid.
    pub fn into_context(self) -> InfraResult<ResilienceContext> {
        self.validate()?;
        let registry = BreakerRegistry::new(self.default_breaker)?;
        for (name, policy) in self.breakers {
            registry.register(&name, policy)?;
        }
        Ok(ResilienceContext::with_registry(registry, self.retry)?)
    }
}

fn scoped(prefix: &str, err: CommonError) -> CommonError {
    match err {
        CommonError::Validation { field, message, value } => {
            CommonError::Validation { field: format!("{prefix}.{field}"), message, value }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use graphguard_common::resilience::CircuitState;

    use super::*;

    #[test]
    fn test_default_settings_register_standard_breakers() {
        let settings = ResilienceSettings::default();
        assert!(settings.validate().is_ok());

        let context = settings.into_context().expect("default settings are valid");
        assert_eq!(context.breakers().names(), vec!["database", "embedder"]);

        let embedder = context.breakers().get(EMBEDDER_BREAKER).expect("registered");
        assert_eq!(embedder.policy().failure_threshold, 3);
        assert_eq!(embedder.state(), CircuitState::Closed);
    }

    #[test]
    fn test_validation_error_names_breaker() {
        let mut settings = ResilienceSettings::default();
        settings.breakers.insert(
            "search".into(),
            CircuitBreakerPolicy { failure_threshold: 0, ..Default::default() },
        );

        let err = settings.validate().expect_err("zero threshold is invalid");
        let message = err.to_string();
        assert!(message.contains("breakers.search"), "{message}");
    }

    #[test]
    fn test_unlisted_breaker_uses_default_policy() {
        let settings = ResilienceSettings {
            default_breaker: CircuitBreakerPolicy {
                failure_threshold: 7,
                open_timeout: Duration::from_secs(15),
                ..Default::default()
            },
            ..Default::default()
        };

        let context = settings.into_context().expect("valid settings");
        let search = context.breakers().get_or_create("search");
        assert_eq!(search.policy().failure_threshold, 7);
        assert_eq!(search.policy().open_timeout, Duration::from_secs(15));
    }
}
