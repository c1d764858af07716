//! Active health reporting for the guarded graph client

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use graphguard_common::resilience::ResilienceStatus;
use serde::{Deserialize, Serialize};

/// Service name reported by [`HealthReport`]
pub const SERVICE_NAME: &str = "graphguard";

/// Component name of the graph database check
pub const DATABASE_COMPONENT: &str = "database";
/// Component name of the embedding service check
pub const EMBEDDER_COMPONENT: &str = "embedder";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    /// At least one component is unhealthy (overall status only)
    Degraded,
    Unhealthy,
}

/// Result of probing one dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthState,
    /// Last error seen by the probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self { status: HealthState::Healthy, error: None }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self { status: HealthState::Unhealthy, error: Some(error.into()) }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// Health report with the resilience snapshot attached
///
/// Serializes flat: `service`, `status`, `timestamp`, `components`, then the
/// `metrics`, `circuit_breakers` and `retry_policy` of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub service: String,
    pub status: HealthState,
    pub timestamp: DateTime<Utc>,
    pub components: BTreeMap<String, ComponentHealth>,
    #[serde(flatten)]
    pub resilience: ResilienceStatus,
}

impl HealthReport {
    /// Build a report; the overall status is degraded if any component is not healthy
    pub fn new(components: BTreeMap<String, ComponentHealth>, resilience: ResilienceStatus) -> Self {
        let status = if components.values().all(ComponentHealth::is_healthy) {
            HealthState::Healthy
        } else {
            HealthState::Degraded
        };

        Self {
            service: SERVICE_NAME.to_string(),
            status,
            timestamp: Utc::now(),
            components,
            resilience,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}
