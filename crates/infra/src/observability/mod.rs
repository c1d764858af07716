//! Logging setup
//!
//! The resilience core only emits `tracing` events; this module installs the
//! process-wide subscriber that turns them into output. Filtering follows
//! `RUST_LOG` and defaults to `info`, so retries (`warn`) and breaker
//! transitions (`info`/`warn`) are visible out of the box.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

use crate::errors::{InfraError, InfraResult};

/// Selects the output format (`text` or `json`)
pub const ENV_LOG_FORMAT: &str = "GRAPHGUARD_LOG_FORMAT";

const DEFAULT_FILTER: &str = "info";

/// Output format of the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = InfraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(InfraError::Tracing(format!("unknown log format '{other}'"))),
        }
    }
}

/// Install the global tracing subscriber
///
/// # Errors
/// Returns `InfraError::Tracing` if a global subscriber is already set.
pub fn init_tracing(format: LogFormat) -> InfraResult<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());

    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| InfraError::Tracing(e.to_string()))
}

/// Install the global subscriber with the format named by
/// `GRAPHGUARD_LOG_FORMAT`
///
/// # Errors
/// Returns `InfraError::Tracing` for an unknown format or when a global
/// subscriber is already set.
pub fn init_tracing_from_env() -> InfraResult<()> {
    let format = std::env::var(ENV_LOG_FORMAT).ok().map(|v| v.parse()).transpose()?;
    init_tracing(format.unwrap_or_default())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
