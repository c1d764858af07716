//! Settings loader
//!
//! Loads [`ResilienceSettings`] from a settings file or from environment
//! variables.
//!
//! ## Loading Strategy
//! 1. Reads `./.env` into the environment if present (existing variables win)
//! 2. Uses the file named by `GRAPHGUARD_CONFIG` if set
//! 3. Otherwise probes the standard locations for a settings file
//! 4. Falls back to environment variables when no file exists
//!
//! Settings are validated before they are returned.
//!
//! ## Environment Variables
//! - `RETRY_MAX_RETRIES`, `RETRY_BASE_DELAY`, `RETRY_MAX_DELAY`,
//!   `RETRY_BACKOFF_MULTIPLIER`, `RETRY_JITTER`, `RETRY_JITTER_RANGE`: the
//!   default retry policy (see `RetryPolicy::from_env`)
//! - `GRAPHGUARD_BREAKER_FAILURE_THRESHOLD`: default breaker threshold
//! - `GRAPHGUARD_BREAKER_OPEN_TIMEOUT`: seconds a tripped breaker stays open
//! - `GRAPHGUARD_BREAKER_RESET_TIMEOUT`: seconds after which old failures are
//!   forgotten
//! - `GRAPHGUARD_BREAKER_HALF_OPEN_PROBES`: probes needed to close again
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./graphguard.toml` or `./graphguard.json`
//! 2. `./config/graphguard.toml` or `./config/graphguard.json`

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use graphguard_common::resilience::RetryPolicy;
use graphguard_common::utils::serde::secs_to_duration;
use graphguard_common::CommonError;

use super::settings::ResilienceSettings;
use crate::errors::{InfraError, InfraResult};

/// Explicit settings file path
pub const ENV_CONFIG_PATH: &str = "GRAPHGUARD_CONFIG";
/// Failure threshold of breakers created on first use
pub const ENV_BREAKER_THRESHOLD: &str = "GRAPHGUARD_BREAKER_FAILURE_THRESHOLD";
/// Open timeout of breakers created on first use (seconds)
pub const ENV_BREAKER_OPEN_TIMEOUT: &str = "GRAPHGUARD_BREAKER_OPEN_TIMEOUT";
/// Reset timeout of breakers created on first use (seconds)
pub const ENV_BREAKER_RESET_TIMEOUT: &str = "GRAPHGUARD_BREAKER_RESET_TIMEOUT";
/// Half-open probe count of breakers created on first use
pub const ENV_BREAKER_PROBES: &str = "GRAPHGUARD_BREAKER_HALF_OPEN_PROBES";

/// Load settings with automatic fallback strategy
///
/// # Errors
/// Returns an error if `.env` is malformed, if a settings file exists but
/// cannot be read or parsed, or if the resulting settings are invalid.
pub fn load() -> InfraResult<ResilienceSettings> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(e) if e.not_found() => {}
        Err(e) => return Err(CommonError::config(format!("Invalid .env file: {e}")).into()),
    }

    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        return load_from_file(Some(PathBuf::from(path)));
    }

    match probe_config_paths() {
        Some(path) => load_from_file(Some(path)),
        None => {
            tracing::debug!("No settings file found, using environment");
            load_from_env()
        }
    }
}

/// Load settings from environment variables
///
/// Unset variables keep their defaults.
///
/// # Errors
/// Returns `CommonError::Config` naming the variable when a value cannot be
/// parsed, or a validation error when the settings are inconsistent.
pub fn load_from_env() -> InfraResult<ResilienceSettings> {
    let settings = load_from_lookup(|key| std::env::var(key).ok())?;
    tracing::info!("Resilience settings loaded from environment variables");
    Ok(settings)
}

/// Build settings from an arbitrary variable source
///
/// # Errors
/// Same as [`load_from_env`].
pub fn load_from_lookup<F>(lookup: F) -> InfraResult<ResilienceSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings =
        ResilienceSettings { retry: RetryPolicy::from_lookup(&lookup)?, ..Default::default() };

    let breaker = &mut settings.default_breaker;
    if let Some(value) = lookup(ENV_BREAKER_THRESHOLD) {
        breaker.failure_threshold = parse_var(ENV_BREAKER_THRESHOLD, &value)?;
    }
    if let Some(value) = lookup(ENV_BREAKER_OPEN_TIMEOUT) {
        breaker.open_timeout = parse_secs(ENV_BREAKER_OPEN_TIMEOUT, &value)?;
    }
    if let Some(value) = lookup(ENV_BREAKER_RESET_TIMEOUT) {
        breaker.reset_timeout = parse_secs(ENV_BREAKER_RESET_TIMEOUT, &value)?;
    }
    if let Some(value) = lookup(ENV_BREAKER_PROBES) {
        breaker.half_open_max_probes = parse_var(ENV_BREAKER_PROBES, &value)?;
    }

    settings.validate()?;
    Ok(settings)
}

/// Load settings from a file
///
/// If `path` is `None`, probes the standard locations. Supports JSON and
/// TOML (detected by file extension).
///
/// # Errors
/// Returns `InfraError::SettingsNotFound` if no file exists, and a
/// serialization or validation error if its contents are unusable.
pub fn load_from_file(path: Option<PathBuf>) -> InfraResult<ResilienceSettings> {
    let settings_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(InfraError::SettingsNotFound(p.display().to_string()));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            InfraError::SettingsNotFound("no settings file in the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %settings_path.display(), "Loading resilience settings from file");

    let contents = std::fs::read_to_string(&settings_path).map_err(|e| {
        CommonError::persistence_op(format!("read {}", settings_path.display()), e.to_string())
    })?;
    let settings = parse_settings(&contents, &settings_path)?;
    settings.validate()?;
    Ok(settings)
}

/// Probe the standard locations relative to the working directory
///
/// # Returns
/// The first settings file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    probe_in(&cwd)
}

fn probe_in(dir: &Path) -> Option<PathBuf> {
    [
        dir.join("graphguard.toml"),
        dir.join("graphguard.json"),
        dir.join("config").join("graphguard.toml"),
        dir.join("config").join("graphguard.json"),
    ]
    .into_iter()
    .find(|path| path.exists())
}

fn parse_settings(contents: &str, path: &Path) -> InfraResult<ResilienceSettings> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();

    match extension {
        "toml" => Ok(toml::from_str(contents)?),
        "json" => Ok(serde_json::from_str(contents)?),
        other => Err(InfraError::UnsupportedFormat(other.to_string())),
    }
}

fn parse_var<T>(key: &str, value: &str) -> InfraResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| {
        CommonError::config_field(key, format!("Invalid value '{value}' for {key}: {e}")).into()
    })
}

fn parse_secs(key: &str, value: &str) -> InfraResult<Duration> {
    let secs: f64 = parse_var(key, value)?;
    secs_to_duration(secs).ok_or_else(|| {
        CommonError::config_field(key, format!("Invalid duration '{value}' for {key}")).into()
    })
}
