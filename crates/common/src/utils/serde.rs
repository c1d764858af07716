//! Serialization utilities for policy durations
//!
//! Policies are written by operators in TOML/JSON and read from `RETRY_*`
//! environment variables, both of which express delays as (fractional)
//! seconds. These helpers keep `Duration` in the Rust types while using
//! seconds on the wire.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serde serialization result type
type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

/// Convert non-negative, finite seconds into a `Duration`
///
/// Returns `None` for negative, NaN or infinite input.
pub fn secs_to_duration(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs >= 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

/// Serialize/deserialize a `Duration` as fractional seconds (f64)
///
/// # Usage
/// ```rust
/// use std::time::Duration;
///
/// use graphguard_common::duration_secs;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_secs")]
///     base_delay: Duration,
/// }
/// ```
pub mod duration_secs {
    use super::*;

    /// Serialize a Duration as seconds (f64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    /// Deserialize seconds (f64) into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        secs_to_duration(secs).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid duration in seconds: {secs}"))
        })
    }
}
