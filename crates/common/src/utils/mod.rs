//! Common utility helpers
//!
//! - **[`serde`]**: Serialization helpers for durations in policy files

pub mod serde;

pub use self::serde::{duration_secs, secs_to_duration};
