//! Settings loading and management
//!
//! This module loads the retry and circuit breaker settings of a GraphGuard
//! process from environment variables and files.

pub mod loader;
mod settings;

// Re-export commonly used items
pub use loader::{load, load_from_env, load_from_file, load_from_lookup, probe_config_paths};
pub use settings::ResilienceSettings;
