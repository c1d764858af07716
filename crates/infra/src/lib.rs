//! # GraphGuard Infrastructure
//!
//! Outer glue around `graphguard-common`.
//!
//! This crate contains:
//! - Settings loading (`.env`, environment variables, TOML/JSON files)
//! - Tracing subscriber initialisation
//! - A guarded wrapper for the knowledge-graph client, with health probes
//!
//! ## Architecture
//! - Depends only on `graphguard-common`
//! - Contains all "impure" code (file I/O, global subscriber, backends)

pub mod config;
pub mod errors;
pub mod graph;
pub mod observability;

// Re-export commonly used items
pub use config::{load, load_from_env, load_from_file, probe_config_paths, ResilienceSettings};
pub use errors::{InfraError, InfraResult};
pub use graph::{
    ComponentHealth, EntityNode, GraphBackend, GuardedGraph, HealthReport, HealthState,
};
pub use observability::{init_tracing, init_tracing_from_env, LogFormat};
