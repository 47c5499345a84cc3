//! # Node Runtime Library
//!
//! Configuration loading and lifecycle for the `node-runtime` binary,
//! exposed for testing.

pub mod config;
pub mod runtime;

pub use config::{ConfigError, IdentityConfig, NodeConfig};
pub use runtime::NodeRuntime;
