//! # Adapters
//!
//! Concrete implementations of the [`crate::ports`] traits: TOML
//! configuration loading and in-memory collaborators.

pub mod config;
pub mod memory;

pub use config::{ConfigError, StaticConfigProvider, TomlConfigProvider};
pub use memory::{
    AllowAllVerifier, AllowListVerifier, FixedHeightSource, RecordingReleaser, StaticStakeOracle,
};
