use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::config::P2pConfig;
use crate::ports::ConfigProvider;

// ============================================================================
// StaticConfigProvider - In-memory config for tests and embedding
// ============================================================================

/// Hands out a fixed [`P2pConfig`].
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    config: P2pConfig,
}

impl StaticConfigProvider {
    #[must_use]
    pub fn new(config: P2pConfig) -> Self {
        Self { config }
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn p2p_config(&self) -> P2pConfig {
        self.config.clone()
    }
}

// ============================================================================
// TomlConfigProvider - Production config loading
// ============================================================================

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    p2p: P2pConfig,
}

/// Loads the `[p2p]` table of a TOML file.
///
/// # Config File Format
///
/// ```toml
/// [p2p]
/// listen_addr = "0.0.0.0:30303"
/// seeds = ["10.0.0.1:30303"]
/// heartbeat_interval_ms = 10000
///
/// [p2p.threads]
/// work = 8
///
/// [p2p.node]
/// name = "validator-1"
/// kind = "full_node"
/// ```
///
/// Missing keys keep their defaults.
#[derive(Debug, Clone)]
pub struct TomlConfigProvider {
    config: P2pConfig,
}

impl TomlConfigProvider {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        if file.p2p.min_protocol_version > file.p2p.protocol_version {
            return Err(ConfigError::Invalid(format!(
                "min_protocol_version {} exceeds protocol_version {}",
                file.p2p.min_protocol_version, file.p2p.protocol_version
            )));
        }
        if file.p2p.work_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "work_queue_capacity must be positive".to_string(),
            ));
        }

        Ok(Self { config: file.p2p })
    }

    pub fn config(&self) -> &P2pConfig {
        &self.config
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn p2p_config(&self) -> P2pConfig {
        self.config.clone()
    }
}

/// Errors that can occur during config loading.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config {path}: {error}")]
    Io { path: String, error: String },

    /// TOML parsing error.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// Parsed but inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}
