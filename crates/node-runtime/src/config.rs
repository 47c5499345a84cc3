//! # Node Configuration
//!
//! TOML file plus environment overrides.
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `QC_CONFIG` | Path of the TOML file (read by the binary) |
//! | `QC_P2P_PORT` | Port of `p2p.listen_addr` |
//! | `QC_BOOTSTRAP` | Comma-separated seed addresses, replacing `p2p.seeds` |
//! | `QC_NODE_KEY` | Hex secp256k1 identity key |
//! | `QC_NODE_NAME` | Advertised node name |

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use qc_01_p2p_network::{ConfigProvider, P2pConfig, TomlConfigProvider};
use serde::{Deserialize, Serialize};
use shared_crypto::Secp256k1KeyPair;
use thiserror::Error;

/// Complete node configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub p2p: P2pConfig,
    pub identity: IdentityConfig,
}

/// Node identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Hex secp256k1 secret key; a fresh key is generated when absent
    pub node_key: Option<String>,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    P2p(#[from] qc_01_p2p_network::ConfigError),

    #[error("invalid {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid node key")]
    InvalidNodeKey,
}

/// Tables of the config file outside `[p2p]`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodeTables {
    identity: IdentityConfig,
}

impl NodeConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse a TOML document. The `[p2p]` table goes through
    /// [`TomlConfigProvider`] and its validation.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let p2p = TomlConfigProvider::parse(content)?;
        let tables: NodeTables = toml::from_str(content)?;
        Ok(Self::from_provider(&p2p, tables.identity))
    }

    /// Network settings from any [`ConfigProvider`].
    pub fn from_provider(provider: &dyn ConfigProvider, identity: IdentityConfig) -> Self {
        Self {
            p2p: provider.p2p_config(),
            identity,
        }
    }

    /// Apply `QC_*` overrides read through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = var("QC_P2P_PORT") {
            let port = value.trim().parse::<u16>().map_err(|_| ConfigError::InvalidEnv {
                var: "QC_P2P_PORT",
                value: value.clone(),
            })?;
            self.p2p.listen_addr.set_port(port);
        }

        if let Some(value) = var("QC_BOOTSTRAP") {
            self.p2p.seeds = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<SocketAddr>().map_err(|_| ConfigError::InvalidEnv {
                        var: "QC_BOOTSTRAP",
                        value: s.to_string(),
                    })
                })
                .collect::<Result<_, _>>()?;
        }

        if let Some(value) = var("QC_NODE_KEY") {
            self.identity.node_key = Some(value);
        }

        if let Some(value) = var("QC_NODE_NAME") {
            self.p2p.node.name = value;
        }

        Ok(())
    }

    /// Identity key from config, or a fresh one.
    ///
    /// The flag is true when the key was generated.
    pub fn identity(&self) -> Result<(Secp256k1KeyPair, bool), ConfigError> {
        match &self.identity.node_key {
            Some(hex_key) => Secp256k1KeyPair::from_hex(hex_key)
                .map(|key| (key, false))
                .map_err(|_| ConfigError::InvalidNodeKey),
            None => Ok((Secp256k1KeyPair::generate(), true)),
        }
    }
}
