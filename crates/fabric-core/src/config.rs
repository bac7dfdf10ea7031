//! fabric.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{EndpointGroup, Network, Vnf};

/// Default root under which all configuration records are stored.
pub const DEFAULT_CONFIG_ROOT: &str = "/fabric/state";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FabricConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub objects: ObjectSeed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file; the store is kept in memory when unset.
    pub path: Option<PathBuf>,
    #[serde(default = "default_config_root")]
    pub config_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// When false, VNF policy intents are accepted and ignored.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Static object-model contents loaded at start-up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectSeed {
    #[serde(default)]
    pub endpoint_groups: Vec<EndpointGroup>,
    #[serde(default)]
    pub vnfs: Vec<Vnf>,
    #[serde(default)]
    pub networks: Vec<Network>,
}

fn default_config_root() -> String {
    DEFAULT_CONFIG_ROOT.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            config_root: default_config_root(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl FabricConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: FabricConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
