//! Daemon configuration.
//!
//! One TOML file carries everything a deployment provisions: the local node
//! identity, the mobile node directory, the anchor directory and the
//! role-specific sections. The same file can be shared between every MAG
//! and LMA of a domain; each node reads the sections it needs.
//!
//! ```toml
//! node_id = "mag1"
//! address = "2001:db8:ffff::2"
//!
//! [[nodes]]
//! id = "mn1@example.com"
//! ll_addr = "aa:bb:cc:00:00:01"
//! prefixes = ["2001:db8:1::/64"]
//! lma = "lma1"
//!
//! [[anchors]]
//! id = "lma1"
//! address = "[2001:db8:ffff::1]:5436"
//!
//! [mag]
//! lifetime_secs = 3600
//!
//! [[mag.links]]
//! index = 2
//! mtu = 1500
//! mac = "02:00:00:00:00:02"
//! ```

use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use pmip::mac::MacAddress;
use pmip::node_db::{AnchorEntry, MobileNodePolicy, NodeDb};
use pmip::{AccessLink, LmaConfig, MagConfig, DEFAULT_MH_PORT};

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("node {node_id} references anchor {lma} which is not provisioned")]
    DanglingAnchor { node_id: String, lma: String },
}

/// The complete daemon configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Identifier of this node.
    pub node_id: String,
    /// The node's own IPv6 address: tunnel endpoint and mobility bind
    /// address.
    pub address: Ipv6Addr,
    /// UDP port of the mobility endpoint.
    #[serde(default = "default_port")]
    pub port: u16,
    /// The provisioned mobile nodes.
    #[serde(default)]
    pub nodes: Vec<MobileNodePolicy>,
    /// The provisioned anchors.
    #[serde(default)]
    pub anchors: Vec<AnchorEntry>,
    /// Gateway-specific settings.
    #[serde(default)]
    pub mag: MagSection,
    /// Anchor-specific settings.
    #[serde(default)]
    pub lma: LmaSection,
}

fn default_port() -> u16 {
    DEFAULT_MH_PORT
}

/// The `[mag]` section.
#[derive(Debug, Deserialize)]
pub struct MagSection {
    /// The access links this gateway serves.
    #[serde(default)]
    pub links: Vec<AccessLink>,
    /// Binding lifetime requested in registrations, in seconds.
    #[serde(default = "default_lifetime_secs")]
    pub lifetime_secs: u64,
    /// Terminals the dummy driver cycles through, for demo deployments
    /// without a real attachment detector.
    #[serde(default)]
    pub dummy_clients: Vec<DummyClient>,
    /// Period of the dummy driver, in seconds.
    #[serde(default = "default_dummy_period_secs")]
    pub dummy_period_secs: u64,
}

impl Default for MagSection {
    fn default() -> Self {
        MagSection {
            links: Vec::new(),
            lifetime_secs: default_lifetime_secs(),
            dummy_clients: Vec::new(),
            dummy_period_secs: default_dummy_period_secs(),
        }
    }
}

/// The `[lma]` section.
#[derive(Debug, Deserialize)]
pub struct LmaSection {
    /// Upper bound on granted binding lifetimes, in seconds.
    #[serde(default = "default_lifetime_secs")]
    pub max_lifetime_secs: u64,
}

impl Default for LmaSection {
    fn default() -> Self {
        LmaSection {
            max_lifetime_secs: default_lifetime_secs(),
        }
    }
}

/// One terminal of the dummy driver.
#[derive(Debug, Clone, Deserialize)]
pub struct DummyClient {
    pub mac: MacAddress,
    pub link: u32,
}

fn default_lifetime_secs() -> u64 {
    3600
}

fn default_dummy_period_secs() -> u64 {
    10
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&raw).map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })?;

        for node in &config.nodes {
            if !config.anchors.iter().any(|a| a.id == node.lma) {
                return Err(ConfigError::DanglingAnchor {
                    node_id: node.id.to_string(),
                    lma: node.lma.clone(),
                });
            }
        }

        Ok(config)
    }

    /// Build the node directory from the provisioned entries.
    pub fn node_db(&self) -> NodeDb {
        NodeDb::new(self.nodes.iter().cloned(), self.anchors.iter().cloned())
    }

    /// The gateway configuration this file describes.
    pub fn mag_config(&self) -> MagConfig {
        let mut config = MagConfig::new(
            self.node_id.clone(),
            self.address,
            self.mag.links.clone(),
        );
        config.lifetime = Duration::from_secs(self.mag.lifetime_secs);
        config
    }

    /// The anchor configuration this file describes.
    pub fn lma_config(&self) -> LmaConfig {
        let mut config = LmaConfig::new(self.node_id.clone(), self.address);
        config.max_lifetime = Duration::from_secs(self.lma.max_lifetime_secs);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    const EXAMPLE: &str = r#"
node_id = "mag1"
address = "2001:db8:ffff::2"

[[nodes]]
id = "mn1@example.com"
ll_addr = "aa:bb:cc:00:00:01"
prefixes = ["2001:db8:1::/64"]
lma = "lma1"

[[anchors]]
id = "lma1"
address = "[2001:db8:ffff::1]:5436"

[mag]
lifetime_secs = 1800

[[mag.links]]
index = 2
mtu = 1500
mac = "02:00:00:00:00:02"
"#;

    #[test]
    fn example_parses() {
        let config: Config = toml::from_str(EXAMPLE).unwrap();
        assert_eq!(config.node_id, "mag1");
        assert_eq!(config.port, pmip::DEFAULT_MH_PORT);
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.mag.links.len(), 1);
        assert_eq!(config.mag.lifetime_secs, 1800);

        let db = config.node_db();
        assert_eq!(db.len(), 1);
        assert!(db.anchor("lma1").is_some());
    }

    #[test]
    fn dangling_anchor_is_caught() {
        let broken = EXAMPLE.replace("id = \"lma1\"", "id = \"lma9\"");
        let config: Config = toml::from_str(&broken).unwrap();
        assert!(config
            .nodes
            .iter()
            .any(|n| !config.anchors.iter().any(|a| a.id == n.lma)));
    }
}
