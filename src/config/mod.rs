//! WEFT Configuration System
//!
//! Loads configuration from YAML files with a cascading priority system:
//! 1. `./weft.yaml` (current directory - highest priority)
//! 2. `~/.config/weft/weft.yaml` (user config directory)
//! 3. `/etc/weft/weft.yaml` (system - lowest priority)
//!
//! Values from higher priority files override those from lower priority
//! files.
//!
//! # YAML Structure
//!
//! ```yaml
//! node:
//!   identity:
//!     secret: "wsec1..."
//! transports:
//!   udp:
//!     bind:
//!       - "0.0.0.0:9993"
//! roots:
//!   - wpub: "wpub1..."
//!     bootstrap: "203.0.113.1:9993"
//! networks:
//!   - id: "a1b2c3d4e5f60708"
//!     open: true
//! physical:
//!   - network: "10.0.0.0/8"
//!     trusted_path_id: 77
//!     mtu: 1200
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{Address, Identity, IdentityError, PeerIdentity};
use crate::network::MembershipPolicy;
use crate::topology::{InetCidr, PhysicalPathConfig};

/// Default config filename.
const CONFIG_FILENAME: &str = "weft.yaml";

/// Default UDP bind address.
pub const DEFAULT_BIND: &str = "0.0.0.0:9993";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("invalid bind address '{0}'")]
    InvalidBindAddr(String),

    #[error("invalid root entry '{0}': {1}")]
    InvalidRoot(String, String),

    #[error("invalid network id '{0}'")]
    InvalidNetworkId(String),

    #[error("invalid physical path entry '{0}'")]
    InvalidPhysicalPath(String),
}

/// Identity configuration (`node.identity.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Secret key in wsec (bech32) or hex format. A new keypair is
    /// generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Node configuration (`node.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity configuration (`node.identity.*`).
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// UDP transport configuration (`transports.udp.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UdpConfig {
    /// Socket addresses to bind, one demarcation socket each.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bind: Vec<String>,
}

/// Transport instances (`transports.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportsConfig {
    /// UDP transport configuration.
    #[serde(default)]
    pub udp: UdpConfig,
}

/// One designated root server (`roots[]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootConfig {
    /// The root's public key as a wpub string.
    pub wpub: String,
    /// Optional bootstrap socket address for first contact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<String>,
}

/// One joined network (`networks[]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// 64-bit network ID in hex.
    pub id: String,
    /// Open networks admit any address.
    #[serde(default)]
    pub open: bool,
    /// Member overlay addresses (hex) for closed networks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}

/// One trusted physical path entry (`physical[]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalConfig {
    /// CIDR block this entry applies to.
    pub network: String,
    /// Nonzero marks the block as a trusted path.
    #[serde(default)]
    pub trusted_path_id: u64,
    /// Payload MTU toward this block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<usize>,
}

/// Peer cache configuration (`cache.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the on-disk peer cache.
    #[serde(default)]
    pub enabled: bool,
    /// Cache directory; defaults to the platform data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node configuration (`node.*`).
    #[serde(default)]
    pub node: NodeConfig,

    /// Transport instances (`transports.*`).
    #[serde(default)]
    pub transports: TransportsConfig,

    /// Designated root servers (`roots`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roots: Vec<RootConfig>,

    /// Joined networks (`networks`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkConfig>,

    /// Trusted physical path table (`physical`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub physical: Vec<PhysicalConfig>,

    /// Peer cache (`cache.*`).
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Create a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the standard search paths.
    ///
    /// Returns the merged config and the paths that were actually loaded.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let search_paths = Self::search_paths();
        Self::load_from_paths(&search_paths)
    }

    /// Load configuration from specific paths, later paths overriding
    /// earlier ones.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut config = Config::default();
        let mut loaded_paths = Vec::new();

        for path in paths {
            if path.exists() {
                let file_config = Self::load_file(path)?;
                config.merge(file_config);
                loaded_paths.push(path.clone());
            }
        }

        Ok((config, loaded_paths))
    }

    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the standard search paths in priority order (lowest to highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // System config (lowest priority)
        paths.push(PathBuf::from("/etc/weft").join(CONFIG_FILENAME));

        // User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("weft").join(CONFIG_FILENAME));
        }

        // Current directory (highest priority)
        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Merge another configuration into this one. Values from `other`
    /// override values in `self` when present.
    pub fn merge(&mut self, other: Config) {
        if other.node.identity.secret.is_some() {
            self.node.identity.secret = other.node.identity.secret;
        }
        if !other.transports.udp.bind.is_empty() {
            self.transports.udp.bind = other.transports.udp.bind;
        }
        if !other.roots.is_empty() {
            self.roots = other.roots;
        }
        if !other.networks.is_empty() {
            self.networks = other.networks;
        }
        if !other.physical.is_empty() {
            self.physical = other.physical;
        }
        if other.cache.enabled {
            self.cache.enabled = true;
        }
        if other.cache.dir.is_some() {
            self.cache.dir = other.cache.dir;
        }
    }

    /// Create an Identity from this configuration, generating a fresh one
    /// when no secret is configured.
    pub fn create_identity(&self) -> Result<Identity, ConfigError> {
        match &self.node.identity.secret {
            Some(secret) => Ok(Identity::from_secret_str(secret)?),
            None => Ok(Identity::generate()),
        }
    }

    /// Check if an identity is configured (vs. will be generated).
    pub fn has_identity(&self) -> bool {
        self.node.identity.secret.is_some()
    }

    /// Bind addresses for the UDP demarcation layer.
    pub fn bind_addrs(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        let strings: Vec<&str> = if self.transports.udp.bind.is_empty() {
            vec![DEFAULT_BIND]
        } else {
            self.transports.udp.bind.iter().map(String::as_str).collect()
        };
        strings
            .into_iter()
            .map(|s| {
                s.parse()
                    .map_err(|_| ConfigError::InvalidBindAddr(s.to_string()))
            })
            .collect()
    }

    /// Parsed root entries: identity plus optional bootstrap address.
    pub fn root_entries(&self) -> Result<Vec<(PeerIdentity, Option<SocketAddr>)>, ConfigError> {
        self.roots
            .iter()
            .map(|root| {
                let identity = PeerIdentity::from_wpub(&root.wpub)
                    .map_err(|e| ConfigError::InvalidRoot(root.wpub.clone(), e.to_string()))?;
                let bootstrap = root
                    .bootstrap
                    .as_ref()
                    .map(|s| {
                        s.parse().map_err(|_| {
                            ConfigError::InvalidRoot(root.wpub.clone(), format!("bad bootstrap '{}'", s))
                        })
                    })
                    .transpose()?;
                Ok((identity, bootstrap))
            })
            .collect()
    }

    /// Parsed network entries: ID plus membership policy.
    pub fn network_entries(&self) -> Result<Vec<(u64, MembershipPolicy)>, ConfigError> {
        self.networks
            .iter()
            .map(|network| {
                let id = u64::from_str_radix(network.id.trim_start_matches("0x"), 16)
                    .map_err(|_| ConfigError::InvalidNetworkId(network.id.clone()))?;
                let mut members = HashSet::new();
                for member in &network.members {
                    let raw = u64::from_str_radix(member, 16)
                        .map_err(|_| ConfigError::InvalidNetworkId(member.clone()))?;
                    members.insert(Address::from_u64(raw));
                }
                Ok((
                    id,
                    MembershipPolicy {
                        open: network.open,
                        members,
                    },
                ))
            })
            .collect()
    }

    /// Parsed physical path entries.
    pub fn physical_entries(&self) -> Result<Vec<(InetCidr, PhysicalPathConfig)>, ConfigError> {
        self.physical
            .iter()
            .map(|entry| {
                let cidr: InetCidr = entry
                    .network
                    .parse()
                    .map_err(|_| ConfigError::InvalidPhysicalPath(entry.network.clone()))?;
                let mut config = PhysicalPathConfig {
                    trusted_path_id: entry.trusted_path_id,
                    ..Default::default()
                };
                if let Some(mtu) = entry.mtu {
                    config.mtu = mtu;
                }
                Ok((cidr, config))
            })
            .collect()
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config() {
        let config = Config::new();
        assert!(config.node.identity.secret.is_none());
        assert!(!config.has_identity());
        assert_eq!(config.bind_addrs().unwrap(), vec![DEFAULT_BIND.parse().unwrap()]);
    }

    #[test]
    fn test_parse_yaml_with_secret() {
        let yaml = r#"
node:
  identity:
    secret: "0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.has_identity());
        let identity = config.create_identity().unwrap();
        assert!(identity.address().is_valid());
    }

    #[test]
    fn test_create_identity_generates_new() {
        let config = Config::new();
        let identity = config.create_identity().unwrap();
        assert!(identity.address().is_valid());
    }

    #[test]
    fn test_parse_transports() {
        let yaml = r#"
transports:
  udp:
    bind:
      - "0.0.0.0:4000"
      - "127.0.0.1:4001"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let addrs = config.bind_addrs().unwrap();
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0], "0.0.0.0:4000".parse().unwrap());
    }

    #[test]
    fn test_invalid_bind_addr() {
        let yaml = r#"
transports:
  udp:
    bind: ["not an address"]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.bind_addrs(),
            Err(ConfigError::InvalidBindAddr(_))
        ));
    }

    #[test]
    fn test_parse_roots() {
        let identity = Identity::from_secret_bytes(&[9u8; 32]).unwrap();
        let yaml = format!(
            r#"
roots:
  - wpub: "{}"
    bootstrap: "203.0.113.1:9993"
  - wpub: "{}"
"#,
            identity.wpub(),
            identity.wpub()
        );
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        let roots = config.root_entries().unwrap();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].0.address(), identity.address());
        assert_eq!(roots[0].1, Some("203.0.113.1:9993".parse().unwrap()));
        assert_eq!(roots[1].1, None);
    }

    #[test]
    fn test_invalid_root_rejected() {
        let yaml = r#"
roots:
  - wpub: "wsec1notapublickey"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.root_entries().is_err());
    }

    #[test]
    fn test_parse_networks() {
        let yaml = r#"
networks:
  - id: "a1b2c3d4e5f60708"
    open: true
  - id: "0x10"
    members: ["1122334455"]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let networks = config.network_entries().unwrap();
        assert_eq!(networks.len(), 2);
        assert_eq!(networks[0].0, 0xa1b2c3d4e5f60708);
        assert!(networks[0].1.open);
        assert_eq!(networks[1].0, 0x10);
        assert!(networks[1]
            .1
            .members
            .contains(&Address::from_u64(0x1122334455)));
    }

    #[test]
    fn test_parse_physical() {
        let yaml = r#"
physical:
  - network: "10.0.0.0/8"
    trusted_path_id: 77
    mtu: 1200
  - network: "fd00::/8"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let physical = config.physical_entries().unwrap();
        assert_eq!(physical.len(), 2);
        assert_eq!(physical[0].1.trusted_path_id, 77);
        assert_eq!(physical[0].1.mtu, 1200);
        assert_eq!(physical[1].1.trusted_path_id, 0);
    }

    #[test]
    fn test_merge_configs() {
        let mut base = Config::new();
        base.node.identity.secret = Some("base_secret".to_string());

        let mut override_config = Config::new();
        override_config.node.identity.secret = Some("override_secret".to_string());

        base.merge(override_config);
        assert_eq!(base.node.identity.secret, Some("override_secret".to_string()));
    }

    #[test]
    fn test_merge_preserves_base_when_override_empty() {
        let mut base = Config::new();
        base.node.identity.secret = Some("base_secret".to_string());
        base.transports.udp.bind = vec!["0.0.0.0:4000".to_string()];

        base.merge(Config::new());
        assert_eq!(base.node.identity.secret, Some("base_secret".to_string()));
        assert_eq!(base.transports.udp.bind.len(), 1);
    }

    #[test]
    fn test_load_from_paths_merges() {
        let temp_dir = TempDir::new().unwrap();
        let low_priority = temp_dir.path().join("low.yaml");
        let high_priority = temp_dir.path().join("high.yaml");

        fs::write(
            &low_priority,
            "node:\n  identity:\n    secret: \"low_priority\"\n",
        )
        .unwrap();
        fs::write(
            &high_priority,
            "node:\n  identity:\n    secret: \"high_priority\"\n",
        )
        .unwrap();

        let paths = vec![low_priority, high_priority];
        let (config, loaded) = Config::load_from_paths(&paths).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(config.node.identity.secret, Some("high_priority".to_string()));
    }

    #[test]
    fn test_load_skips_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let existing = temp_dir.path().join("exists.yaml");
        let missing = temp_dir.path().join("missing.yaml");

        fs::write(&existing, "node:\n  identity:\n    secret: \"present\"\n").unwrap();

        let paths = vec![missing, existing.clone()];
        let (config, loaded) = Config::load_from_paths(&paths).unwrap();
        assert_eq!(loaded, vec![existing]);
        assert_eq!(config.node.identity.secret, Some("present".to_string()));
    }

    #[test]
    fn test_search_paths_includes_expected() {
        let paths = Config::search_paths();
        assert!(paths.iter().any(|p| p.ends_with("weft.yaml")));
        assert!(paths
            .iter()
            .any(|p| p.starts_with("/etc/weft") && p.ends_with("weft.yaml")));
    }

    #[test]
    fn test_to_yaml_roundtrip() {
        let mut config = Config::new();
        config.node.identity.secret = Some("test_secret".to_string());
        config.cache.enabled = true;

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("secret"));
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.node.identity.secret, Some("test_secret".to_string()));
        assert!(parsed.cache.enabled);
    }
}
