//! Configuration loading for canopy-server.
//!
//! Configuration is loaded from a TOML file (default: `canopy.toml`) once at
//! startup and never changes afterwards.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for canopy-server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Delta engine configuration.
    #[serde(default)]
    pub delta: DeltaConfig,
    /// Exposed directory trees, keyed by mount name.
    #[serde(default)]
    pub mounts: BTreeMap<String, MountConfig>,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener (default: 0.0.0.0:8675).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Seconds between forced flushes of a manifest stream (default: 10).
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

/// Delta engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeltaConfig {
    /// Signature block size in bytes (default: 2048).
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

/// One exposed directory tree.
#[derive(Debug, Clone, Deserialize)]
pub struct MountConfig {
    /// Root directory of the tree.
    pub path: PathBuf,
    /// Allow PUT, DELETE and patch requests (default: false).
    #[serde(default)]
    pub writable: bool,
    /// Compute content hashes when listing (default: false).
    #[serde(default)]
    pub checksum: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8675".to_string()
}

fn default_flush_interval() -> u64 {
    10
}

fn default_block_size() -> usize {
    canopy_core::DEFAULT_BLOCK_SIZE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            flush_interval_secs: default_flush_interval(),
        }
    }
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
        }
    }
}

impl ServerConfig {
    /// Flush interval as a duration.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// A validated mount, root resolved to an absolute canonical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Mount name, the first URL path segment.
    pub name: String,
    /// Canonical root directory.
    pub root: PathBuf,
    /// Mutating requests allowed.
    pub writable: bool,
    /// Hash file content when listing.
    pub checksum: bool,
}

/// Immutable name -> mount map shared by every request.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    mounts: BTreeMap<String, Mount>,
}

impl MountTable {
    /// Validate mount definitions and canonicalize their roots.
    ///
    /// # Errors
    ///
    /// Fails on an empty or `/`-containing mount name, or a root that does
    /// not exist or is not a directory.
    pub fn from_config(mounts: &BTreeMap<String, MountConfig>) -> Result<Self, ConfigError> {
        let mut table = BTreeMap::new();
        for (name, conf) in mounts {
            if name.is_empty() || name.contains('/') {
                return Err(ConfigError::InvalidMount {
                    name: name.clone(),
                    reason: "mount names must be a single non-empty path segment".into(),
                });
            }
            let root = conf
                .path
                .canonicalize()
                .map_err(|e| ConfigError::MountRoot {
                    name: name.clone(),
                    path: conf.path.clone(),
                    source: e,
                })?;
            if !root.is_dir() {
                return Err(ConfigError::InvalidMount {
                    name: name.clone(),
                    reason: format!("{} is not a directory", root.display()),
                });
            }
            table.insert(
                name.clone(),
                Mount {
                    name: name.clone(),
                    root,
                    writable: conf.writable,
                    checksum: conf.checksum,
                },
            );
        }
        Ok(Self { mounts: table })
    }

    /// Look up a mount by name.
    pub fn get(&self, name: &str) -> Option<&Mount> {
        self.mounts.get(name)
    }

    /// Mount names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.mounts.keys().cloned().collect()
    }

    /// Number of mounts.
    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    /// Whether no mounts are configured.
    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A mount root could not be resolved.
    #[error("mount {name}: cannot resolve {path}: {source}")]
    MountRoot {
        /// Mount name.
        name: String,
        /// Configured root.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// A mount definition is unusable.
    #[error("mount {name}: {reason}")]
    InvalidMount {
        /// Mount name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },
    /// The delta engine rejected its settings.
    #[error("delta configuration: {0}")]
    Delta(#[from] canopy_core::DeltaError),
}
