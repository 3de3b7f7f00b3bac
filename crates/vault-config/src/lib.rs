//! Layered configuration for the vault daemon.
//!
//! Loading order (lowest to highest precedence):
//! 1. Built-in defaults
//! 2. `~/.config/vaultd/config.toml` (XDG user config)
//! 3. `VAULTD_*` environment variables
//! 4. An explicit config file path, when one is given
//!
//! An explicit path is the most specific thing a caller can name, so it wins
//! over everything else: this daemon takes its path from `--config`/
//! `VAULTD_CONFIG` rather than from flags merged directly into the builder,
//! so the explicit-path source plays the role a CLI-argument override would.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Top-level vault daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VaultConfig {
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub development: DevelopmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory holding every persona's `KeyedDb` state.
    pub data_dir: PathBuf,
    pub bind_address: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from(".vaultd/data"), bind_address: "0.0.0.0:5483".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Close group size; quorum is derived from this via `majority_quorum`.
    pub group_size: usize,
    /// `kMinNetworkHealth`: the vault refuses work below this health score.
    pub min_network_health: i32,
    /// Bootstrap peer list, e.g. loaded from `bootstrap.toml` by the caller
    /// and folded in, or supplied directly in `config.toml`/env.
    pub bootstrap_peers: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { group_size: 7, min_network_health: 80, bootstrap_peers: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Key-chain file (domain out of scope; only its location is ours).
    pub keys_path: PathBuf,
    /// Root directory for the Pmid Node's on-disk chunk store.
    pub chunk_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { keys_path: PathBuf::from(".vaultd/keys.chain"), chunk_path: PathBuf::from(".vaultd/chunks") }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: vault_cache::DEFAULT_CAPACITY }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DevelopmentConfig {
    /// Use `MemoryKeyedDb`/`MemoryChunkStore` instead of the durable,
    /// filesystem-backed implementations.
    pub in_memory: bool,
}

impl VaultConfig {
    /// Loads configuration from the default XDG + env sources.
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Loads configuration, additionally merging an explicit file at
    /// `path` as the highest-precedence source.
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        ConfigLoader::new().with_explicit_path(path).load()
    }

    /// A configuration suitable for tests and the bootstrap tool's
    /// `store-verify`/`test` operations: in-memory storage, a single-node
    /// group, no bootstrap peers.
    pub fn development() -> Self {
        Self {
            network: NetworkConfig { group_size: 1, min_network_health: 0, bootstrap_peers: Vec::new() },
            development: DevelopmentConfig { in_memory: true },
            ..Default::default()
        }
    }

    /// Resolves every relative path against `base_dir`.
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<std::path::Path>) {
        let base = base_dir.as_ref();
        if self.node.data_dir.is_relative() {
            self.node.data_dir = base.join(&self.node.data_dir);
        }
        if self.storage.keys_path.is_relative() {
            self.storage.keys_path = base.join(&self.storage.keys_path);
        }
        if self.storage.chunk_path.is_relative() {
            self.storage.chunk_path = base.join(&self.storage.chunk_path);
        }
    }
}
