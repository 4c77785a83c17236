//! Configuration system for meshcas.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MESH_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/meshcas/config.toml
//!   3. ~/.config/meshcas/config.toml

use crate::wire::{DEFAULT_ALPHA, DEFAULT_K, DEFAULT_RPC_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub kademlia: KademliaConfig,
    pub chunking: ChunkingConfig,
    pub download: DownloadConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Seed string hashed into this node's 160-bit id. Empty = random id
    /// generated fresh on each start.
    pub seed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub dht_bind_ip: String,
    pub dht_bind_port: u16,
    pub tcp_bind_ip: String,
    pub tcp_bind_port: u16,
    /// `ip:port` pairs of known DHT contacts to bootstrap from.
    pub bootstrap: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KademliaConfig {
    pub k: usize,
    pub alpha: usize,
    pub rpc_timeout_ms: u64,
    pub bucket_refresh_interval_s: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub parity_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub max_concurrency: usize,
    pub per_connection_timeout_ms: u64,
    pub max_retries_per_chunk: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            network: NetworkConfig::default(),
            storage: StorageConfig::default(),
            kademlia: KademliaConfig::default(),
            chunking: ChunkingConfig::default(),
            download: DownloadConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { seed: String::new() }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            dht_bind_ip: "0.0.0.0".to_string(),
            dht_bind_port: 7470,
            tcp_bind_ip: "0.0.0.0".to_string(),
            tcp_bind_port: 7471,
            bootstrap: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { dir: data_dir().join("cas") }
    }
}

impl Default for KademliaConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            alpha: DEFAULT_ALPHA,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            bucket_refresh_interval_s: 3600,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 65536,
            parity_count: 1,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            per_connection_timeout_ms: 30_000,
            max_retries_per_chunk: 3,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 7420 }
    }
}

// ── Path helpers ────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("meshcas")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("meshcas")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ──────────────────────────────────────────────────────────────────

impl MeshConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MeshConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MESH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeshConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply MESH_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MESH_NETWORK__DHT_BIND_PORT") {
            if let Ok(p) = v.parse() {
                self.network.dht_bind_port = p;
            }
        }
        if let Ok(v) = std::env::var("MESH_NETWORK__TCP_BIND_PORT") {
            if let Ok(p) = v.parse() {
                self.network.tcp_bind_port = p;
            }
        }
        if let Ok(v) = std::env::var("MESH_NETWORK__BOOTSTRAP") {
            self.network.bootstrap = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("MESH_STORAGE__DIR") {
            self.storage.dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MESH_IDENTITY__SEED") {
            self.identity.seed = v;
        }
        if let Ok(v) = std::env::var("MESH_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_kademlia_params() {
        let config = MeshConfig::default();
        assert_eq!(config.kademlia.k, 20);
        assert_eq!(config.kademlia.alpha, 3);
        assert_eq!(config.chunking.chunk_size, 65536);
        assert_eq!(config.chunking.parity_count, 1);
    }

    #[test]
    fn apply_env_overrides_parses_bootstrap_list() {
        let mut config = MeshConfig::default();
        assert!(config.network.bootstrap.is_empty());
        unsafe {
            std::env::set_var("MESH_NETWORK__BOOTSTRAP", "10.0.0.1:7470, 10.0.0.2:7470");
        }
        config.apply_env_overrides();
        assert_eq!(
            config.network.bootstrap,
            vec!["10.0.0.1:7470".to_string(), "10.0.0.2:7470".to_string()]
        );
        unsafe {
            std::env::remove_var("MESH_NETWORK__BOOTSTRAP");
        }
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir().join(format!("meshcas-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("MESH_CONFIG", config_path.to_str().unwrap());
        }

        let path = MeshConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = MeshConfig::load().expect("load should succeed");
        assert_eq!(config.kademlia.k, 20);

        unsafe {
            std::env::remove_var("MESH_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
