//! Configuration management
//!
//! Handles storing and loading CLI configuration.
//! Config directory: ~/.kvblob/ (cross-platform)
//!
//! Config file format (~/.kvblob/config.toml):
//! ```toml
//! [storage]
//! path = "/home/me/.kvblob/data"
//! cache_size_mb = 128
//! compression = true
//!
//! [blobs]
//! namespace = "kvblob"
//! chunk_max_size = 10000
//! tx_byte_budget = 9000000
//! tx_time_budget_ms = 4000
//! max_retries = 10
//! verify_on_read = true
//! ```

use anyhow::{Context, Result};
use kvblob_core::BlobStoreConfig;
use kvblob_storage::StorageConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Structure of ~/.kvblob/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KvBlobConfig {
    /// Database settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Chunking and transaction budgets
    #[serde(default)]
    pub blobs: BlobStoreConfig,
}

/// Database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Database directory (default: ~/.kvblob/data)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// RocksDB block cache size in MB
    #[serde(default = "default_cache_size_mb")]
    pub cache_size_mb: usize,

    /// Compress stored chunks
    #[serde(default = "default_compression")]
    pub compression: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: None,
            cache_size_mb: default_cache_size_mb(),
            compression: default_compression(),
        }
    }
}

fn default_cache_size_mb() -> usize {
    128
}

fn default_compression() -> bool {
    true
}

impl KvBlobConfig {
    /// Database directory: `--db`/`KVBLOB_DB`, then the config file, then ~/.kvblob/data
    pub fn database_path(&self, db_override: Option<PathBuf>) -> Result<PathBuf> {
        match db_override.or_else(|| self.storage.path.clone()) {
            Some(path) => Ok(path),
            None => Ok(config_dir()?.join("data")),
        }
    }

    /// Substrate settings for the given database directory
    pub fn storage_config(&self, path: PathBuf) -> StorageConfig {
        StorageConfig::new(path)
            .with_cache_size(self.storage.cache_size_mb * 1024 * 1024)
            .with_compression(self.storage.compression)
            .with_max_attempts(self.blobs.max_retries)
    }
}

/// Get the config directory path (~/.kvblob/)
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let config_dir = home.join(".kvblob");

    // Create directory if it doesn't exist
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir).context("Failed to create config directory ~/.kvblob/")?;
    }

    Ok(config_dir)
}

/// Get the config file path
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load configuration from file, then apply `KVBLOB_*` environment overrides
/// Falls back to defaults if file doesn't exist
pub fn load_config() -> KvBlobConfig {
    let mut config = match config_file_path() {
        Ok(path) if path.exists() => match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    KvBlobConfig::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                KvBlobConfig::default()
            }
        },
        _ => KvBlobConfig::default(),
    };
    config.blobs = config.blobs.with_env_overrides();
    config
}

/// Save configuration to file
pub fn save_config(config: &KvBlobConfig) -> Result<()> {
    let path = config_file_path()?;
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(&path, content).context("Failed to write config file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KvBlobConfig::default();
        assert_eq!(config.storage.cache_size_mb, 128);
        assert!(config.storage.compression);
        assert_eq!(config.blobs.chunk_max_size, 10_000);
    }

    #[test]
    fn test_config_serialization() {
        let mut config = KvBlobConfig::default();
        config.storage.path = Some(PathBuf::from("/var/lib/kvblob"));
        let toml_str = toml::to_string_pretty(&config).unwrap();

        // Should contain all sections
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[blobs]"));
        assert!(toml_str.contains("chunk_max_size"));

        let parsed: KvBlobConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.storage.path, config.storage.path);
        assert_eq!(parsed.blobs, config.blobs);
    }

    #[test]
    fn test_partial_file() {
        let config: KvBlobConfig = toml::from_str("[blobs]\nchunk_max_size = 4096\n").unwrap();
        assert_eq!(config.blobs.chunk_max_size, 4096);
        assert_eq!(config.blobs.tx_byte_budget, 9_000_000);
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn test_db_override_wins() {
        let mut config = KvBlobConfig::default();
        config.storage.path = Some(PathBuf::from("/from/file"));
        let path = config
            .database_path(Some(PathBuf::from("/from/flag")))
            .unwrap();
        assert_eq!(path, PathBuf::from("/from/flag"));
        assert_eq!(config.database_path(None).unwrap(), PathBuf::from("/from/file"));

        let storage = config.storage_config(path);
        assert_eq!(storage.cache_size, 128 * 1024 * 1024);
        assert_eq!(storage.retry.max_attempts, 10);
    }
}
