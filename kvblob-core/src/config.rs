//! Substrate limits and blob store configuration

use crate::error::{KvBlobError, Result};
use crate::{
    DEFAULT_CHUNK_SIZE, DEFAULT_NAMESPACE, DEFAULT_TX_BYTE_BUDGET, DEFAULT_TX_TIME_BUDGET_MS,
    MAX_TX_BYTES, MAX_TX_DURATION_MS, MAX_VALUE_SIZE,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard limits enforced by a transactional key-value substrate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubstrateLimits {
    /// Largest value accepted under one key
    pub max_value_size: usize,

    /// Largest number of bytes (keys plus values) one transaction may mutate
    pub max_tx_bytes: u64,

    /// Longest a transaction may stay open before commit
    pub max_tx_duration: Duration,
}

impl Default for SubstrateLimits {
    fn default() -> Self {
        Self {
            max_value_size: MAX_VALUE_SIZE,
            max_tx_bytes: MAX_TX_BYTES,
            max_tx_duration: Duration::from_millis(MAX_TX_DURATION_MS),
        }
    }
}

/// Blob store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobStoreConfig {
    /// Key namespace shared by metadata and chunk keys
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Chunk ceiling in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_max_size: usize,

    /// Chunk bytes one transaction may carry
    #[serde(default = "default_tx_byte_budget")]
    pub tx_byte_budget: u64,

    /// Wall-clock time one transaction may spend packing chunks
    #[serde(default = "default_tx_time_budget_ms")]
    pub tx_time_budget_ms: u64,

    /// Attempts per transaction before a conflict becomes a failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Recompute and compare the content hash on every read
    #[serde(default = "default_true")]
    pub verify_on_read: bool,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            chunk_max_size: default_chunk_size(),
            tx_byte_budget: default_tx_byte_budget(),
            tx_time_budget_ms: default_tx_time_budget_ms(),
            max_retries: default_max_retries(),
            verify_on_read: true,
        }
    }
}

impl BlobStoreConfig {
    /// Set the key namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the chunk ceiling
    pub fn with_chunk_max_size(mut self, bytes: usize) -> Self {
        self.chunk_max_size = bytes;
        self
    }

    /// Set the per-transaction byte budget
    pub fn with_tx_byte_budget(mut self, bytes: u64) -> Self {
        self.tx_byte_budget = bytes;
        self
    }

    /// Set the per-transaction time budget
    pub fn with_tx_time_budget(mut self, budget: Duration) -> Self {
        self.tx_time_budget_ms = budget.as_millis() as u64;
        self
    }

    pub fn tx_time_budget(&self) -> Duration {
        Duration::from_millis(self.tx_time_budget_ms)
    }

    /// Apply `KVBLOB_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(namespace) = std::env::var("KVBLOB_NAMESPACE") {
            self.namespace = namespace;
        }
        if let Some(size) = env_parse("KVBLOB_CHUNK_SIZE") {
            self.chunk_max_size = size;
        }
        if let Some(bytes) = env_parse("KVBLOB_TX_BYTES") {
            self.tx_byte_budget = bytes;
        }
        if let Some(ms) = env_parse("KVBLOB_TX_TIME_MS") {
            self.tx_time_budget_ms = ms;
        }
        if let Some(retries) = env_parse("KVBLOB_MAX_RETRIES") {
            self.max_retries = retries;
        }
        self
    }

    /// Check the configuration against the limits of the substrate it will run on
    pub fn validate(&self, limits: &SubstrateLimits) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(KvBlobError::Configuration(
                "namespace must not be empty".to_string(),
            ));
        }
        if self.chunk_max_size == 0 || self.chunk_max_size > limits.max_value_size {
            return Err(KvBlobError::Configuration(format!(
                "chunk_max_size must be between 1 and {} bytes, got {}",
                limits.max_value_size, self.chunk_max_size
            )));
        }
        if self.chunk_max_size > u32::MAX as usize {
            return Err(KvBlobError::Configuration(
                "chunk_max_size does not fit in 32 bits".to_string(),
            ));
        }
        if self.tx_byte_budget <= self.chunk_max_size as u64
            || self.tx_byte_budget > limits.max_tx_bytes
        {
            return Err(KvBlobError::Configuration(format!(
                "tx_byte_budget must be above chunk_max_size ({}) and at most {} bytes, got {}",
                self.chunk_max_size, limits.max_tx_bytes, self.tx_byte_budget
            )));
        }
        if self.tx_time_budget_ms == 0 || self.tx_time_budget() > limits.max_tx_duration {
            return Err(KvBlobError::Configuration(format!(
                "tx_time_budget_ms must be between 1 and {} ms, got {}",
                limits.max_tx_duration.as_millis(),
                self.tx_time_budget_ms
            )));
        }
        if self.max_retries == 0 {
            return Err(KvBlobError::Configuration(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_tx_byte_budget() -> u64 {
    DEFAULT_TX_BYTE_BUDGET
}

fn default_tx_time_budget_ms() -> u64 {
    DEFAULT_TX_TIME_BUDGET_MS
}

fn default_max_retries() -> u32 {
    10
}

fn default_true() -> bool {
    true
}
