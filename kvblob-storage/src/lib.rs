//! kvblob Storage Substrates
//!
//! Provides the transactional key-value layer blobs are stored on:
//! - `TransactionalStore` trait for pluggable substrates
//! - `RocksDbStore` for persistent storage
//! - `MemoryStore` for testing

pub mod backend;
pub mod memory;
pub mod rocks;

pub use backend::{
    KeyValue, MutationBudget, ReadSnapshot, RetryPolicy, SubstrateStats, Transaction,
    TransactionalStore,
};
pub use memory::{CommitRecord, MemoryStore};
pub use rocks::RocksDbStore;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path to storage directory
    pub path: std::path::PathBuf,

    /// Enable compression for stored chunks
    pub compression: bool,

    /// Cache size in bytes for RocksDB block cache
    pub cache_size: usize,

    /// Number of background compaction threads
    pub compaction_threads: usize,

    /// Retry schedule for conflicting transactions
    pub retry: RetryPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: std::path::PathBuf::from("./kvblob_data"),
            compression: true,
            cache_size: 128 * 1024 * 1024, // 128 MB
            compaction_threads: 4,
            retry: RetryPolicy::default(),
        }
    }
}

impl StorageConfig {
    /// Create a new storage config with the given path
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set cache size
    pub fn with_cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = bytes;
        self
    }

    /// Enable/disable compression
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Set how many attempts a conflicting transaction gets
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = attempts;
        self
    }
}
