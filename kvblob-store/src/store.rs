//! Blob store facade

use crate::scheduler::BatchScheduler;
use kvblob_core::error::Result;
use kvblob_core::{BlobStoreConfig, KeySpace};
use kvblob_storage::{SubstrateStats, TransactionalStore};
use tracing::info;

/// Chunked blob storage over a transactional key-value substrate
///
/// `put` methods live in the writer module, `get` and `list` methods in the
/// reader module. A `BlobStore` is `Send + Sync` and can be shared behind an
/// `Arc`; puts on distinct names may run in parallel.
pub struct BlobStore<S> {
    pub(crate) store: S,
    pub(crate) keys: KeySpace,
    pub(crate) config: BlobStoreConfig,
    pub(crate) scheduler: BatchScheduler,
}

impl<S: TransactionalStore> BlobStore<S> {
    /// Create a blob store, checking `config` against the substrate's limits
    pub fn new(store: S, config: BlobStoreConfig) -> Result<Self> {
        config.validate(&store.limits())?;

        info!(
            namespace = %config.namespace,
            chunk_max_size = config.chunk_max_size,
            tx_byte_budget = config.tx_byte_budget,
            tx_time_budget_ms = config.tx_time_budget_ms,
            "Blob store ready"
        );

        Ok(Self {
            keys: KeySpace::new(config.namespace.clone()),
            scheduler: BatchScheduler::from_config(&config),
            store,
            config,
        })
    }

    /// Create a blob store with the default configuration
    pub fn with_defaults(store: S) -> Result<Self> {
        Self::new(store, BlobStoreConfig::default())
    }

    pub fn config(&self) -> &BlobStoreConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// The underlying substrate
    pub fn substrate(&self) -> &S {
        &self.store
    }

    /// Get substrate statistics
    pub fn stats(&self) -> SubstrateStats {
        self.store.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvblob_core::{KvBlobError, SubstrateLimits};
    use kvblob_storage::MemoryStore;

    #[test]
    fn test_rejects_config_beyond_limits() {
        let store = MemoryStore::with_limits(SubstrateLimits {
            max_value_size: 1_000,
            ..SubstrateLimits::default()
        });
        let result = BlobStore::with_defaults(store);
        assert!(matches!(result, Err(KvBlobError::Configuration(_))));
    }

    #[test]
    fn test_namespace_from_config() {
        let config = BlobStoreConfig::default().with_namespace("photos");
        let blobs = BlobStore::new(MemoryStore::new(), config).unwrap();
        assert_eq!(blobs.keys().namespace(), "photos");
        assert_eq!(blobs.config().namespace, "photos");
    }
}
