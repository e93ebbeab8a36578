//! RocksDB substrate
//!
//! Persistent transactional storage on a RocksDB `OptimisticTransactionDB`.
//! Conflicts are detected at commit time and reported by RocksDB as `Busy`
//! or `TryAgain`; those attempts are retried. Snapshot reads go through a
//! RocksDB snapshot, so a scan never sees a half-applied transaction.

use crate::backend::{
    KeyValue, MutationBudget, ReadSnapshot, RetryPolicy, SubstrateStats, Transaction,
    TransactionalStore,
};
use crate::StorageConfig;
use bytes::Bytes;
use kvblob_core::error::{KvBlobError, Result};
use kvblob_core::SubstrateLimits;
use rocksdb::{
    BlockBasedOptions, Cache, DBCompressionType, Direction, ErrorKind, IteratorMode,
    MultiThreaded, OptimisticTransactionDB, Options,
};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

type Db = OptimisticTransactionDB<MultiThreaded>;

/// RocksDB-based transactional store
pub struct RocksDbStore {
    /// RocksDB instance
    db: Db,

    /// Configuration
    config: StorageConfig,

    limits: SubstrateLimits,

    /// Operation counters
    commits: AtomicU64,
    conflicts: AtomicU64,
    aborts: AtomicU64,
    snapshot_reads: AtomicU64,
}

impl RocksDbStore {
    /// Open or create a RocksDB store at the configured path
    pub fn open(config: StorageConfig) -> Result<Self> {
        info!(path = ?config.path, "Opening RocksDB store");

        let mut opts = Options::default();
        opts.create_if_missing(true);

        opts.set_max_open_files(1000);
        opts.set_keep_log_file_num(10);
        opts.set_max_total_wal_size(256 * 1024 * 1024); // 256 MB WAL
        opts.increase_parallelism(config.compaction_threads as i32);
        opts.set_max_background_jobs(config.compaction_threads as i32);

        if config.compression {
            opts.set_compression_type(DBCompressionType::Lz4);
        }

        // Chunk values are at most 10 KB, so small blocks keep point reads cheap
        let cache = Cache::new_lru_cache(config.cache_size);
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_cache(&cache);
        block_opts.set_block_size(16 * 1024);
        block_opts.set_cache_index_and_filter_blocks(true);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_write_buffer_size(64 * 1024 * 1024); // 64 MB write buffer

        std::fs::create_dir_all(&config.path).map_err(|e| {
            KvBlobError::Storage(format!("Failed to create storage directory: {}", e))
        })?;

        let db = Db::open(&opts, &config.path)
            .map_err(|e| KvBlobError::Storage(format!("Failed to open RocksDB: {}", e)))?;

        info!("RocksDB store opened successfully");

        Ok(Self {
            db,
            config,
            limits: SubstrateLimits::default(),
            commits: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
            snapshot_reads: AtomicU64::new(0),
        })
    }

    /// Open with default configuration
    pub fn open_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(StorageConfig::new(path.as_ref()))
    }

    /// Override the enforced limits
    pub fn with_limits(mut self, limits: SubstrateLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.config.retry
    }
}

impl TransactionalStore for RocksDbStore {
    fn limits(&self) -> SubstrateLimits {
        self.limits
    }

    fn run<T, F>(&self, mut body: F) -> Result<T>
    where
        F: FnMut(&mut dyn Transaction) -> Result<T>,
    {
        self.retry_policy().run(
            |attempt| {
                let mut tx = RocksTransaction {
                    txn: self.db.transaction(),
                    budget: MutationBudget::new(self.limits),
                };

                let output = match body(&mut tx).and_then(|output| {
                    tx.budget.check_commit()?;
                    Ok(output)
                }) {
                    Ok(output) => output,
                    Err(err) => {
                        // Best effort: dropping the transaction discards it anyway
                        let _ = tx.txn.rollback();
                        if !err.is_retryable() {
                            self.aborts.fetch_add(1, Ordering::Relaxed);
                        }
                        return Err(err);
                    }
                };

                let mutated_bytes = tx.budget.mutated_bytes();
                tx.txn.commit().map_err(|e| match e.kind() {
                    ErrorKind::Busy | ErrorKind::TryAgain | ErrorKind::TimedOut => {
                        KvBlobError::Conflict(e.to_string())
                    }
                    _ => {
                        self.aborts.fetch_add(1, Ordering::Relaxed);
                        KvBlobError::Storage(format!("Commit failed: {}", e))
                    }
                })?;

                debug!(attempt, mutated_bytes, "Committed transaction");
                self.commits.fetch_add(1, Ordering::Relaxed);
                Ok(output)
            },
            || {
                self.conflicts.fetch_add(1, Ordering::Relaxed);
            },
        )
    }

    fn read_snapshot<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&dyn ReadSnapshot) -> Result<T>,
    {
        self.snapshot_reads.fetch_add(1, Ordering::Relaxed);
        let snapshot = RocksSnapshot {
            snapshot: self.db.snapshot(),
        };
        body(&snapshot)
    }

    fn stats(&self) -> SubstrateStats {
        SubstrateStats {
            commits: self.commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            snapshot_reads: self.snapshot_reads.load(Ordering::Relaxed),
        }
    }
}

struct RocksTransaction<'db> {
    txn: rocksdb::Transaction<'db, Db>,
    budget: MutationBudget,
}

impl RocksTransaction<'_> {
    /// Keys under `prefix`, up to `limit`; values are never copied out
    fn prefix_keys(&self, prefix: &[u8], limit: usize) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        let mut iter = self.txn.raw_iterator();
        iter.seek(prefix);
        while keys.len() < limit {
            match iter.key() {
                Some(key) if key.starts_with(prefix) => keys.push(key.to_vec()),
                _ => break,
            }
            iter.next();
        }
        iter.status().map_err(storage_err)?;
        Ok(keys)
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<KeyValue>> {
        let mut out = Vec::new();
        for item in self
            .txn
            .iterator(IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(storage_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.into_vec(), Bytes::from(value.into_vec())));
        }
        Ok(out)
    }
}

impl Transaction for RocksTransaction<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.txn.get(key).map_err(storage_err)?.map(Bytes::from))
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.budget.charge_set(key, value)?;
        self.txn.put(key, value).map_err(storage_err)
    }

    fn clear(&mut self, key: &[u8]) -> Result<()> {
        self.budget.charge_clear(key);
        self.txn.delete(key).map_err(storage_err)
    }

    fn clear_prefix(&mut self, prefix: &[u8]) -> Result<()> {
        for key in self.prefix_keys(prefix, usize::MAX)? {
            self.budget.charge_clear(&key);
            self.txn.delete(&key).map_err(storage_err)?;
        }
        Ok(())
    }

    fn scan_keys(&mut self, prefix: &[u8], limit: usize) -> Result<Vec<Vec<u8>>> {
        self.prefix_keys(prefix, limit)
    }

    fn scan_prefix(&mut self, prefix: &[u8]) -> Result<Vec<KeyValue>> {
        self.scan(prefix)
    }
}

struct RocksSnapshot<'db> {
    snapshot: rocksdb::SnapshotWithThreadMode<'db, Db>,
}

impl ReadSnapshot for RocksSnapshot<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.snapshot.get(key).map_err(storage_err)?.map(Bytes::from))
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        for item in self
            .snapshot
            .iterator(IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(storage_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            visit(&key, &value)?;
        }
        Ok(())
    }
}

fn storage_err(e: rocksdb::Error) -> KvBlobError {
    KvBlobError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, RocksDbStore) {
        let dir = TempDir::new().unwrap();
        let store = RocksDbStore::open_default(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_set_get() {
        let (_dir, store) = open();
        store.run(|tx| tx.set(b"key", b"value")).unwrap();

        let value = store.read_snapshot(|snap| snap.get(b"key")).unwrap();
        assert_eq!(value, Some(Bytes::from_static(b"value")));
        assert_eq!(store.stats().commits, 1);
    }

    #[test]
    fn test_scan_prefix_ordered() {
        let (_dir, store) = open();
        store
            .run(|tx| {
                tx.set(b"p/3", b"c")?;
                tx.set(b"p/1", b"a")?;
                tx.set(b"q/1", b"x")?;
                tx.set(b"p/2", b"b")
            })
            .unwrap();

        let values = store
            .read_snapshot(|snap| {
                let mut values = Vec::new();
                snap.scan_prefix(b"p/", &mut |_, v| {
                    values.extend_from_slice(v);
                    Ok(())
                })?;
                Ok(values)
            })
            .unwrap();
        assert_eq!(values, b"abc");
    }

    #[test]
    fn test_clear_prefix_and_read_your_writes() {
        let (_dir, store) = open();
        store
            .run(|tx| {
                tx.set(b"d/1", b"1")?;
                tx.set(b"d/2", b"2")
            })
            .unwrap();

        store
            .run(|tx| {
                tx.clear_prefix(b"d/")?;
                tx.set(b"d/9", b"9")?;
                let keys: Vec<Vec<u8>> =
                    tx.scan_prefix(b"d/")?.into_iter().map(|(k, _)| k).collect();
                assert_eq!(keys, vec![b"d/9".to_vec()]);
                Ok(())
            })
            .unwrap();

        let keys = store
            .read_snapshot(|snap| {
                let mut keys = Vec::new();
                snap.scan_prefix(b"d/", &mut |k, _| {
                    keys.push(k.to_vec());
                    Ok(())
                })?;
                Ok(keys)
            })
            .unwrap();
        assert_eq!(keys, vec![b"d/9".to_vec()]);
    }

    #[test]
    fn test_scan_keys_limited_and_sees_own_deletes() {
        let (_dir, store) = open();
        store
            .run(|tx| {
                for i in 0..5u8 {
                    tx.set(&[b'k', i], &[i; 64])?;
                }
                tx.set(b"l", b"other")
            })
            .unwrap();

        store
            .run(|tx| {
                let first = tx.scan_keys(b"k", 2)?;
                assert_eq!(first, vec![vec![b'k', 0], vec![b'k', 1]]);
                for key in &first {
                    tx.clear(key)?;
                }
                let rest = tx.scan_keys(b"k", 10)?;
                assert_eq!(rest, vec![vec![b'k', 2], vec![b'k', 3], vec![b'k', 4]]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_clear_prefix_charged_per_key() {
        let dir = TempDir::new().unwrap();
        let store = RocksDbStore::open_default(dir.path())
            .unwrap()
            .with_limits(SubstrateLimits {
                max_value_size: 100,
                max_tx_bytes: 100,
                max_tx_duration: std::time::Duration::from_secs(5),
            });
        for batch in 0..4u8 {
            store
                .run(|tx| {
                    for i in 0..10u8 {
                        tx.set(&[b'k', batch, i], b"v")?;
                    }
                    Ok(())
                })
                .unwrap();
        }

        // 40 keys of 3 bytes each is past the 100 byte ceiling
        let result = store.run(|tx| tx.clear_prefix(b"k"));
        assert!(matches!(result, Err(KvBlobError::TransactionTooLarge { .. })));
    }

    #[test]
    fn test_aborted_body_commits_nothing() {
        let (_dir, store) = open();
        let result: Result<()> = store.run(|tx| {
            tx.set(b"a", b"1")?;
            Err(KvBlobError::SourceRead(std::io::Error::other("boom")))
        });
        assert!(result.is_err());
        assert_eq!(store.read_snapshot(|snap| snap.get(b"a")).unwrap(), None);
        assert_eq!(store.stats().aborts, 1);
    }

    #[test]
    fn test_value_limit_enforced() {
        let (_dir, store) = open();
        let too_big = vec![0u8; store.limits().max_value_size + 1];
        let result = store.run(|tx| tx.set(b"big", &too_big));
        assert!(matches!(result, Err(KvBlobError::ValueTooLarge { .. })));
    }

    #[test]
    fn test_reopen_persists() {
        let dir = TempDir::new().unwrap();
        {
            let store = RocksDbStore::open_default(dir.path()).unwrap();
            store.run(|tx| tx.set(b"durable", b"yes")).unwrap();
        }
        let store = RocksDbStore::open_default(dir.path()).unwrap();
        let value = store.read_snapshot(|snap| snap.get(b"durable")).unwrap();
        assert_eq!(value, Some(Bytes::from_static(b"yes")));
    }
}
