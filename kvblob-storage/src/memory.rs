//! In-memory transactional substrate
//!
//! Used for testing and development. Not persistent.
//!
//! Transactions are serialized through an upgradable read lock, so real
//! conflicts never happen; `inject_conflicts` simulates them to exercise the
//! retry path of callers. Limits are enforced exactly like a real substrate.

use crate::backend::{
    KeyValue, MutationBudget, ReadSnapshot, RetryPolicy, SubstrateStats, Transaction,
    TransactionalStore,
};
use bytes::Bytes;
use kvblob_core::error::{KvBlobError, Result};
use kvblob_core::SubstrateLimits;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::debug;

type Map = BTreeMap<Vec<u8>, Bytes>;

/// What one committed transaction mutated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    /// Key and value bytes mutated
    pub mutated_bytes: u64,

    /// Value bytes written by `set`
    pub value_bytes: u64,

    /// Keys written by `set`
    pub keys_written: usize,
}

/// In-memory transactional store
pub struct MemoryStore {
    data: RwLock<Map>,
    limits: SubstrateLimits,
    retry: RetryPolicy,

    /// Commits still to be failed with a conflict
    pending_conflicts: AtomicU32,

    /// Committed transactions, oldest first
    commit_log: Mutex<Vec<CommitRecord>>,

    /// Operation counters
    commits: AtomicU64,
    conflicts: AtomicU64,
    aborts: AtomicU64,
    snapshot_reads: AtomicU64,
}

impl MemoryStore {
    /// Create a store with the default substrate limits
    pub fn new() -> Self {
        Self::with_limits(SubstrateLimits::default())
    }

    /// Create a store enforcing the given limits
    pub fn with_limits(limits: SubstrateLimits) -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            limits,
            retry: RetryPolicy::immediate(RetryPolicy::default().max_attempts),
            pending_conflicts: AtomicU32::new(0),
            commit_log: Mutex::new(Vec::new()),
            commits: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
            snapshot_reads: AtomicU64::new(0),
        }
    }

    /// Set the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fail the next `n` commit attempts with a retryable conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.pending_conflicts.fetch_add(n, Ordering::SeqCst);
    }

    /// Committed transactions, oldest first
    pub fn commit_log(&self) -> Vec<CommitRecord> {
        self.commit_log.lock().clone()
    }

    /// Number of keys stored
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Clear all stored keys and the commit log
    pub fn clear(&self) {
        self.data.write().clear();
        self.commit_log.lock().clear();
    }

    fn take_injected_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalStore for MemoryStore {
    fn limits(&self) -> SubstrateLimits {
        self.limits
    }

    fn run<T, F>(&self, mut body: F) -> Result<T>
    where
        F: FnMut(&mut dyn Transaction) -> Result<T>,
    {
        self.retry.run(
            |attempt| {
                let guard = self.data.upgradable_read();
                let mut tx = MemoryTransaction::new(&guard, self.limits);

                let output = match body(&mut tx).and_then(|output| {
                    tx.budget.check_commit()?;
                    Ok(output)
                }) {
                    Ok(output) => output,
                    Err(err) => {
                        if !err.is_retryable() {
                            self.aborts.fetch_add(1, Ordering::Relaxed);
                        }
                        return Err(err);
                    }
                };

                if self.take_injected_conflict() {
                    return Err(KvBlobError::Conflict(format!(
                        "injected conflict on attempt {}",
                        attempt
                    )));
                }

                let (pending, budget) = tx.into_pending();
                let mut data = RwLockUpgradableReadGuard::upgrade(guard);
                pending.apply(&mut data);
                drop(data);

                let record = CommitRecord {
                    mutated_bytes: budget.mutated_bytes(),
                    value_bytes: budget.value_bytes(),
                    keys_written: budget.keys_written(),
                };
                debug!(
                    attempt,
                    mutated_bytes = record.mutated_bytes,
                    keys = record.keys_written,
                    "Committed transaction"
                );
                self.commit_log.lock().push(record);
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
        let data = self.data.read();
        body(&MemorySnapshot { data: &data })
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

/// Buffered writes of one attempt
#[derive(Debug, Default)]
struct PendingWrites {
    /// `None` marks a cleared key
    overlay: BTreeMap<Vec<u8>, Option<Bytes>>,

    /// Prefixes cleared before the overlay entries were written
    cleared_prefixes: Vec<Vec<u8>>,
}

impl PendingWrites {
    fn is_cleared(&self, key: &[u8]) -> bool {
        self.cleared_prefixes.iter().any(|p| key.starts_with(p))
    }

    fn apply(self, data: &mut Map) {
        for prefix in &self.cleared_prefixes {
            let doomed: Vec<Vec<u8>> = prefix_range(data, prefix).map(|(k, _)| k.clone()).collect();
            for key in doomed {
                data.remove(&key);
            }
        }
        for (key, value) in self.overlay {
            match value {
                Some(value) => data.insert(key, value),
                None => data.remove(&key),
            };
        }
    }
}

struct MemoryTransaction<'a> {
    base: &'a Map,
    pending: PendingWrites,
    budget: MutationBudget,
}

impl<'a> MemoryTransaction<'a> {
    fn new(base: &'a Map, limits: SubstrateLimits) -> Self {
        Self {
            base,
            pending: PendingWrites::default(),
            budget: MutationBudget::new(limits),
        }
    }

    fn into_pending(self) -> (PendingWrites, MutationBudget) {
        (self.pending, self.budget)
    }

    /// Keys under `prefix` this attempt can see
    fn visible_keys(&self, prefix: &[u8]) -> BTreeSet<Vec<u8>> {
        let mut keys: BTreeSet<Vec<u8>> = prefix_range(self.base, prefix)
            .map(|(k, _)| k)
            .filter(|k| !self.pending.is_cleared(k))
            .cloned()
            .collect();
        for (key, value) in prefix_range(&self.pending.overlay, prefix) {
            match value {
                Some(_) => keys.insert(key.clone()),
                None => keys.remove(key),
            };
        }
        keys
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>> {
        if let Some(value) = self.pending.overlay.get(key) {
            return Ok(value.clone());
        }
        if self.pending.is_cleared(key) {
            return Ok(None);
        }
        Ok(self.base.get(key).cloned())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.budget.charge_set(key, value)?;
        self.pending
            .overlay
            .insert(key.to_vec(), Some(Bytes::copy_from_slice(value)));
        Ok(())
    }

    fn clear(&mut self, key: &[u8]) -> Result<()> {
        self.budget.charge_clear(key);
        self.pending.overlay.insert(key.to_vec(), None);
        Ok(())
    }

    fn clear_prefix(&mut self, prefix: &[u8]) -> Result<()> {
        for key in self.visible_keys(prefix) {
            self.budget.charge_clear(&key);
        }
        self.pending.overlay.retain(|k, _| !k.starts_with(prefix));
        self.pending.cleared_prefixes.push(prefix.to_vec());
        Ok(())
    }

    fn scan_keys(&mut self, prefix: &[u8], limit: usize) -> Result<Vec<Vec<u8>>> {
        Ok(self.visible_keys(prefix).into_iter().take(limit).collect())
    }

    fn scan_prefix(&mut self, prefix: &[u8]) -> Result<Vec<KeyValue>> {
        let mut merged: BTreeMap<Vec<u8>, Bytes> = prefix_range(self.base, prefix)
            .filter(|(k, _)| !self.pending.is_cleared(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in prefix_range(&self.pending.overlay, prefix) {
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }
}

struct MemorySnapshot<'a> {
    data: &'a Map,
}

impl ReadSnapshot for MemorySnapshot<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.data.get(key).cloned())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        for (key, value) in prefix_range(self.data, prefix) {
            visit(key, value)?;
        }
        Ok(())
    }
}

/// Entries of `map` whose key starts with `prefix`, in key order
fn prefix_range<'m, V>(
    map: &'m BTreeMap<Vec<u8>, V>,
    prefix: &'m [u8],
) -> impl Iterator<Item = (&'m Vec<u8>, &'m V)> + 'm {
    map.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
        .take_while(move |(k, _)| k.starts_with(prefix))
}
