//! Transactional substrate traits
//!
//! Defines the interface every key-value substrate must offer to the blob
//! layer: retrying transactional units of work, snapshot reads and the hard
//! limits the substrate enforces.

use bytes::Bytes;
use kvblob_core::error::{KvBlobError, Result};
use kvblob_core::SubstrateLimits;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// A key and its value, as returned by range reads
pub type KeyValue = (Vec<u8>, Bytes);

/// Substrate statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstrateStats {
    /// Transactions that committed
    pub commits: u64,

    /// Attempts discarded because of a retryable conflict
    pub conflicts: u64,

    /// Attempts abandoned because the body or commit failed
    pub aborts: u64,

    /// Snapshot reads served
    pub snapshot_reads: u64,
}

/// One attempt of a transactional unit of work
///
/// Writes are buffered and become visible to other readers only when the
/// attempt commits. Reads observe the attempt's own writes.
pub trait Transaction {
    /// Read a single key
    fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Set a single key
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a single key
    fn clear(&mut self, key: &[u8]) -> Result<()>;

    /// Remove every key starting with `prefix`
    ///
    /// Charged like a `clear` of each removed key.
    fn clear_prefix(&mut self, prefix: &[u8]) -> Result<()>;

    /// Read up to `limit` keys starting with `prefix`, in ascending key
    /// order, without their values
    fn scan_keys(&mut self, prefix: &[u8], limit: usize) -> Result<Vec<Vec<u8>>>;

    /// Read every key starting with `prefix`, in ascending key order
    fn scan_prefix(&mut self, prefix: &[u8]) -> Result<Vec<KeyValue>>;
}

/// A consistent, read-only view of the store at one point in time
pub trait ReadSnapshot {
    /// Read a single key
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Visit every key starting with `prefix`, in ascending key order
    ///
    /// Stops at the first error returned by `visit`.
    fn scan_prefix(
        &self,
        prefix: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()>;
}

/// Transactional key-value substrate
///
/// All implementations must be Send + Sync so one store can serve many writers.
pub trait TransactionalStore: Send + Sync {
    /// Limits this substrate enforces
    fn limits(&self) -> SubstrateLimits;

    /// Run `body` as one transaction, committing its writes atomically
    ///
    /// On a retryable conflict the writes are discarded and `body` is invoked
    /// again, so it must stage the same writes on every invocation. An error
    /// returned by `body` aborts the transaction without a retry.
    fn run<T, F>(&self, body: F) -> Result<T>
    where
        F: FnMut(&mut dyn Transaction) -> Result<T>;

    /// Run `body` against a read snapshot; reads are not tracked for conflicts
    fn read_snapshot<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&dyn ReadSnapshot) -> Result<T>;

    /// Get substrate statistics
    fn stats(&self) -> SubstrateStats;
}

impl<S: TransactionalStore> TransactionalStore for Arc<S> {
    fn limits(&self) -> SubstrateLimits {
        (**self).limits()
    }

    fn run<T, F>(&self, body: F) -> Result<T>
    where
        F: FnMut(&mut dyn Transaction) -> Result<T>,
    {
        (**self).run(body)
    }

    fn read_snapshot<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&dyn ReadSnapshot) -> Result<T>,
    {
        (**self).read_snapshot(body)
    }

    fn stats(&self) -> SubstrateStats {
        (**self).stats()
    }
}

/// Retry schedule for conflicting transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up, first attempt included
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_backoff: Duration,

    /// Upper bound on the delay between attempts
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Retry up to `max_attempts` times without sleeping in between
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Drive `attempt` until it succeeds, fails for good, or attempts run out
    ///
    /// `on_conflict` is told about every discarded attempt.
    pub fn run<T>(
        &self,
        mut attempt: impl FnMut(u32) -> Result<T>,
        mut on_conflict: impl FnMut(),
    ) -> Result<T> {
        let mut n = 1;
        loop {
            match attempt(n) {
                Err(err) if err.is_retryable() => {
                    on_conflict();
                    if n >= self.max_attempts {
                        return Err(KvBlobError::TransactionFailed {
                            attempts: n,
                            reason: err.to_string(),
                        });
                    }
                    let delay = self.backoff(n);
                    warn!(
                        attempt = n,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying transaction"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    n += 1;
                }
                other => return other,
            }
        }
    }
}

/// Tracks what one transaction attempt mutates against the substrate limits
#[derive(Debug)]
pub struct MutationBudget {
    limits: SubstrateLimits,
    started: Instant,
    mutated_bytes: u64,
    value_bytes: u64,
    keys_written: usize,
}

impl MutationBudget {
    pub fn new(limits: SubstrateLimits) -> Self {
        Self {
            limits,
            started: Instant::now(),
            mutated_bytes: 0,
            value_bytes: 0,
            keys_written: 0,
        }
    }

    /// Account for a `set`
    pub fn charge_set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if value.len() > self.limits.max_value_size {
            return Err(KvBlobError::ValueTooLarge {
                size: value.len(),
                max: self.limits.max_value_size,
            });
        }
        self.mutated_bytes += (key.len() + value.len()) as u64;
        self.value_bytes += value.len() as u64;
        self.keys_written += 1;
        Ok(())
    }

    /// Account for a `clear` or `clear_prefix`
    pub fn charge_clear(&mut self, key: &[u8]) {
        self.mutated_bytes += key.len() as u64;
    }

    /// Check the limits that apply at commit time
    ///
    /// An oversized transaction can never succeed; an expired one may on a
    /// fresh attempt.
    pub fn check_commit(&self) -> Result<()> {
        if self.mutated_bytes > self.limits.max_tx_bytes {
            return Err(KvBlobError::TransactionTooLarge {
                size: self.mutated_bytes,
                max: self.limits.max_tx_bytes,
            });
        }
        let elapsed = self.started.elapsed();
        if elapsed > self.limits.max_tx_duration {
            return Err(KvBlobError::Conflict(format!(
                "transaction open for {} ms (max: {} ms)",
                elapsed.as_millis(),
                self.limits.max_tx_duration.as_millis()
            )));
        }
        Ok(())
    }

    pub fn mutated_bytes(&self) -> u64 {
        self.mutated_bytes
    }

    pub fn value_bytes(&self) -> u64 {
        self.value_bytes
    }

    pub fn keys_written(&self) -> usize {
        self.keys_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
        assert_eq!(policy.backoff(4), Duration::from_millis(50));
        assert_eq!(policy.backoff(64), Duration::from_millis(50));
    }

    #[test]
    fn test_retries_conflicts_then_succeeds() {
        let policy = RetryPolicy::immediate(5);
        let conflicts = Cell::new(0);
        let result = policy.run(
            |n| {
                if n < 3 {
                    Err(KvBlobError::Conflict("busy".into()))
                } else {
                    Ok(n)
                }
            },
            || conflicts.set(conflicts.get() + 1),
        );
        assert_eq!(result.unwrap(), 3);
        assert_eq!(conflicts.get(), 2);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::immediate(3);
        let result: Result<()> = policy.run(|_| Err(KvBlobError::Conflict("busy".into())), || {});
        assert!(matches!(
            result,
            Err(KvBlobError::TransactionFailed { attempts: 3, .. })
        ));
    }

    #[test]
    fn test_does_not_retry_other_errors() {
        let policy = RetryPolicy::immediate(5);
        let calls = Cell::new(0);
        let result: Result<()> = policy.run(
            |_| {
                calls.set(calls.get() + 1);
                Err(KvBlobError::SourceRead(std::io::Error::other("broken pipe")))
            },
            || {},
        );
        assert!(matches!(result, Err(KvBlobError::SourceRead(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_mutation_budget() {
        let limits = SubstrateLimits {
            max_value_size: 10,
            max_tx_bytes: 30,
            max_tx_duration: Duration::from_secs(5),
        };
        let mut budget = MutationBudget::new(limits);

        assert!(matches!(
            budget.charge_set(b"k", &[0u8; 11]),
            Err(KvBlobError::ValueTooLarge { size: 11, max: 10 })
        ));

        budget.charge_set(b"k1", &[0u8; 10]).unwrap();
        budget.charge_set(b"k2", &[0u8; 10]).unwrap();
        budget.check_commit().unwrap();
        assert_eq!(budget.mutated_bytes(), 24);
        assert_eq!(budget.value_bytes(), 20);
        assert_eq!(budget.keys_written(), 2);

        budget.charge_set(b"k3", &[0u8; 10]).unwrap();
        assert!(matches!(
            budget.check_commit(),
            Err(KvBlobError::TransactionTooLarge { size: 36, max: 30 })
        ));
    }

    #[test]
    fn test_expired_transaction_is_retryable() {
        let limits = SubstrateLimits {
            max_tx_duration: Duration::ZERO,
            ..SubstrateLimits::default()
        };
        let budget = MutationBudget::new(limits);
        std::thread::sleep(Duration::from_millis(2));
        let err = budget.check_commit().unwrap_err();
        assert!(err.is_retryable());
    }
}
