//! Transaction batch scheduling
//!
//! Chunks are packed into substrate transactions until one more chunk could
//! push the batch past its byte budget, or the batch has been open longer
//! than its time budget. The check runs before each additional chunk is
//! pulled, so a batch never overshoots the byte budget.
//!
//! Batch bytes count chunk keys as well as chunk values, since the substrate
//! charges both against its per-transaction ceiling. The room reserved for
//! one more chunk is a full chunk plus the longest key it could be stored
//! under.

use bytes::Bytes;
use kvblob_core::error::Result;
use kvblob_core::BlobStoreConfig;
use kvblob_storage::{KeyValue, Transaction};
use std::time::{Duration, Instant};

/// Decides how many chunks go into one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchScheduler {
    chunk_max_size: u64,
    key_headroom: u64,
    tx_byte_budget: u64,
    tx_time_budget: Duration,
}

impl BatchScheduler {
    pub fn new(chunk_max_size: usize, tx_byte_budget: u64, tx_time_budget: Duration) -> Self {
        Self {
            chunk_max_size: chunk_max_size as u64,
            key_headroom: 0,
            tx_byte_budget,
            tx_time_budget,
        }
    }

    pub fn from_config(config: &BlobStoreConfig) -> Self {
        Self::new(
            config.chunk_max_size,
            config.tx_byte_budget,
            config.tx_time_budget(),
        )
    }

    /// Reserve `max_key_len` bytes per extra chunk for its key
    pub fn with_key_headroom(mut self, max_key_len: usize) -> Self {
        self.key_headroom = max_key_len as u64;
        self
    }

    /// Whether another chunk may join a batch holding `batch_bytes` of keys
    /// and values that was opened `elapsed` ago
    pub fn admits(&self, batch_bytes: u64, elapsed: Duration, source_exhausted: bool) -> bool {
        !source_exhausted
            && batch_bytes + self.chunk_max_size + self.key_headroom < self.tx_byte_budget
            && elapsed < self.tx_time_budget
    }

    /// Whether another chunk may join `batch`
    pub fn admits_more(&self, batch: &TxBatch, source_exhausted: bool) -> bool {
        self.admits(batch.bytes(), batch.elapsed(), source_exhausted)
    }

    pub fn tx_byte_budget(&self) -> u64 {
        self.tx_byte_budget
    }

    pub fn tx_time_budget(&self) -> Duration {
        self.tx_time_budget
    }
}

/// Chunk writes staged for one transaction
///
/// Once filled the batch is never mutated again; every attempt of the
/// owning transaction replays the same writes.
#[derive(Debug)]
pub struct TxBatch {
    opened: Instant,
    writes: Vec<KeyValue>,
    bytes: u64,
    value_bytes: u64,
}

impl TxBatch {
    /// Open an empty batch; its clock starts now
    pub fn open() -> Self {
        Self {
            opened: Instant::now(),
            writes: Vec::new(),
            bytes: 0,
            value_bytes: 0,
        }
    }

    /// Add a chunk write
    pub fn stage(&mut self, key: Vec<u8>, data: Bytes) {
        self.bytes += (key.len() + data.len()) as u64;
        self.value_bytes += data.len() as u64;
        self.writes.push((key, data));
    }

    /// Key and value bytes staged, as the substrate will charge them
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Chunk content bytes staged
    pub fn value_bytes(&self) -> u64 {
        self.value_bytes
    }

    /// Chunks staged
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn elapsed(&self) -> Duration {
        self.opened.elapsed()
    }

    pub fn writes(&self) -> &[KeyValue] {
        &self.writes
    }

    /// Replay the staged writes into a transaction attempt
    pub fn apply(&self, tx: &mut dyn Transaction) -> Result<()> {
        for (key, data) in &self.writes {
            tx.set(key, data)?;
        }
        Ok(())
    }
}
