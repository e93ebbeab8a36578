//! Blob writer
//!
//! A `put` runs in three phases, each its own substrate transaction or
//! sequence of transactions:
//!
//! 1. The metadata record is written with `valid = false`. Chunks left under
//!    the name by an earlier blob are then cleared, a bounded page of keys per
//!    transaction, before any new chunk is written.
//! 2. Chunks are pulled from the source into batches sized by the
//!    [`BatchScheduler`](crate::scheduler::BatchScheduler) and committed one
//!    batch per transaction.
//! 3. Once the source is exhausted the metadata record is rewritten with
//!    `valid = true`, the size, chunk count and content hash.
//!
//! Chunks are read from the source before a transaction starts. A
//! transaction body only replays an already filled batch, so a substrate
//! retry never reads the source twice or skips bytes.

use crate::scheduler::{BatchScheduler, TxBatch};
use crate::source::{ChunkSource, SourceSummary};
use crate::store::BlobStore;
use bytes::Bytes;
use kvblob_core::error::{KvBlobError, Result};
use kvblob_core::{BlobMetadata, KeySpace};
use kvblob_storage::TransactionalStore;
use std::io::Read;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of a successful `put`
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReport {
    /// The published metadata record
    pub metadata: BlobMetadata,

    /// Chunk batches opened
    pub transactions: u64,

    /// Wall-clock time of the whole put
    pub elapsed: Duration,
}

/// State of one `put` in progress
///
/// Committed counters advance only after the transaction carrying a batch
/// has committed.
#[derive(Debug)]
pub struct WriteSession<'a> {
    name: &'a str,
    write_id: Uuid,
    source: ChunkSource,

    /// Batches opened, empty ones included
    transactions: u64,

    committed_bytes: u64,
    committed_chunks: u64,
}

impl<'a> WriteSession<'a> {
    pub fn new(name: &'a str, source: ChunkSource, write_id: Uuid) -> Self {
        Self {
            name,
            write_id,
            source,
            transactions: 0,
            committed_bytes: 0,
            committed_chunks: 0,
        }
    }

    pub fn write_id(&self) -> Uuid {
        self.write_id
    }

    pub fn transactions(&self) -> u64 {
        self.transactions
    }

    pub fn committed_bytes(&self) -> u64 {
        self.committed_bytes
    }

    pub fn committed_chunks(&self) -> u64 {
        self.committed_chunks
    }

    /// Whether every chunk has been pulled from the source
    pub fn is_terminal(&self) -> bool {
        self.source.is_exhausted()
    }

    /// Pull chunks into a fresh batch until the scheduler closes it
    ///
    /// Every batch gets at least one pull. A read failure discards the batch.
    pub fn fill_batch(&mut self, scheduler: &BatchScheduler, keys: &KeySpace) -> Result<TxBatch> {
        let mut batch = TxBatch::open();
        self.transactions += 1;

        loop {
            match self.source.next_chunk()? {
                Some(chunk) => {
                    batch.stage(keys.data_key(self.name, chunk.offset), chunk.data);
                }
                None => break,
            }
            if !scheduler.admits_more(&batch, self.source.is_exhausted()) {
                break;
            }
        }

        Ok(batch)
    }

    /// Record that `batch` has committed
    pub fn committed(&mut self, batch: &TxBatch) {
        self.committed_bytes += batch.value_bytes();
        self.committed_chunks += batch.len() as u64;
    }

    /// What the source observed, once it is exhausted and every chunk committed
    pub fn finish(&self) -> Result<SourceSummary> {
        let summary = self.source.summary().ok_or_else(|| {
            KvBlobError::Internal(format!("write session for {} is not terminal", self.name))
        })?;
        if summary.size != self.committed_bytes || summary.chunk_count != self.committed_chunks {
            return Err(KvBlobError::Internal(format!(
                "write session for {} committed {} bytes in {} chunks, source produced {} in {}",
                self.name,
                self.committed_bytes,
                self.committed_chunks,
                summary.size,
                summary.chunk_count
            )));
        }
        Ok(summary)
    }
}

impl<S: TransactionalStore> BlobStore<S> {
    /// Write the invalid record for a new put, then clear stale chunks
    ///
    /// The first transaction carries the record and the first page of
    /// deletes. Each page holds as many keys as fit in the byte budget, and a
    /// page stops early once the time budget runs out. Returns the number of
    /// transactions committed.
    fn mark_invalid(
        &self,
        meta_key: &[u8],
        pending_value: &[u8],
        data_prefix: &[u8],
        max_key_len: usize,
    ) -> Result<u64> {
        let record_bytes = (meta_key.len() + pending_value.len()) as u64;
        let room = self.scheduler.tx_byte_budget().saturating_sub(record_bytes);
        let page = (room / max_key_len as u64).max(1) as usize;
        let time_budget = self.scheduler.tx_time_budget();

        let mut transactions = 0;
        loop {
            let first = transactions == 0;
            let more = self.store.run(|tx| {
                let opened = Instant::now();
                if first {
                    tx.set(meta_key, pending_value)?;
                }
                let stale = tx.scan_keys(data_prefix, page)?;
                let mut cleared = 0;
                for key in &stale {
                    if cleared > 0 && opened.elapsed() >= time_budget {
                        break;
                    }
                    tx.clear(key)?;
                    cleared += 1;
                }
                Ok(stale.len() == page || cleared < stale.len())
            })?;
            transactions += 1;
            if !more {
                return Ok(transactions);
            }
        }
    }

    /// Store the bytes produced by `source` under `name`, replacing any
    /// existing blob with that name
    ///
    /// On a source read failure nothing more is written and the blob stays
    /// marked invalid. A `put` is never resumed; callers retry it whole.
    pub fn put(&self, name: &str, source: ChunkSource) -> Result<WriteReport> {
        let started = Instant::now();
        let source = source.with_chunk_max_size(self.config.chunk_max_size);
        let write_id = Uuid::new_v4();
        let mut session = WriteSession::new(name, source, write_id);

        let meta_key = self.keys.metadata_key(name);
        let data_prefix = self.keys.data_prefix(name);
        let max_key_len = self.keys.max_data_key_len(name);
        let scheduler = self.scheduler.with_key_headroom(max_key_len);
        let pending = BlobMetadata::pending(name, self.config.chunk_max_size as u32, write_id);
        let pending_value = pending.to_bytes()?;

        let cleanup = self.mark_invalid(&meta_key, &pending_value, &data_prefix, max_key_len)?;
        debug!(name, %write_id, cleanup_transactions = cleanup, "Marked blob invalid");

        while !session.is_terminal() {
            let batch = match session.fill_batch(&scheduler, &self.keys) {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(
                        name,
                        write_id = %session.write_id(),
                        committed_bytes = session.committed_bytes(),
                        error = %err,
                        "Abandoning put, blob left invalid"
                    );
                    return Err(err);
                }
            };
            if batch.is_empty() {
                continue;
            }

            self.store.run(|tx| batch.apply(tx))?;
            session.committed(&batch);
            debug!(
                name,
                chunks = batch.len(),
                bytes = batch.value_bytes(),
                mutated_bytes = batch.bytes(),
                committed_bytes = session.committed_bytes(),
                "Committed chunk batch"
            );
        }

        let summary = session.finish()?;
        let metadata = pending.complete(summary.size, summary.chunk_count, summary.hash);
        let final_value = metadata.to_bytes()?;

        self.store.run(|tx| {
            let owner = match tx.get(&meta_key)? {
                Some(value) => BlobMetadata::from_bytes(name, &value)?.write_id,
                None => return Err(KvBlobError::ConcurrentWrite(name.to_string())),
            };
            if owner != session.write_id() {
                return Err(KvBlobError::ConcurrentWrite(name.to_string()));
            }
            tx.set(&meta_key, &final_value)
        })?;

        let elapsed = started.elapsed();
        info!(
            name,
            bytes = summary.size,
            chunks = summary.chunk_count,
            transactions = session.transactions(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Wrote blob"
        );

        Ok(WriteReport {
            metadata,
            transactions: session.transactions(),
            elapsed,
        })
    }

    /// Store an in-memory buffer
    pub fn put_bytes(&self, name: &str, data: impl Into<Bytes>) -> Result<WriteReport> {
        self.put(name, ChunkSource::buffer(data))
    }

    /// Store everything a reader produces
    pub fn put_reader(
        &self,
        name: &str,
        reader: impl Read + Send + 'static,
    ) -> Result<WriteReport> {
        self.put(name, ChunkSource::stream(reader))
    }
}
