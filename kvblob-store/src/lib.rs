//! kvblob Blob Store
//!
//! Stores arbitrarily large blobs on a transactional key-value substrate
//! whose values and transactions are size- and time-limited:
//! - `ChunkSource` splits a buffer or stream into bounded chunks and hashes them
//! - `BatchScheduler` packs chunks into transactions within byte and time budgets
//! - `BlobStore::put` writes chunks and publishes the blob once all have committed
//! - `BlobStore::get` and `BlobStore::list` read from a single consistent snapshot
//! - `AsyncBlobStore` offers the same operations to async callers

pub mod async_store;
pub mod reader;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod writer;

pub use async_store::AsyncBlobStore;
pub use reader::{Blob, ReadOptions};
pub use scheduler::{BatchScheduler, TxBatch};
pub use source::{ChunkSource, SourceChunk, SourceSummary};
pub use store::BlobStore;
pub use writer::{WriteReport, WriteSession};

pub use kvblob_core::{BlobMetadata, BlobStoreConfig, ContentHash, KvBlobError, Result};
