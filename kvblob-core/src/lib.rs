//! kvblob Core Library
//!
//! Core abstractions for storing large blobs on a transactional key-value store.
//! This crate provides:
//! - Order-preserving tuple keys for metadata and chunk records
//! - Blob metadata records and their binary codec
//! - Incremental SHA-256 content hashing
//! - Substrate limits, blob store configuration and error handling

pub mod config;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod metadata;

pub use config::{BlobStoreConfig, SubstrateLimits};
pub use crypto::{BlobHasher, ContentHash};
pub use error::{KvBlobError, Result};
pub use keys::{Element, KeySpace, Tuple};
pub use metadata::BlobMetadata;

/// Largest value the substrate accepts under a single key.
pub const MAX_VALUE_SIZE: usize = 10_000;

/// Default chunk ceiling. Chunks must fit in a single value.
pub const DEFAULT_CHUNK_SIZE: usize = MAX_VALUE_SIZE;

/// Hard ceiling on bytes mutated by one substrate transaction.
pub const MAX_TX_BYTES: u64 = 10_000_000;

/// Default per-transaction byte budget, kept below `MAX_TX_BYTES`.
pub const DEFAULT_TX_BYTE_BUDGET: u64 = 9_000_000;

/// Hard ceiling on the lifetime of one substrate transaction.
pub const MAX_TX_DURATION_MS: u64 = 5_000;

/// Default per-transaction wall-clock budget, kept below `MAX_TX_DURATION_MS`.
pub const DEFAULT_TX_TIME_BUDGET_MS: u64 = 4_000;

/// Default key namespace shared by metadata and chunk keys.
pub const DEFAULT_NAMESPACE: &str = "kvblob";
