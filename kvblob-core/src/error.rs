//! Error types for kvblob
//!
//! Provides a unified error type for all kvblob operations.

use thiserror::Error;

/// Result type alias for kvblob operations
pub type Result<T> = std::result::Result<T, KvBlobError>;

/// Unified error type for kvblob
#[derive(Error, Debug)]
pub enum KvBlobError {
    // ===== Source Errors =====
    #[error("Source read failed: {0}")]
    SourceRead(#[source] std::io::Error),

    #[error("Chunk source already exhausted")]
    SourceExhausted,

    // ===== Blob Errors =====
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob is not valid (write in progress or failed): {0}")]
    Incomplete(String),

    #[error("Blob corrupted: {name}: {reason}")]
    Corruption { name: String, reason: String },

    #[error("Blob {0} was replaced by another writer")]
    ConcurrentWrite(String),

    // ===== Transaction Errors =====
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Transaction failed after {attempts} attempts: {reason}")]
    TransactionFailed { attempts: u32, reason: String },

    #[error("Value too large: {size} bytes (max: {max})")]
    ValueTooLarge { size: usize, max: usize },

    #[error("Transaction too large: {size} bytes (max: {max})")]
    TransactionTooLarge { size: u64, max: u64 },

    // ===== Key Errors =====
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // ===== Storage Errors =====
    #[error("Storage error: {0}")]
    Storage(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KvBlobError {
    /// Whether the substrate may re-run the transaction body after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, KvBlobError::Conflict(_))
    }

    /// Whether the error means the blob is not available for reading
    pub fn is_unavailable(&self) -> bool {
        matches!(self, KvBlobError::NotFound(_) | KvBlobError::Incomplete(_))
    }
}

impl From<bincode::Error> for KvBlobError {
    fn from(err: bincode::Error) -> Self {
        KvBlobError::Serialization(err.to_string())
    }
}
