//! Content hashing for kvblob
//!
//! Blobs are identified for verification by the SHA-256 digest of their full
//! content in offset order. The digest is built incrementally while chunks
//! are produced, so a blob never has to be held in memory to be hashed.

use crate::error::{KvBlobError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest size (32 bytes)
pub const HASH_SIZE: usize = 32;

/// SHA-256 digest of a blob's content
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; HASH_SIZE]);

impl ContentHash {
    /// Compute the SHA-256 digest of data in one pass
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = BlobHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Create from raw digest bytes
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw hash bytes
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| KvBlobError::Serialization(e.to_string()))?;
        if bytes.len() != HASH_SIZE {
            return Err(KvBlobError::Serialization(format!(
                "Invalid hash length: expected {}, got {}",
                HASH_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; HASH_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Verify that data matches this hash
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(self.as_bytes())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        if bytes.len() != HASH_SIZE {
            return Err(serde::de::Error::custom("Invalid hash length"));
        }
        let mut arr = [0u8; HASH_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

/// Incremental SHA-256 over a byte stream
///
/// `finalize` consumes the hasher, so a digest can only be produced once.
#[derive(Clone, Default)]
pub struct BlobHasher {
    inner: Sha256,
    bytes: u64,
}

impl BlobHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the next run of bytes into the digest
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes folded in so far
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    /// Produce the digest
    pub fn finalize(self) -> ContentHash {
        ContentHash(self.inner.finalize().into())
    }
}

impl fmt::Debug for BlobHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobHasher")
            .field("bytes", &self.bytes)
            .finish()
    }
}
