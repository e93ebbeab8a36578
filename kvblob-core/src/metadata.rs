//! Blob metadata records
//!
//! Every blob has exactly one metadata record. It is written with
//! `valid = false` before any chunk and overwritten with `valid = true`
//! only after the last chunk has committed, so readers gate on `valid`
//! before trusting any chunk under the blob's data prefix.

use crate::crypto::ContentHash;
use crate::error::{KvBlobError, Result};
use bincode::Options;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use uuid::Uuid;

/// Metadata of one blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobMetadata {
    /// Blob name. Encoded in the key, so not part of the stored value.
    #[serde(skip)]
    pub name: String,

    /// Whether every chunk has committed
    pub valid: bool,

    /// When the blob was marked valid
    pub creation_time: Option<DateTime<Utc>>,

    /// Total size in bytes (meaningful only when valid)
    pub size: u64,

    /// Number of chunks written (meaningful only when valid)
    pub chunk_count: u64,

    /// Chunk ceiling in effect when the blob was written
    pub chunk_max_size: u32,

    /// SHA-256 of the full content (present only when valid)
    pub hash: Option<ContentHash>,

    /// Identifies the `put` attempt that owns this record
    pub write_id: Uuid,
}

impl BlobMetadata {
    /// Record written at the start of a `put`, before any chunk
    pub fn pending(name: impl Into<String>, chunk_max_size: u32, write_id: Uuid) -> Self {
        Self {
            name: name.into(),
            valid: false,
            creation_time: None,
            size: 0,
            chunk_count: 0,
            chunk_max_size,
            hash: None,
            write_id,
        }
    }

    /// Turn a pending record into the published one
    pub fn complete(mut self, size: u64, chunk_count: u64, hash: ContentHash) -> Self {
        self.valid = true;
        self.size = size;
        self.chunk_count = chunk_count;
        self.hash = Some(hash);
        self.creation_time = Some(Utc::now());
        self
    }

    /// Encode the stored value (the name is not included)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        MetadataCodec::global().encode(self)
    }

    /// Decode a stored value and attach the name recovered from its key
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let mut meta = MetadataCodec::global().decode(bytes)?;
        meta.name = name.into();
        Ok(meta)
    }
}

/// Current on-disk format of metadata values
pub const METADATA_FORMAT_VERSION: u8 = 1;

/// Upper bound on an encoded metadata value
const MAX_RECORD_SIZE: u64 = 1024;

static CODEC: LazyLock<MetadataCodec> = LazyLock::new(|| MetadataCodec {
    version: METADATA_FORMAT_VERSION,
    limit: MAX_RECORD_SIZE,
});

/// Binary codec for metadata values
///
/// Values are a format version byte followed by a fixed-int, little-endian
/// bincode body. One immutable instance is shared by the whole process.
#[derive(Debug)]
pub struct MetadataCodec {
    version: u8,
    limit: u64,
}

impl MetadataCodec {
    pub fn global() -> &'static MetadataCodec {
        &CODEC
    }

    fn options(&self) -> impl Options {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_little_endian()
            .with_limit(self.limit)
    }

    pub fn encode(&self, meta: &BlobMetadata) -> Result<Vec<u8>> {
        let body = self.options().serialize(meta)?;
        let mut out = Vec::with_capacity(body.len() + 1);
        out.push(self.version);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<BlobMetadata> {
        match bytes.split_first() {
            Some((&version, body)) if version == self.version => {
                Ok(self.options().deserialize(body)?)
            }
            Some((&version, _)) => Err(KvBlobError::Serialization(format!(
                "Unsupported metadata format version {}",
                version
            ))),
            None => Err(KvBlobError::Serialization(
                "Empty metadata record".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_record() {
        let meta = BlobMetadata::pending("a", 10_000, Uuid::new_v4());
        assert!(!meta.valid);
        assert!(meta.hash.is_none());
        assert!(meta.creation_time.is_none());

        let bytes = meta.to_bytes().unwrap();
        let decoded = BlobMetadata::from_bytes("a", &bytes).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_complete_record() {
        let write_id = Uuid::new_v4();
        let hash = ContentHash::compute(b"payload");
        let meta = BlobMetadata::pending("dir/x", 10_000, write_id).complete(7, 1, hash);

        let bytes = meta.to_bytes().unwrap();
        assert_eq!(bytes[0], METADATA_FORMAT_VERSION);

        let decoded = BlobMetadata::from_bytes("dir/x", &bytes).unwrap();
        assert!(decoded.valid);
        assert_eq!(decoded.size, 7);
        assert_eq!(decoded.chunk_count, 1);
        assert_eq!(decoded.hash, Some(hash));
        assert_eq!(decoded.write_id, write_id);
        assert_eq!(decoded.creation_time, meta.creation_time);
    }

    #[test]
    fn test_name_not_stored() {
        let meta = BlobMetadata::pending("a-very-distinctive-name", 10_000, Uuid::new_v4());
        let bytes = meta.to_bytes().unwrap();
        let needle = b"a-very-distinctive-name";
        assert!(!bytes.windows(needle.len()).any(|w| w == needle));

        let decoded = BlobMetadata::from_bytes("renamed", &bytes).unwrap();
        assert_eq!(decoded.name, "renamed");
    }

    #[test]
    fn test_rejects_bad_records() {
        assert!(BlobMetadata::from_bytes("a", &[]).is_err());
        assert!(BlobMetadata::from_bytes("a", &[99, 0, 0]).is_err());
        assert!(BlobMetadata::from_bytes("a", &[METADATA_FORMAT_VERSION, 1]).is_err());
    }
}
