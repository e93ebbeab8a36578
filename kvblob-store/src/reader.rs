//! Blob reader and lister
//!
//! Every read runs against a single substrate snapshot, so a `get` racing a
//! `put` of the same name never mixes chunks of the old and new blob.

use crate::store::BlobStore;
use bytes::{Bytes, BytesMut};
use kvblob_core::error::{KvBlobError, Result};
use kvblob_core::{BlobHasher, BlobMetadata, KeySpace};
use kvblob_storage::{ReadSnapshot, TransactionalStore};
use std::io::Write;
use tracing::{debug, warn};

/// A blob read back in full
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub metadata: BlobMetadata,
    pub data: Bytes,
}

/// Options for `get_with` and `get_into`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Recompute the content hash and compare it with the stored one
    pub verify_hash: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { verify_hash: true }
    }
}

impl ReadOptions {
    /// Skip hash verification; structural checks still apply
    pub fn unverified() -> Self {
        Self { verify_hash: false }
    }
}

impl<S: TransactionalStore> BlobStore<S> {
    /// Metadata of every blob whose name starts with `prefix`, in name order
    ///
    /// Records still marked invalid are included.
    pub fn list(&self, prefix: &str) -> Result<Vec<BlobMetadata>> {
        let scan_prefix = self.keys.metadata_prefix(prefix);
        self.store.read_snapshot(|snap| {
            let mut records = Vec::new();
            snap.scan_prefix(&scan_prefix, &mut |key, value| {
                let name = self.keys.decode_metadata_key(key)?;
                records.push(BlobMetadata::from_bytes(name, value)?);
                Ok(())
            })?;
            debug!(prefix, count = records.len(), "Listed blobs");
            Ok(records)
        })
    }

    /// Metadata of every blob
    pub fn list_all(&self) -> Result<Vec<BlobMetadata>> {
        self.list("")
    }

    /// Metadata of one blob, `None` if no record exists
    pub fn metadata(&self, name: &str) -> Result<Option<BlobMetadata>> {
        let key = self.keys.metadata_key(name);
        self.store.read_snapshot(|snap| {
            snap.get(&key)?
                .map(|value| BlobMetadata::from_bytes(name, &value))
                .transpose()
        })
    }

    /// Read a blob, verifying its content hash when the store is configured to
    pub fn get(&self, name: &str) -> Result<Blob> {
        self.get_with(
            name,
            ReadOptions {
                verify_hash: self.config.verify_on_read,
            },
        )
    }

    /// Read a blob into memory
    pub fn get_with(&self, name: &str, options: ReadOptions) -> Result<Blob> {
        let mut buf = BytesMut::new();
        let metadata = self.read_blob(name, options, &mut |chunk| {
            buf.extend_from_slice(chunk);
            Ok(())
        })?;
        Ok(Blob {
            metadata,
            data: buf.freeze(),
        })
    }

    /// Stream a blob into `out`
    ///
    /// Chunks are written as they are read, so on `Corruption` some content
    /// may already have been written.
    pub fn get_into<W: Write>(
        &self,
        name: &str,
        out: &mut W,
        options: ReadOptions,
    ) -> Result<BlobMetadata> {
        self.read_blob(name, options, &mut |chunk| {
            out.write_all(chunk)?;
            Ok(())
        })
    }

    fn read_blob(
        &self,
        name: &str,
        options: ReadOptions,
        sink: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<BlobMetadata> {
        self.store.read_snapshot(|snap| {
            let metadata = match snap.get(&self.keys.metadata_key(name))? {
                Some(value) => BlobMetadata::from_bytes(name, &value)?,
                None => return Err(KvBlobError::NotFound(name.to_string())),
            };
            if !metadata.valid {
                return Err(KvBlobError::Incomplete(name.to_string()));
            }

            let mut check = ChunkCheck::new(&metadata, options.verify_hash);
            read_chunks(snap, &self.keys, &metadata, &mut check, sink)?;
            if let Err(err) = check.finish() {
                warn!(name, error = %err, "Blob failed verification");
                return Err(err);
            }
            Ok(metadata)
        })
    }
}

fn read_chunks(
    snap: &dyn ReadSnapshot,
    keys: &KeySpace,
    metadata: &BlobMetadata,
    check: &mut ChunkCheck<'_>,
    sink: &mut dyn FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    snap.scan_prefix(&keys.data_prefix(&metadata.name), &mut |key, value| {
        let (name, offset) = keys.decode_data_key(key)?;
        if name != metadata.name {
            return Err(corruption(metadata, format!("chunk key belongs to {}", name)));
        }
        check.chunk(offset, value)?;
        sink(value)
    })
}

fn corruption(metadata: &BlobMetadata, reason: String) -> KvBlobError {
    KvBlobError::Corruption {
        name: metadata.name.clone(),
        reason,
    }
}

/// Structural and content checks over the chunks of one blob
struct ChunkCheck<'a> {
    metadata: &'a BlobMetadata,
    hasher: Option<BlobHasher>,
    next_offset: u64,
    chunks: u64,
}

impl<'a> ChunkCheck<'a> {
    fn new(metadata: &'a BlobMetadata, verify_hash: bool) -> Self {
        Self {
            metadata,
            hasher: verify_hash.then(BlobHasher::new),
            next_offset: 0,
            chunks: 0,
        }
    }

    fn chunk(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if offset != self.next_offset {
            return Err(corruption(self.metadata, format!(
                "chunk at offset {}, expected {}",
                offset, self.next_offset
            )));
        }
        if data.is_empty() || data.len() > self.metadata.chunk_max_size as usize {
            return Err(corruption(self.metadata, format!(
                "chunk at offset {} has {} bytes (max: {})",
                offset,
                data.len(),
                self.metadata.chunk_max_size
            )));
        }
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(data);
        }
        self.next_offset += data.len() as u64;
        self.chunks += 1;
        Ok(())
    }

    fn finish(self) -> Result<()> {
        if self.next_offset != self.metadata.size {
            return Err(corruption(self.metadata, format!(
                "read {} bytes, expected {}",
                self.next_offset, self.metadata.size
            )));
        }
        if self.chunks != self.metadata.chunk_count {
            return Err(corruption(self.metadata, format!(
                "read {} chunks, expected {}",
                self.chunks, self.metadata.chunk_count
            )));
        }
        if let Some(hasher) = self.hasher {
            let expected = self
                .metadata
                .hash
                .ok_or_else(|| corruption(self.metadata, "valid record has no hash".to_string()))?;
            let actual = hasher.finalize();
            if actual != expected {
                return Err(corruption(self.metadata, format!(
                    "content hash {} does not match stored {}",
                    actual, expected
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvblob_core::BlobStoreConfig;
    use kvblob_storage::MemoryStore;

    fn store() -> BlobStore<MemoryStore> {
        let config = BlobStoreConfig::default()
            .with_chunk_max_size(16)
            .with_tx_byte_budget(64);
        BlobStore::new(MemoryStore::new(), config).unwrap()
    }

    #[test]
    fn test_get_missing_blob() {
        let blobs = store();
        assert!(matches!(blobs.get("nope"), Err(KvBlobError::NotFound(_))));
        assert!(blobs.metadata("nope").unwrap().is_none());
    }

    #[test]
    fn test_get_into_writer() {
        let blobs = store();
        let data: Vec<u8> = (0..100u8).collect();
        blobs.put_bytes("w", data.clone()).unwrap();

        let mut out = Vec::new();
        let metadata = blobs.get_into("w", &mut out, ReadOptions::default()).unwrap();
        assert_eq!(out, data);
        assert_eq!(metadata.chunk_count, 7);
    }

    #[test]
    fn test_detects_tampered_chunk() {
        let blobs = store();
        blobs.put_bytes("t", vec![5u8; 40]).unwrap();

        let key = blobs.keys().data_key("t", 16);
        blobs.substrate().run(|tx| tx.set(&key, &[6u8; 16])).unwrap();

        assert!(matches!(
            blobs.get("t"),
            Err(KvBlobError::Corruption { .. })
        ));
        // Structure is intact, so an unverified read succeeds
        let blob = blobs.get_with("t", ReadOptions::unverified()).unwrap();
        assert_eq!(blob.data.len(), 40);
    }

    #[test]
    fn test_detects_missing_chunk() {
        let blobs = store();
        blobs.put_bytes("m", vec![1u8; 40]).unwrap();

        let key = blobs.keys().data_key("m", 16);
        blobs.substrate().run(|tx| tx.clear(&key)).unwrap();

        let err = blobs.get_with("m", ReadOptions::unverified()).unwrap_err();
        assert!(matches!(err, KvBlobError::Corruption { .. }));
    }

    #[test]
    fn test_detects_trailing_chunk() {
        let blobs = store();
        blobs.put_bytes("e", vec![1u8; 32]).unwrap();

        let key = blobs.keys().data_key("e", 32);
        blobs.substrate().run(|tx| tx.set(&key, b"extra")).unwrap();

        let err = blobs.get_with("e", ReadOptions::unverified()).unwrap_err();
        assert!(matches!(err, KvBlobError::Corruption { .. }));
    }

    #[test]
    fn test_list_orders_by_name() {
        let blobs = store();
        for name in ["b", "a/2", "a/1", "c"] {
            blobs.put_bytes(name, name.as_bytes().to_vec()).unwrap();
        }
        let names: Vec<String> = blobs
            .list_all()
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["a/1", "a/2", "b", "c"]);
    }
}
