//! Async wrapper for BlobStore
//!
//! Substrate calls block, so every operation is moved onto tokio's blocking
//! thread pool.

use crate::reader::{Blob, ReadOptions};
use crate::source::ChunkSource;
use crate::store::BlobStore;
use crate::writer::WriteReport;
use bytes::Bytes;
use kvblob_core::error::{KvBlobError, Result};
use kvblob_core::BlobMetadata;
use kvblob_storage::TransactionalStore;
use std::io::Read;
use std::sync::Arc;

/// `BlobStore` for use from async code
pub struct AsyncBlobStore<S> {
    inner: Arc<BlobStore<S>>,
}

impl<S> Clone for AsyncBlobStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: TransactionalStore + 'static> AsyncBlobStore<S> {
    pub fn new(store: BlobStore<S>) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    pub fn from_arc(inner: Arc<BlobStore<S>>) -> Self {
        Self { inner }
    }

    /// The wrapped synchronous store
    pub fn blocking(&self) -> &Arc<BlobStore<S>> {
        &self.inner
    }

    pub async fn put(&self, name: impl Into<String>, source: ChunkSource) -> Result<WriteReport> {
        let name = name.into();
        self.spawn(move |store| store.put(&name, source)).await
    }

    pub async fn put_bytes(
        &self,
        name: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Result<WriteReport> {
        self.put(name, ChunkSource::buffer(data)).await
    }

    pub async fn put_reader(
        &self,
        name: impl Into<String>,
        reader: impl Read + Send + 'static,
    ) -> Result<WriteReport> {
        self.put(name, ChunkSource::stream(reader)).await
    }

    pub async fn get(&self, name: impl Into<String>) -> Result<Blob> {
        let name = name.into();
        self.spawn(move |store| store.get(&name)).await
    }

    pub async fn get_with(&self, name: impl Into<String>, options: ReadOptions) -> Result<Blob> {
        let name = name.into();
        self.spawn(move |store| store.get_with(&name, options)).await
    }

    pub async fn list(&self, prefix: impl Into<String>) -> Result<Vec<BlobMetadata>> {
        let prefix = prefix.into();
        self.spawn(move |store| store.list(&prefix)).await
    }

    pub async fn metadata(&self, name: impl Into<String>) -> Result<Option<BlobMetadata>> {
        let name = name.into();
        self.spawn(move |store| store.metadata(&name)).await
    }

    async fn spawn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&BlobStore<S>) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| KvBlobError::Internal(format!("Blocking task failed: {}", e)))?
    }
}
