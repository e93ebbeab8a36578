//! Chunk sources
//!
//! A `ChunkSource` turns a byte payload into a sequence of bounded chunks
//! while folding every byte into a running SHA-256. Two inputs are supported:
//! an in-memory buffer of known length, sliced without copying, and a
//! `Read` stream of unknown length, filled one chunk at a time.
//!
//! The stream is owned by the source. It is dropped as soon as end of input
//! or a read failure is observed, and otherwise when the source itself is
//! dropped.

use bytes::Bytes;
use kvblob_core::error::{KvBlobError, Result};
use kvblob_core::{BlobHasher, ContentHash, DEFAULT_CHUNK_SIZE};
use std::fmt;
use std::io::{self, Read};
use tracing::warn;

/// One chunk produced by a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceChunk {
    /// Byte offset of the chunk within the blob
    pub offset: u64,

    /// Chunk payload, never empty
    pub data: Bytes,
}

/// What an exhausted source observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSummary {
    pub size: u64,
    pub chunk_count: u64,
    pub hash: ContentHash,
}

enum Input {
    Buffer(Bytes),
    Stream(Box<dyn Read + Send>),
}

enum State {
    Reading(BlobHasher),
    Exhausted(SourceSummary),
    Failed,
}

/// Byte payload split into chunks of at most `chunk_max_size` bytes
pub struct ChunkSource {
    /// `None` once the input has been released
    input: Option<Input>,
    chunk_max_size: usize,
    offset: u64,
    chunk_count: u64,
    state: State,
}

impl ChunkSource {
    fn new(input: Input) -> Self {
        Self {
            input: Some(input),
            chunk_max_size: DEFAULT_CHUNK_SIZE,
            offset: 0,
            chunk_count: 0,
            state: State::Reading(BlobHasher::new()),
        }
    }

    /// Source over an in-memory buffer
    pub fn buffer(data: impl Into<Bytes>) -> Self {
        Self::new(Input::Buffer(data.into()))
    }

    /// Source over a byte stream of unknown length
    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        Self::new(Input::Stream(Box::new(reader)))
    }

    /// Set the chunk ceiling. The writer applies its configured ceiling
    /// before pulling the first chunk.
    pub fn with_chunk_max_size(mut self, chunk_max_size: usize) -> Self {
        self.chunk_max_size = chunk_max_size.max(1);
        self
    }

    pub fn chunk_max_size(&self) -> usize {
        self.chunk_max_size
    }

    /// Bytes produced so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Chunks produced so far
    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    /// Total length, when known up front
    pub fn len_hint(&self) -> Option<u64> {
        match &self.input {
            Some(Input::Buffer(rest)) => Some(self.offset + rest.len() as u64),
            _ => None,
        }
    }

    /// Whether end of input has been observed
    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, State::Exhausted(_))
    }

    /// Whether a read has failed
    pub fn is_failed(&self) -> bool {
        matches!(self.state, State::Failed)
    }

    /// Pull the next chunk
    ///
    /// Returns `Ok(None)` once, at end of input; the content hash is
    /// finalized at that point. A read failure leaves the source failed and
    /// the hash unfinalized. Any call after either outcome is
    /// `SourceExhausted`.
    pub fn next_chunk(&mut self) -> Result<Option<SourceChunk>> {
        if !matches!(self.state, State::Reading(_)) {
            return Err(KvBlobError::SourceExhausted);
        }

        let read = match self.input.as_mut() {
            Some(Input::Buffer(rest)) => {
                let len = rest.len().min(self.chunk_max_size);
                Ok(rest.split_to(len))
            }
            Some(Input::Stream(reader)) => fill_chunk(&mut **reader, self.chunk_max_size),
            None => Ok(Bytes::new()),
        };

        let data = match read {
            Ok(data) => data,
            Err(err) => {
                warn!(offset = self.offset, error = %err, "Chunk source read failed");
                self.input = None;
                self.state = State::Failed;
                return Err(KvBlobError::SourceRead(err));
            }
        };

        if data.is_empty() {
            self.finish();
            return Ok(None);
        }

        if let State::Reading(hasher) = &mut self.state {
            hasher.update(&data);
        }
        let chunk = SourceChunk {
            offset: self.offset,
            data,
        };
        self.offset += chunk.data.len() as u64;
        self.chunk_count += 1;
        Ok(Some(chunk))
    }

    /// Size, chunk count and hash, available once the source is exhausted
    pub fn summary(&self) -> Option<SourceSummary> {
        match &self.state {
            State::Exhausted(summary) => Some(*summary),
            _ => None,
        }
    }

    fn finish(&mut self) {
        self.input = None;
        if let State::Reading(hasher) = std::mem::replace(&mut self.state, State::Failed) {
            self.state = State::Exhausted(SourceSummary {
                size: self.offset,
                chunk_count: self.chunk_count,
                hash: hasher.finalize(),
            });
        }
    }
}

/// Read until `max` bytes are collected or the stream ends
fn fill_chunk(reader: &mut (dyn Read + Send), max: usize) -> io::Result<Bytes> {
    let mut buf = Vec::with_capacity(max);
    reader.take(max as u64).read_to_end(&mut buf)?;
    Ok(Bytes::from(buf))
}

impl From<Bytes> for ChunkSource {
    fn from(data: Bytes) -> Self {
        Self::buffer(data)
    }
}

impl From<Vec<u8>> for ChunkSource {
    fn from(data: Vec<u8>) -> Self {
        Self::buffer(data)
    }
}

impl fmt::Debug for ChunkSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.input {
            Some(Input::Buffer(_)) => "buffer",
            Some(Input::Stream(_)) => "stream",
            None => "released",
        };
        let state = match &self.state {
            State::Reading(_) => "reading",
            State::Exhausted(_) => "exhausted",
            State::Failed => "failed",
        };
        f.debug_struct("ChunkSource")
            .field("input", &kind)
            .field("state", &state)
            .field("chunk_max_size", &self.chunk_max_size)
            .field("offset", &self.offset)
            .field("chunk_count", &self.chunk_count)
            .finish()
    }
}
