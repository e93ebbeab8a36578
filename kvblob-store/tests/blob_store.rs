//! Blob store integration tests
//!
//! Exercises put, get and list end to end on the in-memory substrate.
//!
//! Run with: cargo test --package kvblob-store --test blob_store

use kvblob_core::{ContentHash, KvBlobError, SubstrateLimits};
use kvblob_storage::{MemoryStore, TransactionalStore};
use kvblob_store::{BlobStore, BlobStoreConfig, ChunkSource, ReadOptions};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CHUNK: usize = 100;

/// Generate test data of specified size
fn generate_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

const BUDGET: u64 = 300;

/// Small chunks and a budget of two chunks, keys included, per transaction
fn small_config() -> BlobStoreConfig {
    BlobStoreConfig::default()
        .with_chunk_max_size(CHUNK)
        .with_tx_byte_budget(BUDGET)
}

fn small_store() -> BlobStore<MemoryStore> {
    BlobStore::new(MemoryStore::new(), small_config()).unwrap()
}

/// Chunk keys and lengths stored under `name`, in key order
fn stored_chunks<S: TransactionalStore>(blobs: &BlobStore<S>, name: &str) -> Vec<(u64, usize)> {
    let prefix = blobs.keys().data_prefix(name);
    blobs
        .substrate()
        .read_snapshot(|snap| {
            let mut chunks = Vec::new();
            snap.scan_prefix(&prefix, &mut |key, value| {
                let (_, offset) = blobs.keys().decode_data_key(key)?;
                chunks.push((offset, value.len()));
                Ok(())
            })?;
            Ok(chunks)
        })
        .unwrap()
}

/// Yields `good` bytes, then fails
struct FailingReader {
    good: usize,
    pos: usize,
    released: Arc<AtomicBool>,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.good {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "disk went away"));
        }
        let n = buf.len().min(self.good - self.pos);
        buf[..n].fill(3);
        self.pos += n;
        Ok(n)
    }
}

impl Drop for FailingReader {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Yields `remaining` bytes, at most one chunk per read, pausing before
/// every read
struct SlowReader {
    remaining: usize,
    pause: Duration,
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        std::thread::sleep(self.pause);
        let n = buf.len().min(self.remaining).min(CHUNK);
        buf[..n].fill(5);
        self.remaining -= n;
        Ok(n)
    }
}

#[test]
fn test_empty_blob() {
    let blobs = small_store();
    blobs.put_bytes("a", Vec::<u8>::new()).unwrap();

    let listed = blobs.list("").unwrap();
    assert_eq!(listed.len(), 1);
    let meta = &listed[0];
    assert_eq!(meta.name, "a");
    assert!(meta.valid);
    assert_eq!(meta.size, 0);
    assert_eq!(meta.chunk_count, 0);
    assert_eq!(meta.hash, Some(ContentHash::compute(b"")));

    let blob = blobs.get("a").unwrap();
    assert!(blob.data.is_empty());
    assert!(stored_chunks(&blobs, "a").is_empty());
}

#[test]
fn test_two_chunk_blob() {
    let blobs = small_store();
    let data = generate_data(2 * CHUNK);
    blobs.put_bytes("dir/x", data.clone()).unwrap();

    assert_eq!(
        stored_chunks(&blobs, "dir/x"),
        vec![(0, CHUNK), (CHUNK as u64, CHUNK)]
    );
    assert_eq!(blobs.get("dir/x").unwrap().data.as_ref(), data.as_slice());
}

#[test]
fn test_chunk_counts() {
    let blobs = small_store();
    for size in [1, CHUNK - 1, CHUNK, CHUNK + 1, 2 * CHUNK, 5 * CHUNK + 3] {
        let name = format!("size/{}", size);
        let report = blobs.put_bytes(&name, generate_data(size)).unwrap();

        let expected = size.div_ceil(CHUNK);
        assert_eq!(report.metadata.chunk_count, expected as u64);

        let chunks = stored_chunks(&blobs, &name);
        assert_eq!(chunks.len(), expected);
        let (last, full) = chunks.split_last().unwrap();
        assert!(full.iter().all(|&(_, len)| len == CHUNK));
        assert_eq!(last.1, size - (expected - 1) * CHUNK);
    }
}

#[test]
fn test_hash_independent_of_batching() {
    let data = generate_data(3_333);
    let expected = ContentHash::compute(&data);

    for budget in [101, 250, 1_000, 9_000_000] {
        let config = small_config().with_tx_byte_budget(budget);
        let blobs = BlobStore::new(MemoryStore::new(), config).unwrap();
        let report = blobs.put_bytes("h", data.clone()).unwrap();
        assert_eq!(report.metadata.hash, Some(expected));
        assert_eq!(blobs.get("h").unwrap().data.as_ref(), data.as_slice());
    }
}

#[test]
fn test_list_by_prefix() {
    let blobs = small_store();
    blobs.put_bytes("dir/x", generate_data(10)).unwrap();
    blobs.put_bytes("other/y", generate_data(10)).unwrap();

    let names: Vec<String> = blobs
        .list("dir/")
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, vec!["dir/x"]);
    assert_eq!(blobs.list_all().unwrap().len(), 2);
}

#[test]
fn test_name_is_not_a_chunk_prefix_of_longer_name() {
    let blobs = small_store();
    blobs.put_bytes("a", generate_data(150)).unwrap();
    blobs.put_bytes("ab", generate_data(450)).unwrap();

    assert_eq!(stored_chunks(&blobs, "a").len(), 2);
    assert_eq!(blobs.get("a").unwrap().data.len(), 150);
    assert_eq!(blobs.get("ab").unwrap().data.len(), 450);
}

#[test]
fn test_transaction_budget_conformance() {
    let blobs = small_store();
    blobs.put_bytes("budget", generate_data(2_050)).unwrap();

    let log = blobs.substrate().commit_log();
    // invalid record, 11 two-chunk batches, valid record
    assert_eq!(log.len(), 13);
    for record in &log {
        assert!(record.mutated_bytes < BUDGET);
    }
}

#[test]
fn test_budget_at_substrate_ceiling() {
    let limits = SubstrateLimits::default();
    let config = BlobStoreConfig::default().with_tx_byte_budget(limits.max_tx_bytes);
    let blobs = BlobStore::new(MemoryStore::new(), config).unwrap();

    let report = blobs.put_bytes("big", vec![7u8; 10_000_000]).unwrap();
    assert_eq!(report.metadata.size, 10_000_000);
    assert!(report.transactions > 1);
    for record in blobs.substrate().commit_log() {
        assert!(record.mutated_bytes <= limits.max_tx_bytes);
    }

    let blob = blobs.get("big").unwrap();
    assert_eq!(blob.data.len(), 10_000_000);
    assert!(blob.data.iter().all(|&b| b == 7));
}

#[test]
fn test_batches_close_on_time_budget() {
    let config = small_config()
        .with_tx_byte_budget(1_000_000)
        .with_tx_time_budget(Duration::from_millis(20));
    let blobs = BlobStore::new(MemoryStore::new(), config).unwrap();
    let reader = SlowReader {
        remaining: 30 * CHUNK,
        pause: Duration::from_millis(5),
    };

    let report = blobs.put_reader("slow", reader).unwrap();
    assert!(report.transactions > 1);
    for record in blobs.substrate().commit_log() {
        assert!(record.value_bytes < 1_000_000);
        // Four 5 ms reads use up the 20 ms budget
        assert!(record.keys_written <= 4);
    }
    assert_eq!(
        blobs.get("slow").unwrap().data.as_ref(),
        vec![5u8; 30 * CHUNK].as_slice()
    );
}

#[test]
fn test_failed_source_leaves_blob_invalid() {
    let blobs = small_store();
    let released = Arc::new(AtomicBool::new(false));
    let reader = FailingReader {
        good: 3 * CHUNK,
        pos: 0,
        released: released.clone(),
    };

    let result = blobs.put_reader("broken", reader);
    assert!(matches!(result, Err(KvBlobError::SourceRead(_))));
    assert!(released.load(Ordering::SeqCst));

    assert!(matches!(
        blobs.get("broken"),
        Err(KvBlobError::Incomplete(_))
    ));
    let meta = blobs.metadata("broken").unwrap().unwrap();
    assert!(!meta.valid);
    assert!(meta.hash.is_none());

    // The first batch committed, the batch being filled at failure did not
    assert_eq!(stored_chunks(&blobs, "broken").len(), 2);
}

#[test]
fn test_retry_after_failed_put() {
    let blobs = small_store();
    let reader = FailingReader {
        good: 150,
        pos: 0,
        released: Arc::new(AtomicBool::new(false)),
    };
    assert!(blobs.put_reader("again", reader).is_err());

    let data = generate_data(120);
    blobs.put_bytes("again", data.clone()).unwrap();
    assert_eq!(blobs.get("again").unwrap().data.as_ref(), data.as_slice());
}

#[test]
fn test_conflicts_do_not_change_content() {
    let blobs = small_store();
    let data = generate_data(1_000);

    blobs.substrate().inject_conflicts(7);
    let report = blobs.put_bytes("replayed", data.clone()).unwrap();

    assert_eq!(blobs.stats().conflicts, 7);
    assert_eq!(report.metadata.hash, Some(ContentHash::compute(&data)));
    assert_eq!(report.metadata.size, 1_000);
    assert_eq!(blobs.get("replayed").unwrap().data.as_ref(), data.as_slice());
    assert_eq!(stored_chunks(&blobs, "replayed").len(), 10);
}

#[test]
fn test_shorter_overwrite_leaves_no_stale_chunks() {
    let blobs = small_store();
    blobs.put_bytes("o", generate_data(1_000)).unwrap();
    assert_eq!(stored_chunks(&blobs, "o").len(), 10);

    let data = vec![42u8; 150];
    blobs.put_bytes("o", data.clone()).unwrap();
    assert_eq!(stored_chunks(&blobs, "o"), vec![(0, 100), (100, 50)]);

    let blob = blobs.get("o").unwrap();
    assert_eq!(blob.data.as_ref(), data.as_slice());
    assert_eq!(blob.metadata.size, 150);
}

#[test]
fn test_overwrite_cleanup_larger_than_one_transaction() {
    let limits = SubstrateLimits {
        max_value_size: 512,
        max_tx_bytes: 1_000,
        max_tx_duration: Duration::from_secs(5),
    };
    let config = small_config().with_tx_byte_budget(1_000);
    let blobs = BlobStore::new(MemoryStore::with_limits(limits), config).unwrap();

    // 200 chunk keys of about 19 bytes each cannot be cleared in one 1 KB transaction
    blobs.put_bytes("o", generate_data(200 * CHUNK)).unwrap();
    assert_eq!(stored_chunks(&blobs, "o").len(), 200);
    let commits_before = blobs.substrate().commit_log().len();

    let data = vec![42u8; 150];
    blobs.put_bytes("o", data.clone()).unwrap();
    assert_eq!(stored_chunks(&blobs, "o"), vec![(0, 100), (100, 50)]);
    assert_eq!(blobs.get("o").unwrap().data.as_ref(), data.as_slice());

    let overwrite = &blobs.substrate().commit_log()[commits_before..];
    let cleanup_only = overwrite.iter().filter(|r| r.keys_written == 0).count();
    assert!(cleanup_only >= 2);
    for record in overwrite {
        assert!(record.mutated_bytes <= limits.max_tx_bytes);
    }
}

#[test]
fn test_stream_source_roundtrip() {
    let blobs = small_store();
    let data = generate_data(777);
    let report = blobs
        .put("stream", ChunkSource::stream(io::Cursor::new(data.clone())))
        .unwrap();
    assert_eq!(report.metadata.chunk_count, 8);

    let mut out = Vec::new();
    blobs
        .get_into("stream", &mut out, ReadOptions::default())
        .unwrap();
    assert_eq!(out, data);
}

#[test]
fn test_readers_never_see_truncated_valid_blob() {
    let blobs = BlobStore::new(
        MemoryStore::new(),
        BlobStoreConfig::default()
            .with_chunk_max_size(1_000)
            .with_tx_byte_budget(5_000),
    )
    .unwrap();
    let old = vec![1u8; 50_000];
    let new = vec![2u8; 80_000];
    blobs.put_bytes("live", old.clone()).unwrap();

    let done = AtomicBool::new(false);
    std::thread::scope(|s| {
        s.spawn(|| {
            blobs.put_bytes("live", new.clone()).unwrap();
            done.store(true, Ordering::SeqCst);
        });
        s.spawn(|| {
            while !done.load(Ordering::SeqCst) {
                match blobs.get("live") {
                    Ok(blob) => assert!(blob.data == old || blob.data == new),
                    Err(KvBlobError::Incomplete(_)) => {}
                    Err(err) => panic!("unexpected error: {}", err),
                }
                for meta in blobs.list("live").unwrap() {
                    if meta.valid {
                        assert!(meta.size == 50_000 || meta.size == 80_000);
                    }
                }
            }
        });
    });

    assert_eq!(blobs.get("live").unwrap().data.as_ref(), new.as_slice());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..2_000)) {
        let blobs = small_store();
        blobs.put_bytes("p", data.clone()).unwrap();
        let blob = blobs.get("p").unwrap();
        prop_assert_eq!(blob.data.as_ref(), data.as_slice());
        prop_assert_eq!(blob.metadata.chunk_count as usize, data.len().div_ceil(CHUNK));
    }

    #[test]
    fn prop_list_matches_prefix(
        names in proptest::collection::btree_set("[ab/]{1,5}", 1..12),
        prefix in "[ab/]{0,3}",
    ) {
        let blobs = small_store();
        for name in &names {
            blobs.put_bytes(name, name.as_bytes().to_vec()).unwrap();
        }

        let listed: BTreeSet<String> = blobs
            .list(&prefix)
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        let expected: BTreeSet<String> = names
            .iter()
            .filter(|name| name.starts_with(prefix.as_str()))
            .cloned()
            .collect();
        prop_assert_eq!(listed, expected);
    }
}
