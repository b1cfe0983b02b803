//! Shared helpers for shardload integration tests
//!
//! - tracing initialisation that writes through the test harness
//! - archive builders for gzip and zstd inputs
//! - [`FaultyStore`], a document store wrapper that fails on demand

#![allow(dead_code)]

use async_trait::async_trait;
use flate2::write::GzEncoder;
use shardload_common::{Result, ShardloadError};
use shardload_ingest::config::{ExtractConfig, LoadConfig};
use shardload_ingest::extract::manifest::{manifest_path, ArchiveManifest};
use shardload_ingest::extract::ShardInfo;
use shardload_ingest::load::{Document, DocumentStore, MemoryDocumentStore};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("shardload_ingest=debug")
            .with_test_writer()
            .try_init();
    });
}

pub fn write_gz(path: &Path, content: &[u8]) {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(content).unwrap();
    std::fs::write(path, encoder.finish().unwrap()).unwrap();
}

pub fn write_zst(path: &Path, content: &[u8]) {
    std::fs::write(path, zstd::encode_all(content, 3).unwrap()).unwrap();
}

pub fn extract_config(workers: usize, batch_size: usize, shard_max_bytes: u64) -> ExtractConfig {
    ExtractConfig {
        workers,
        batch_size,
        queue_capacity: 16,
        shard_max_bytes,
        fields: None,
    }
}

pub fn load_config(batch_size: usize, max_retries: u32) -> LoadConfig {
    LoadConfig {
        batch_size,
        max_retries,
        retry_base_delay_ms: 1,
        ..LoadConfig::default()
    }
}

/// Write a shard with columns `id,body` and `rows` data rows, listed in a
/// manifest as the sole output of an archive named after the file
pub fn write_shard(path: &Path, rows: usize) {
    write_unlisted_shard(path, rows);
    let name = path.file_name().unwrap().to_str().unwrap();
    let base = name.trim_end_matches(".csv");
    let manifest = ArchiveManifest {
        archive: format!("{}.gz", base),
        compression: "gzip".into(),
        lines_read: rows as u64,
        rows_written: rows as u64,
        lines_skipped: 0,
        schema: vec!["id".into(), "body".into()],
        shards: vec![ShardInfo {
            file_name: name.to_string(),
            rows: rows as u64,
            bytes: std::fs::metadata(path).unwrap().len(),
            header: vec!["id".into(), "body".into()],
        }],
    };
    manifest.write(&manifest_path(path.parent().unwrap(), base)).unwrap();
}

/// Write a shard with no manifest, as an interrupted extraction leaves it
pub fn write_unlisted_shard(path: &Path, rows: usize) {
    let mut content = String::from("id,body\n");
    for i in 0..rows {
        content.push_str(&format!("{},\"row, {}\"\n", i, i));
    }
    std::fs::write(path, content).unwrap();
}

/// How a [`FaultyStore`] misbehaves once its fault triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reject the insert without writing anything
    BeforeCommit,
    /// Write the batch, then report failure (a crash before the checkpoint)
    AfterCommit,
}

/// Wraps a [`MemoryDocumentStore`] and fails insert calls from number
/// `fail_from` (1-based) onwards, `fail_count` times
pub struct FaultyStore {
    pub inner: Arc<MemoryDocumentStore>,
    fault: Fault,
    fail_from: usize,
    fail_count: usize,
    calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryDocumentStore>, fault: Fault, fail_from: usize, fail_count: usize) -> Self {
        Self {
            inner,
            fault,
            fail_from,
            fail_count,
            calls: AtomicUsize::new(0),
        }
    }

    /// A store that never fails but counts calls
    pub fn healthy(inner: Arc<MemoryDocumentStore>) -> Self {
        Self::new(inner, Fault::BeforeCommit, usize::MAX, 0)
    }

    pub fn insert_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    fn kind(&self) -> &'static str {
        "faulty"
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        self.inner.ensure_collection(collection).await
    }

    async fn insert_batch(&self, collection: &str, documents: &[Document]) -> Result<u64> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let failing = call >= self.fail_from && call - self.fail_from < self.fail_count;
        if !failing {
            return self.inner.insert_batch(collection, documents).await;
        }

        if self.fault == Fault::AfterCommit {
            self.inner.insert_batch(collection, documents).await?;
        }
        Err(ShardloadError::Store(format!("injected failure on call {}", call)))
    }
}
