//! Checkpointed bulk loader
//!
//! Loads shards one at a time, in path order. Only shards listed in an
//! extraction manifest are considered, so output of an unfinished extraction is
//! never loaded. Per shard:
//!
//! ```text
//! PENDING ──> RESUMING (rows_processed > 0) ──> STREAMING ──> COMPLETED
//!    │                                              │
//!    └──> COMPLETED (already done, skipped)         └──> FAILED
//! ```
//!
//! Checkpoints are keyed by shard file name. The first `rows_processed` data
//! rows recorded in the checkpoint are skipped.
//! Remaining rows become documents and are inserted in batches; after every
//! committed batch the checkpoint is saved with the cumulative row count before
//! the next batch is read. Malformed rows count toward `rows_processed` but are
//! never inserted.

use anyhow::{bail, Context, Result};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::checkpoint::CheckpointStore;
use super::reader::{ShardReader, ShardRow};
use super::store::{validate_collection_name, Document, DocumentStore};
use crate::config::LoadConfig;
use crate::extract::manifest::{is_manifest, ArchiveManifest};
use crate::progress::create_row_counter;
use crate::skip_log::SkipLog;

/// Collection for comment shards (`RC_*`)
pub const COMMENTS_COLLECTION: &str = "comments";
/// Collection for submission shards (`RS_*`)
pub const SUBMISSIONS_COLLECTION: &str = "submissions";

/// Per-shard loader state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Pending,
    Resuming,
    Streaming,
    Completed,
    Failed,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Pending => "pending",
            LoadState::Resuming => "resuming",
            LoadState::Streaming => "streaming",
            LoadState::Completed => "completed",
            LoadState::Failed => "failed",
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardOutcome {
    Loaded,
    /// Marked completed by an earlier run
    AlreadyCompleted,
    Failed(String),
}

/// Result of loading one shard
#[derive(Debug, Clone)]
pub struct ShardReport {
    pub shard: PathBuf,
    pub collection: String,
    pub outcome: ShardOutcome,
    /// Offset the run resumed from
    pub resumed_from: u64,
    /// Cumulative data rows accounted for, including earlier runs
    pub rows_processed: u64,
    /// Documents newly inserted by this run
    pub rows_inserted: u64,
    /// Malformed rows and NUL-bearing lines skipped by this run
    pub rows_skipped: u64,
}

impl ShardReport {
    fn new(shard: &Path, collection: String) -> Self {
        Self {
            shard: shard.to_path_buf(),
            collection,
            outcome: ShardOutcome::Loaded,
            resumed_from: 0,
            rows_processed: 0,
            rows_inserted: 0,
            rows_skipped: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, ShardOutcome::Failed(_))
    }
}

/// Shards listed by the extraction manifests in `dir`, sorted by path
///
/// A CSV file that no manifest lists belongs to an archive whose extraction
/// never finished and may still be rewritten, so it is skipped with a warning.
pub fn discover_shards(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read shard directory {}", dir.display()))?;

    let mut listed = BTreeSet::new();
    let mut csv_files = Vec::new();
    for entry in entries {
        let path = entry.with_context(|| format!("Failed to list {}", dir.display()))?.path();
        if !path.is_file() {
            continue;
        }
        if is_manifest(&path) {
            match ArchiveManifest::load(&path) {
                Ok(Some(manifest)) => {
                    listed.extend(manifest.shards.into_iter().map(|s| dir.join(s.file_name)));
                },
                Ok(None) => {},
                Err(e) => {
                    warn!(manifest = %path.display(), error = %format!("{:#}", e), "Unreadable manifest, its shards are skipped");
                },
            }
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
        {
            csv_files.push(path);
        }
    }

    for path in csv_files.iter().filter(|p| !listed.contains(*p)) {
        warn!(shard = %path.display(), "No extraction manifest lists this shard, skipping");
    }
    Ok(listed.into_iter().collect())
}

pub struct BulkLoader<S> {
    store: S,
    config: LoadConfig,
    checkpoint: CheckpointStore,
    skip_log: SkipLog,
    collection_override: Option<String>,
    show_progress: bool,
    ensured: HashSet<String>,
}

impl<S: DocumentStore> BulkLoader<S> {
    pub fn new(store: S, config: LoadConfig, checkpoint: CheckpointStore, skip_log: SkipLog) -> Self {
        Self {
            store,
            config,
            checkpoint,
            skip_log,
            collection_override: None,
            show_progress: false,
            ensured: HashSet::new(),
        }
    }

    /// Load every shard into `collection` instead of routing by name
    pub fn with_collection(mut self, collection: Option<String>) -> Result<Self> {
        if let Some(name) = &collection {
            validate_collection_name(name).context("Invalid --collection")?;
        }
        self.collection_override = collection;
        Ok(self)
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Target collection for a shard: `RC_*` comments, `RS_*` submissions, else the default
    pub fn collection_for(&self, shard: &Path) -> String {
        if let Some(name) = &self.collection_override {
            return name.clone();
        }
        let file_name = shard.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if file_name.starts_with("RC_") {
            COMMENTS_COLLECTION.to_string()
        } else if file_name.starts_with("RS_") {
            SUBMISSIONS_COLLECTION.to_string()
        } else {
            self.config.default_collection.clone()
        }
    }

    /// Load every shard in `shard_dir`; a failing shard does not stop the rest
    pub async fn run(&mut self, shard_dir: &Path) -> Result<Vec<ShardReport>> {
        let shards = discover_shards(shard_dir)?;
        info!(
            shard_dir = %shard_dir.display(),
            shards = shards.len(),
            store = self.store.kind(),
            batch_size = self.config.batch_size,
            "Starting load"
        );

        let mut reports = Vec::with_capacity(shards.len());
        for shard in &shards {
            let collection = self.collection_for(shard);
            let report = match self.load_shard(shard, &collection).await {
                Ok(report) => report,
                Err(e) => {
                    let message = format!("{:#}", e);
                    error!(shard = %shard.display(), state = %LoadState::Failed, error = %message, "Shard load failed");
                    let mut report = ShardReport::new(shard, collection);
                    report.rows_processed = self.checkpoint.resume_offset(&file_id(shard));
                    report.outcome = ShardOutcome::Failed(message);
                    report
                },
            };
            reports.push(report);
        }
        Ok(reports)
    }

    /// Load one shard into `collection`
    pub async fn load_shard(&mut self, shard: &Path, collection: &str) -> Result<ShardReport> {
        let started = Instant::now();
        let file_id = file_id(shard);
        let mut report = ShardReport::new(shard, collection.to_string());
        debug!(shard = %file_id, state = %LoadState::Pending, collection, "Queued shard");

        if self.checkpoint.is_completed(&file_id) {
            info!(shard = %file_id, state = %LoadState::Completed, "Already loaded, skipping");
            report.outcome = ShardOutcome::AlreadyCompleted;
            report.rows_processed = self.checkpoint.resume_offset(&file_id);
            report.resumed_from = report.rows_processed;
            return Ok(report);
        }

        let mut reader = ShardReader::open(shard)?;
        let resume_offset = self.checkpoint.resume_offset(&file_id);
        if resume_offset > 0 {
            info!(shard = %file_id, state = %LoadState::Resuming, offset = resume_offset, "Resuming shard");
            let skipped = reader.skip_rows(resume_offset)?;
            if skipped < resume_offset {
                bail!(
                    "Shard {} has {} data rows but the checkpoint records {}",
                    file_id,
                    skipped,
                    resume_offset
                );
            }
        }
        report.resumed_from = resume_offset;

        self.ensure_collection(collection).await?;

        info!(shard = %file_id, state = %LoadState::Streaming, collection, "Streaming shard");
        let progress = create_row_counter(&file_id, self.show_progress);
        progress.set_position(resume_offset);

        let header = reader.header().to_vec();
        let dropped_before = reader.dropped_lines();
        let batch_size = self.config.batch_size;
        let mut rows_processed = resume_offset;
        let mut malformed = 0u64;
        let mut batch: Vec<Document> = Vec::with_capacity(batch_size);

        while let Some(row) = reader.next_row()? {
            match row {
                ShardRow::Row(record) => {
                    batch.push(Document::from_row(&file_id, rows_processed, &header, record.iter()));
                },
                ShardRow::Malformed { line, reason } => {
                    malformed += 1;
                    warn!(shard = %file_id, line, reason = %reason, "Skipping malformed row");
                },
            }
            rows_processed += 1;
            progress.inc(1);

            if batch.len() >= batch_size {
                report.rows_inserted += self.commit_batch(&file_id, collection, &batch, rows_processed, false).await?;
                batch.clear();
            }
        }

        report.rows_inserted += self.commit_batch(&file_id, collection, &batch, rows_processed, true).await?;
        progress.finish_and_clear();

        report.rows_processed = rows_processed;
        report.rows_skipped = malformed + (reader.dropped_lines() - dropped_before);
        self.skip_log.record(&file_id, report.rows_skipped);

        info!(
            shard = %file_id,
            state = %LoadState::Completed,
            collection,
            rows_processed,
            inserted = report.rows_inserted,
            skipped = report.rows_skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Shard loaded"
        );
        Ok(report)
    }

    async fn ensure_collection(&mut self, collection: &str) -> Result<()> {
        if self.ensured.contains(collection) {
            return Ok(());
        }
        self.store
            .ensure_collection(collection)
            .await
            .with_context(|| format!("Failed to prepare collection {}", collection))?;
        self.ensured.insert(collection.to_string());
        Ok(())
    }

    /// Insert `batch` (possibly empty) and then persist the checkpoint
    async fn commit_batch(
        &mut self,
        file_id: &str,
        collection: &str,
        batch: &[Document],
        rows_processed: u64,
        completed: bool,
    ) -> Result<u64> {
        let inserted = if batch.is_empty() {
            0
        } else {
            self.insert_with_retry(collection, batch)
                .await
                .with_context(|| format!("Bulk insert into {} failed for {}", collection, file_id))?
        };

        self.checkpoint
            .save(file_id, rows_processed, completed)
            .with_context(|| format!("Failed to save checkpoint for {}", file_id))?;

        debug!(shard = file_id, rows_processed, inserted, completed, "Checkpoint saved");
        Ok(inserted)
    }

    /// Insert with bounded exponential backoff on transient failures
    async fn insert_with_retry(
        &self,
        collection: &str,
        batch: &[Document],
    ) -> shardload_common::Result<u64> {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 1;
        loop {
            match self.store.insert_batch(collection, batch).await {
                Ok(inserted) => return Ok(inserted),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        collection,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Bulk insert failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }
}

/// Checkpoint key and row-identity source for a shard: its file name
///
/// Independent of how the shard directory was spelled on the command line.
fn file_id(shard: &Path) -> String {
    shard
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| shard.display().to_string())
}
