//! Extraction pipeline
//!
//! Archive -> decompressor -> bounded line queue -> parse workers ->
//! coordinator -> shard writer.
//!
//! The decompressor runs on the calling thread and is the single producer of
//! the line queue. A fixed pool of parse workers decodes lines and batches the
//! resulting records. Full batches travel as [`FlushRequest`]s to one
//! coordinator thread, which owns the archive's [`SchemaUnion`] and
//! [`ShardWriter`]. Schema merges and shard writes therefore happen on a single
//! thread with no shared mutable state between workers.
//!
//! Shutdown is by channel closure: the producer drops its sender at end of
//! input, each worker flushes its remainder and exits once the queue is drained,
//! and the coordinator exits once every worker has dropped its sender. All of
//! them are joined before an archive counts as finished.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use indexmap::IndexSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::decompress::{archive_base, open_archive, Compression};
use super::manifest::{is_manifest, manifest_path, ArchiveManifest};
use super::record::RawRecord;
use super::schema::SchemaUnion;
use super::shard::{remove_stale_shards, ShardInfo, ShardWriter};
use crate::config::ExtractConfig;
use crate::progress::create_archive_progress;
use crate::skip_log::SkipLog;

/// One worker's batch, handed to the coordinator as a single flush
#[derive(Debug)]
pub struct FlushRequest {
    pub worker: usize,
    pub records: Vec<RawRecord>,
}

/// Per-worker line counts
#[derive(Debug, Default, Clone, Copy)]
struct WorkerStats {
    parsed: u64,
    skipped: u64,
}

/// What happened to one archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveStatus {
    Extracted,
    /// A manifest from an earlier run exists
    AlreadyExtracted,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ArchiveReport {
    pub archive: PathBuf,
    pub status: ArchiveStatus,
    pub lines_read: u64,
    pub rows_written: u64,
    pub lines_skipped: u64,
    pub shards: Vec<ShardInfo>,
}

impl ArchiveReport {
    fn from_manifest(archive: &Path, status: ArchiveStatus, manifest: ArchiveManifest) -> Self {
        Self {
            archive: archive.to_path_buf(),
            status,
            lines_read: manifest.lines_read,
            rows_written: manifest.rows_written,
            lines_skipped: manifest.lines_skipped,
            shards: manifest.shards,
        }
    }

    fn failed(archive: &Path, error: &anyhow::Error) -> Self {
        Self {
            archive: archive.to_path_buf(),
            status: ArchiveStatus::Failed(format!("{:#}", error)),
            lines_read: 0,
            rows_written: 0,
            lines_skipped: 0,
            shards: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, ArchiveStatus::Failed(_))
    }
}

/// Owns the per-archive schema and shard writer; the only thread that touches either
struct ArchiveCoordinator {
    schema: SchemaUnion,
    writer: ShardWriter,
    flushes: u64,
}

impl ArchiveCoordinator {
    fn run(mut self, requests: Receiver<FlushRequest>) -> Result<Self> {
        for request in requests {
            self.handle(request)?;
        }
        Ok(self)
    }

    fn handle(&mut self, request: FlushRequest) -> Result<()> {
        let mut added = 0;
        for record in &request.records {
            added += self.schema.merge_record(record);
        }
        if added > 0 {
            debug!(worker = request.worker, added, columns = self.schema.len(), "Schema widened");
        }

        self.writer.flush(&request.records, &self.schema)?;
        self.flushes += 1;
        debug!(
            worker = request.worker,
            records = request.records.len(),
            flushes = self.flushes,
            "Flushed batch"
        );
        Ok(())
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Parse worker loop: decode lines until the queue closes, flushing every `batch_size` records
fn parse_worker(
    worker: usize,
    lines: Receiver<Vec<u8>>,
    flushes: Sender<FlushRequest>,
    batch_size: usize,
    projection: Option<&IndexSet<String>>,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    let mut batch = Vec::with_capacity(batch_size);

    for line in lines {
        match RawRecord::decode(&line) {
            Ok(record) => {
                stats.parsed += 1;
                batch.push(match projection {
                    Some(keep) => record.project(keep),
                    None => record,
                });
            },
            Err(e) => {
                stats.skipped += 1;
                debug!(worker, error = %e, "Skipping malformed line");
                continue;
            },
        }

        if batch.len() >= batch_size {
            let records = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            if flushes.send(FlushRequest { worker, records }).is_err() {
                // Coordinator is gone; its error is reported by the caller
                return stats;
            }
        }
    }

    if !batch.is_empty() && flushes.send(FlushRequest { worker, records: batch }).is_err() {
        // Coordinator is gone; its error is reported by the caller
        debug!(worker, "Coordinator closed before the final flush");
    }
    stats
}

/// Runs the extraction stage over a directory of archives
pub struct ExtractPipeline {
    config: ExtractConfig,
    output_dir: PathBuf,
    skip_log: SkipLog,
    show_progress: bool,
}

impl ExtractPipeline {
    pub fn new(
        config: ExtractConfig,
        output_dir: impl Into<PathBuf>,
        skip_log: SkipLog,
        show_progress: bool,
    ) -> Self {
        Self { config, output_dir: output_dir.into(), skip_log, show_progress }
    }

    /// Archives in `input_dir`, sorted by file name
    pub fn discover_archives(input_dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(input_dir)
            .with_context(|| format!("Failed to read input directory {}", input_dir.display()))?;

        let mut archives = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("Failed to list {}", input_dir.display()))?
                .path();
            if path.is_file() && !is_manifest(&path) && Compression::from_path(&path).is_some() {
                archives.push(path);
            }
        }
        archives.sort();
        Ok(archives)
    }

    /// Extract every archive in `input_dir`
    ///
    /// A failing archive is reported and does not stop the others.
    pub fn run(&self, input_dir: &Path) -> Result<Vec<ArchiveReport>> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("Failed to create output directory {}", self.output_dir.display())
        })?;

        let archives = Self::discover_archives(input_dir)?;
        info!(
            input = %input_dir.display(),
            output = %self.output_dir.display(),
            archives = archives.len(),
            workers = self.config.workers,
            "Starting extraction"
        );

        let mut reports = Vec::with_capacity(archives.len());
        for archive in &archives {
            let report = match self.process_archive(archive) {
                Ok(report) => report,
                Err(e) => {
                    error!(archive = %archive.display(), error = %format!("{:#}", e), "Archive failed");
                    ArchiveReport::failed(archive, &e)
                },
            };
            reports.push(report);
        }
        Ok(reports)
    }

    /// Extract one archive unless a manifest says it is already done
    pub fn process_archive(&self, archive: &Path) -> Result<ArchiveReport> {
        let base = archive_base(archive)
            .with_context(|| format!("Cannot derive output name from {}", archive.display()))?;
        let manifest_file = manifest_path(&self.output_dir, &base);

        if let Some(manifest) = ArchiveManifest::load(&manifest_file)? {
            info!(archive = %archive.display(), "Already extracted, skipping");
            return Ok(ArchiveReport::from_manifest(
                archive,
                ArchiveStatus::AlreadyExtracted,
                manifest,
            ));
        }

        remove_stale_shards(&self.output_dir, &base)?;
        let manifest = self.extract_archive(archive, &base)?;
        manifest.write(&manifest_file)?;
        self.skip_log
            .record(&archive.display().to_string(), manifest.lines_skipped);

        Ok(ArchiveReport::from_manifest(archive, ArchiveStatus::Extracted, manifest))
    }

    fn extract_archive(&self, archive: &Path, base: &str) -> Result<ArchiveManifest> {
        let started = Instant::now();
        let compression = Compression::from_path(archive)
            .with_context(|| format!("Unrecognised archive extension: {}", archive.display()))?;

        let display_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| base.to_string());
        let progress = create_archive_progress(&display_name, self.show_progress);
        let lines = open_archive(archive, &progress)?;

        let projection: Option<IndexSet<String>> =
            self.config.fields.as_ref().map(|f| f.iter().cloned().collect());
        let schema = match &projection {
            Some(fields) => SchemaUnion::fixed(fields.iter().cloned()),
            None => SchemaUnion::new(),
        };
        let coordinator = ArchiveCoordinator {
            schema,
            writer: ShardWriter::new(&self.output_dir, base, self.config.shard_max_bytes),
            flushes: 0,
        };

        let (line_tx, line_rx) = bounded::<Vec<u8>>(self.config.queue_capacity);
        let (flush_tx, flush_rx) = bounded::<FlushRequest>(self.config.workers * 2);
        let batch_size = self.config.batch_size;

        let (lines_read, read_error, worker_stats, coordinator) = thread::scope(|s| {
            let coordinator = s.spawn(move || coordinator.run(flush_rx));

            let workers: Vec<_> = (0..self.config.workers)
                .map(|id| {
                    let lines = line_rx.clone();
                    let flushes = flush_tx.clone();
                    let projection = projection.as_ref();
                    s.spawn(move || parse_worker(id, lines, flushes, batch_size, projection))
                })
                .collect();
            drop(line_rx);
            drop(flush_tx);

            let mut lines_read = 0u64;
            let mut read_error = None;
            for line in lines {
                match line {
                    Ok(line) if is_blank(&line) => continue,
                    Ok(line) => {
                        lines_read += 1;
                        if line_tx.send(line).is_err() {
                            // Every worker has exited, which only happens when the coordinator failed
                            break;
                        }
                    },
                    Err(e) => {
                        read_error = Some(e);
                        break;
                    },
                }
            }
            drop(line_tx);

            let mut stats = WorkerStats::default();
            let mut panicked = false;
            for handle in workers {
                match handle.join() {
                    Ok(s) => {
                        stats.parsed += s.parsed;
                        stats.skipped += s.skipped;
                    },
                    Err(_) => panicked = true,
                }
            }
            let coordinator = match coordinator.join() {
                Ok(result) if !panicked => result,
                Ok(_) => Err(anyhow!("Parse worker panicked")),
                Err(_) => Err(anyhow!("Extraction coordinator panicked")),
            };
            (lines_read, read_error, stats, coordinator)
        });
        progress.finish_and_clear();

        let coordinator = coordinator
            .with_context(|| format!("Failed writing shards for {}", archive.display()))?;
        let schema = coordinator.schema.to_vec();
        let rows_written = coordinator.writer.rows_written();
        // Close shards even on a read error: rows already written are kept
        let shards = coordinator.writer.finish()?;

        if let Some(e) = read_error {
            warn!(
                archive = %archive.display(),
                lines_read,
                rows_written,
                "Archive read failed, partial shards retained"
            );
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to read archive {}", archive.display())));
        }

        if worker_stats.parsed + worker_stats.skipped != lines_read {
            warn!(
                archive = %archive.display(),
                lines_read,
                parsed = worker_stats.parsed,
                skipped = worker_stats.skipped,
                "Line accounting mismatch"
            );
        }

        info!(
            archive = %archive.display(),
            compression = compression.name(),
            lines_read,
            rows_written,
            skipped = worker_stats.skipped,
            shards = shards.len(),
            columns = schema.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Archive extracted"
        );

        Ok(ArchiveManifest {
            archive: archive.display().to_string(),
            compression: compression.name().to_string(),
            lines_read,
            rows_written,
            lines_skipped: worker_stats.skipped,
            schema,
            shards,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn config(workers: usize, batch_size: usize) -> ExtractConfig {
        ExtractConfig {
            workers,
            batch_size,
            queue_capacity: 4,
            shard_max_bytes: 1 << 20,
            fields: None,
        }
    }

    fn write_gz(path: &Path, content: &[u8]) {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(content).unwrap();
        fs::write(path, encoder.finish().unwrap()).unwrap();
    }

    #[test]
    fn test_worker_survives_closed_coordinator() {
        let (line_tx, line_rx) = bounded::<Vec<u8>>(8);
        let (flush_tx, flush_rx) = bounded::<FlushRequest>(1);
        drop(flush_rx);

        for line in [&b"{\"a\":1}"[..], b"oops", b"{\"a\":2}"] {
            line_tx.send(line.to_vec()).unwrap();
        }
        drop(line_tx);

        // Batch size larger than the input, so only the final flush is attempted
        let stats = parse_worker(0, line_rx, flush_tx, 10, None);
        assert_eq!(stats.parsed, 2);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_discover_archives() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.zst", "a.ndjson.gz", "notes.txt", "x.manifest.json"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("sub.zst")).unwrap();

        let found = ExtractPipeline::discover_archives(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.ndjson.gz", "b.zst"]);
    }

    #[test]
    fn test_many_workers_account_for_every_line() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let mut content = String::new();
        for i in 0..500 {
            if i % 50 == 0 {
                content.push_str("not json\n");
            } else {
                content.push_str(&format!("{{\"id\":{},\"k{}\":1}}\n", i, i % 7));
            }
        }
        fs::write(input.path().join("mix.jsonl"), &content).unwrap();

        let pipeline = ExtractPipeline::new(config(4, 16), output.path(), SkipLog::disabled(), false);
        let reports = pipeline.run(input.path()).unwrap();

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.status, ArchiveStatus::Extracted);
        assert_eq!(report.lines_read, 500);
        assert_eq!(report.lines_skipped, 10);
        assert_eq!(report.rows_written + report.lines_skipped, report.lines_read);
    }

    #[test]
    fn test_truncated_archive_fails_without_manifest() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let path = input.path().join("RC_bad.gz");
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        for i in 0..5000 {
            writeln!(encoder, "{{\"id\":{}}}", i).unwrap();
        }
        let mut bytes = encoder.finish().unwrap();
        bytes.truncate(bytes.len() / 2);
        fs::write(&path, bytes).unwrap();

        let pipeline = ExtractPipeline::new(config(2, 100), output.path(), SkipLog::disabled(), false);
        let reports = pipeline.run(input.path()).unwrap();

        assert!(reports[0].is_failed());
        assert!(!manifest_path(output.path(), "RC_bad").exists());
    }

    #[test]
    fn test_projection_fixes_columns() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_gz(
            &input.path().join("RS_p.gz"),
            b"{\"id\":\"a\",\"title\":\"t\",\"extra\":1}\n{\"id\":\"b\"}\n",
        );

        let mut cfg = config(1, 10);
        cfg.fields = Some(vec!["title".into(), "id".into(), "score".into()]);
        let pipeline = ExtractPipeline::new(cfg, output.path(), SkipLog::disabled(), false);
        let reports = pipeline.run(input.path()).unwrap();

        assert_eq!(reports[0].shards.len(), 1);
        assert_eq!(reports[0].shards[0].header, vec!["title", "id", "score"]);
        let content = fs::read_to_string(output.path().join("RS_p.csv")).unwrap();
        assert_eq!(content, "title,id,score\nt,a,\n,b,\n");
    }
}
