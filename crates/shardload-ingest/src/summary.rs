//! End-of-run summary tables

use std::fmt::Write;
use std::path::Path;

use crate::extract::{ArchiveReport, ArchiveStatus};
use crate::load::reader::VerifyReport;
use crate::load::{ShardOutcome, ShardReport};
use crate::progress::format_bytes;

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Table of per-archive extraction results
pub fn extract_table(reports: &[ArchiveReport]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<32} {:<10} {:>12} {:>12} {:>10} {:>7} {:>12}",
        "ARCHIVE", "STATUS", "LINES", "ROWS", "SKIPPED", "SHARDS", "SIZE"
    );
    for r in reports {
        let status = match &r.status {
            ArchiveStatus::Extracted => "extracted",
            ArchiveStatus::AlreadyExtracted => "skipped",
            ArchiveStatus::Failed(_) => "FAILED",
        };
        let bytes: u64 = r.shards.iter().map(|s| s.bytes).sum();
        let _ = writeln!(
            out,
            "{:<32} {:<10} {:>12} {:>12} {:>10} {:>7} {:>12}",
            file_name(&r.archive),
            status,
            r.lines_read,
            r.rows_written,
            r.lines_skipped,
            r.shards.len(),
            format_bytes(bytes)
        );
        if let ArchiveStatus::Failed(reason) = &r.status {
            let _ = writeln!(out, "  error: {}", reason);
        }
    }
    let failed = reports.iter().filter(|r| r.is_failed()).count();
    let _ = writeln!(
        out,
        "{} archive(s), {} rows written, {} lines skipped, {} failed",
        reports.len(),
        reports.iter().map(|r| r.rows_written).sum::<u64>(),
        reports.iter().map(|r| r.lines_skipped).sum::<u64>(),
        failed
    );
    out
}

/// Table of per-shard load results
pub fn load_table(reports: &[ShardReport]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<32} {:<12} {:<10} {:>12} {:>12} {:>10}",
        "SHARD", "COLLECTION", "STATUS", "PROCESSED", "INSERTED", "SKIPPED"
    );
    for r in reports {
        let status = match &r.outcome {
            ShardOutcome::Loaded if r.resumed_from > 0 => "resumed",
            ShardOutcome::Loaded => "loaded",
            ShardOutcome::AlreadyCompleted => "skipped",
            ShardOutcome::Failed(_) => "FAILED",
        };
        let _ = writeln!(
            out,
            "{:<32} {:<12} {:<10} {:>12} {:>12} {:>10}",
            file_name(&r.shard),
            r.collection,
            status,
            r.rows_processed,
            r.rows_inserted,
            r.rows_skipped
        );
        if let ShardOutcome::Failed(reason) = &r.outcome {
            let _ = writeln!(out, "  error: {}", reason);
        }
    }
    let failed = reports.iter().filter(|r| r.is_failed()).count();
    let _ = writeln!(
        out,
        "{} shard(s), {} documents inserted, {} rows skipped, {} failed",
        reports.len(),
        reports.iter().map(|r| r.rows_inserted).sum::<u64>(),
        reports.iter().map(|r| r.rows_skipped).sum::<u64>(),
        failed
    );
    out
}

pub fn verify_table(path: &Path, report: &VerifyReport) -> String {
    let mut out = String::new();
    for m in &report.examples {
        let _ = writeln!(out, "line {}: {} columns", m.line, m.columns);
    }
    if report.mismatched as usize > report.examples.len() {
        let _ = writeln!(out, "... {} more", report.mismatched as usize - report.examples.len());
    }
    let _ = writeln!(
        out,
        "{}: {} rows checked, {} with a column count other than {}, {} NUL lines dropped",
        path.display(),
        report.rows,
        report.mismatched,
        report.expected_columns,
        report.dropped_lines
    );
    out
}
