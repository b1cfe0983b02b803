//! Shard reading for the bulk loader
//!
//! Physical lines containing a NUL byte are dropped before the CSV parser sees
//! them. Rows whose column count differs from the header are surfaced as
//! [`ShardRow::Malformed`] so the loader can count them and move on.

use anyhow::{Context, Result};
use csv::{ByteRecord, StringRecord};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

const READ_BUFFER_BYTES: usize = 1 << 20;

/// Reader adapter that drops every physical line containing a NUL byte
pub struct NulLineFilter<R> {
    inner: R,
    line: Vec<u8>,
    pos: usize,
    dropped: u64,
}

impl<R: BufRead> NulLineFilter<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, line: Vec::new(), pos: 0, dropped: 0 }
    }

    /// Lines dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl<R: BufRead> Read for NulLineFilter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.line.len() {
            self.line.clear();
            self.pos = 0;
            if self.inner.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(0);
            }
            if self.line.contains(&0) {
                self.dropped += 1;
                self.line.clear();
            }
        }

        let n = buf.len().min(self.line.len() - self.pos);
        buf[..n].copy_from_slice(&self.line[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// One data row read from a shard
#[derive(Debug)]
pub enum ShardRow {
    Row(StringRecord),
    /// Structurally unusable row; counted, never loaded
    Malformed { line: u64, reason: String },
}

/// Sequential reader over one shard file
pub struct ShardReader {
    path: PathBuf,
    reader: csv::Reader<NulLineFilter<BufReader<File>>>,
    header: Vec<String>,
    buf: ByteRecord,
}

impl ShardReader {
    /// Open a shard and read its header
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open shard {}", path.display()))?;
        let filter = NulLineFilter::new(BufReader::with_capacity(READ_BUFFER_BYTES, file));
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(filter);

        let header = reader
            .headers()
            .with_context(|| format!("Failed to read header of {}", path.display()))?
            .iter()
            .map(String::from)
            .collect();

        Ok(Self { path: path.to_path_buf(), reader, header, buf: ByteRecord::new() })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Physical lines dropped for containing NUL bytes
    pub fn dropped_lines(&self) -> u64 {
        self.reader.get_ref().dropped()
    }

    /// Skip up to `n` data rows without decoding them; returns how many were skipped
    pub fn skip_rows(&mut self, n: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < n && self.read_raw()? {
            skipped += 1;
        }
        Ok(skipped)
    }

    fn read_raw(&mut self) -> Result<bool> {
        self.reader
            .read_byte_record(&mut self.buf)
            .with_context(|| format!("Failed to read shard {}", self.path.display()))
    }

    /// Next data row, `None` at end of file
    pub fn next_row(&mut self) -> Result<Option<ShardRow>> {
        if !self.read_raw()? {
            return Ok(None);
        }
        let line = self.buf.position().map_or(0, |p| p.line());

        if self.buf.len() != self.header.len() {
            return Ok(Some(ShardRow::Malformed {
                line,
                reason: format!("expected {} columns, found {}", self.header.len(), self.buf.len()),
            }));
        }

        match StringRecord::from_byte_record(self.buf.clone()) {
            Ok(record) => Ok(Some(ShardRow::Row(record))),
            Err(e) => Ok(Some(ShardRow::Malformed { line, reason: format!("invalid UTF-8: {}", e) })),
        }
    }
}

/// A row whose column count does not match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMismatch {
    pub line: u64,
    pub columns: usize,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub expected_columns: usize,
    pub rows: u64,
    pub mismatched: u64,
    pub dropped_lines: u64,
    /// First mismatches found, capped at [`VERIFY_EXAMPLE_LIMIT`]
    pub examples: Vec<RowMismatch>,
}

pub const VERIFY_EXAMPLE_LIMIT: usize = 20;

/// Check every row of a shard against the header width (or `expected`)
pub fn verify_shard(path: &Path, expected: Option<usize>) -> Result<VerifyReport> {
    let mut reader = ShardReader::open(path)?;
    let expected_columns = expected.unwrap_or(reader.header().len());
    let mut report = VerifyReport { expected_columns, ..Default::default() };

    if reader.header().len() != expected_columns {
        report.mismatched += 1;
        report.examples.push(RowMismatch { line: 1, columns: reader.header().len() });
    }

    while reader.read_raw()? {
        report.rows += 1;
        let columns = reader.buf.len();
        if columns != expected_columns {
            report.mismatched += 1;
            if report.examples.len() < VERIFY_EXAMPLE_LIMIT {
                let line = reader.buf.position().map_or(0, |p| p.line());
                report.examples.push(RowMismatch { line, columns });
            }
        }
    }
    report.dropped_lines = reader.dropped_lines();
    Ok(report)
}
