//! Streaming archive decompression
//!
//! Turns one archive into a lazy sequence of raw lines. Nothing is ever read
//! to the end in memory: the decoder is pulled through a fixed-size buffer and
//! at most one partial line is carried across chunk boundaries.
//!
//! # Supported Formats
//!
//! - **Zstandard** (`.zst`): using zstd with the long-distance window the
//!   public social-media dumps are compressed with
//! - **Gzip** (`.gz`): using flate2, multi-member aware
//! - **Plain** (`.ndjson`, `.jsonl`, `.json`): read as-is

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use indicatif::ProgressBar;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use tracing::debug;

/// Window log accepted by the zstd decoder (2 GiB windows).
pub const ZSTD_WINDOW_LOG_MAX: u32 = 31;

/// Read buffer between the decoder and the line splitter.
const READ_BUFFER_BYTES: usize = 1 << 20;

const DATA_EXTENSIONS: &[&str] = &["ndjson", "jsonl", "json"];

/// Compression applied to an archive, detected from its file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Zstd,
    Gzip,
    Plain,
}

impl Compression {
    /// Detect compression from the path, `None` when the file is not an archive
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "zst" | "zstd" => Some(Compression::Zstd),
            "gz" => Some(Compression::Gzip),
            e if DATA_EXTENSIONS.contains(&e) => Some(Compression::Plain),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Compression::Zstd => "zstd",
            Compression::Gzip => "gzip",
            Compression::Plain => "plain",
        }
    }

    /// Wrap `inner` in a streaming decoder for this format
    pub fn decoder<R>(self, inner: R) -> io::Result<Box<dyn Read + Send>>
    where
        R: Read + Send + 'static,
    {
        Ok(match self {
            Compression::Zstd => {
                let mut decoder = zstd::stream::read::Decoder::new(inner)?;
                decoder.window_log_max(ZSTD_WINDOW_LOG_MAX)?;
                Box::new(decoder)
            },
            Compression::Gzip => Box::new(MultiGzDecoder::new(inner)),
            Compression::Plain => Box::new(inner),
        })
    }
}

/// Output base name for an archive: `RC_2019-01.zst` -> `RC_2019-01`
///
/// Strips the compression extension and then one data extension, so
/// `RS_2020-02.ndjson.gz` also becomes `RS_2020-02`.
pub fn archive_base(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let mut stem = name;

    if let Some((head, ext)) = stem.rsplit_once('.') {
        if matches!(ext.to_ascii_lowercase().as_str(), "zst" | "zstd" | "gz") {
            stem = head;
        }
    }
    if let Some((head, ext)) = stem.rsplit_once('.') {
        if DATA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            stem = head;
        }
    }

    (!stem.is_empty()).then(|| stem.to_string())
}

/// Iterator over the raw lines of a byte stream
///
/// Yields each line without its `\n` / `\r\n` terminator. A final line without
/// a terminator is still yielded. I/O errors (including a truncated or corrupt
/// compressed stream) are yielded once and end the iteration.
pub struct LineReader<R> {
    reader: R,
    failed: bool,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, failed: false }
    }
}

impl<R: BufRead> Iterator for LineReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(0) => None,
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                }
                Some(Ok(line))
            },
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            },
        }
    }
}

/// Open an archive as a line stream
///
/// `progress` advances with the compressed bytes consumed; pass
/// `ProgressBar::hidden()` to disable drawing.
pub fn open_archive(
    path: &Path,
    progress: &ProgressBar,
) -> Result<LineReader<BufReader<Box<dyn Read + Send>>>> {
    let compression = Compression::from_path(path)
        .with_context(|| format!("Unrecognised archive extension: {}", path.display()))?;

    let file = File::open(path).with_context(|| format!("Failed to open archive {}", path.display()))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    progress.set_length(size);

    let decoder = compression
        .decoder(progress.wrap_read(file))
        .with_context(|| format!("Failed to initialise {} decoder", compression.name()))?;

    debug!(archive = %path.display(), compression = compression.name(), size, "Opened archive");

    Ok(LineReader::new(BufReader::with_capacity(READ_BUFFER_BYTES, decoder)))
}
