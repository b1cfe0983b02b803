//! Rotating CSV shard writer
//!
//! One writer per archive. Shards are named `<base>.csv`, `<base>_part1.csv`,
//! `<base>_part2.csv`, ... and created lazily on the first flush that targets
//! them. The header of a shard is the schema union at the moment the shard is
//! created and is never rewritten.
//!
//! Rotation happens in two cases:
//! - after a flush, when the shard's on-disk size exceeds the threshold
//! - before a flush, when the batch carries a field the open shard's header
//!   lacks (the next shard gets the widened header)
//!
//! Only the extraction coordinator owns a writer, so flushes never interleave.

use anyhow::{bail, Context, Result};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::record::RawRecord;
use super::schema::SchemaUnion;

/// File name of shard `index` for an archive base name
pub fn shard_file_name(base: &str, index: usize) -> String {
    if index == 0 {
        format!("{}.csv", base)
    } else {
        format!("{}_part{}.csv", base, index)
    }
}

/// Delete shards left behind by an interrupted extraction of `base`
///
/// Returns the number of files removed.
pub fn remove_stale_shards(dir: &Path, base: &str) -> Result<usize> {
    let mut removed = 0;
    loop {
        let path = dir.join(shard_file_name(base, removed));
        if !path.exists() {
            break;
        }
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove stale shard {}", path.display()))?;
        removed += 1;
    }
    if removed > 0 {
        info!(base, removed, "Removed stale shards from an interrupted run");
    }
    Ok(removed)
}

/// A finished shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub file_name: String,
    pub rows: u64,
    pub bytes: u64,
    pub header: Vec<String>,
}

struct OpenShard {
    path: PathBuf,
    file_name: String,
    header: SchemaUnion,
    writer: csv::Writer<File>,
    rows: u64,
    bytes: u64,
}

impl OpenShard {
    fn create(dir: &Path, file_name: String, schema: &SchemaUnion) -> Result<Self> {
        let path = dir.join(&file_name);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create shard {}", path.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(schema.fields())
            .with_context(|| format!("Failed to write header to {}", path.display()))?;

        debug!(shard = %path.display(), columns = schema.len(), "Created shard");

        Ok(Self {
            path,
            file_name,
            header: SchemaUnion::fixed(schema.fields().iter().cloned()),
            writer,
            rows: 0,
            bytes: 0,
        })
    }

    fn covers(&self, records: &[RawRecord]) -> bool {
        records
            .iter()
            .all(|r| r.field_names().all(|name| self.header.contains(name)))
    }

    fn append(&mut self, records: &[RawRecord]) -> Result<()> {
        let mut row = StringRecord::with_capacity(256, self.header.len());
        for record in records {
            row.clear();
            for field in self.header.fields() {
                row.push_field(&record.get(field).render());
            }
            self.writer
                .write_record(&row)
                .with_context(|| format!("Failed to write row to {}", self.path.display()))?;
        }
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;

        self.rows += records.len() as u64;
        self.bytes = self
            .writer
            .get_ref()
            .metadata()
            .with_context(|| format!("Failed to stat {}", self.path.display()))?
            .len();
        Ok(())
    }

    fn close(mut self) -> Result<ShardInfo> {
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        self.writer
            .get_ref()
            .sync_all()
            .with_context(|| format!("Failed to sync {}", self.path.display()))?;

        Ok(ShardInfo {
            file_name: self.file_name,
            rows: self.rows,
            bytes: self.bytes,
            header: self.header.to_vec(),
        })
    }
}

/// Writes batches of records for one archive into rotating shards
pub struct ShardWriter {
    dir: PathBuf,
    base: String,
    max_bytes: u64,
    next_index: usize,
    current: Option<OpenShard>,
    finished: Vec<ShardInfo>,
}

impl ShardWriter {
    pub fn new(dir: impl Into<PathBuf>, base: impl Into<String>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            base: base.into(),
            max_bytes,
            next_index: 0,
            current: None,
            finished: Vec::new(),
        }
    }

    /// Append `records` to the open shard as one flush
    ///
    /// Every field of every record must already be part of `schema`.
    pub fn flush(&mut self, records: &[RawRecord], schema: &SchemaUnion) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        if let Some(field) = records
            .iter()
            .flat_map(|r| r.field_names())
            .find(|name| !schema.contains(name))
        {
            bail!("Field '{}' is not part of the schema for {}", field, self.base);
        }

        if self.current.as_ref().is_some_and(|open| !open.covers(records)) {
            debug!(base = %self.base, "Batch widens the schema, rotating shard");
            self.rotate()?;
        }

        let mut shard = match self.current.take() {
            Some(shard) => shard,
            None => {
                let file_name = shard_file_name(&self.base, self.next_index);
                self.next_index += 1;
                OpenShard::create(&self.dir, file_name, schema)?
            },
        };

        shard.append(records)?;

        if shard.bytes > self.max_bytes {
            debug!(
                shard = %shard.path.display(),
                bytes = shard.bytes,
                threshold = self.max_bytes,
                "Shard over size threshold, rotating"
            );
            self.finished.push(shard.close()?);
        } else {
            self.current = Some(shard);
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(shard) = self.current.take() {
            self.finished.push(shard.close()?);
        }
        Ok(())
    }

    /// Size of the open shard, if any
    pub fn current_bytes(&self) -> Option<u64> {
        self.current.as_ref().map(|s| s.bytes)
    }

    pub fn rows_written(&self) -> u64 {
        self.finished.iter().map(|s| s.rows).sum::<u64>()
            + self.current.as_ref().map_or(0, |s| s.rows)
    }

    /// Close the open shard and return every shard written
    pub fn finish(mut self) -> Result<Vec<ShardInfo>> {
        self.rotate()?;
        Ok(self.finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: &str) -> RawRecord {
        RawRecord::decode(json.as_bytes()).unwrap()
    }

    fn schema_of(records: &[RawRecord]) -> SchemaUnion {
        let mut schema = SchemaUnion::new();
        for r in records {
            schema.merge_record(r);
        }
        schema
    }

    fn read_csv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
        let mut reader = csv::Reader::from_path(path).unwrap();
        let header = reader.headers().unwrap().iter().map(String::from).collect();
        let rows = reader
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect();
        (header, rows)
    }

    #[test]
    fn test_shard_file_names() {
        assert_eq!(shard_file_name("RC_2019-01", 0), "RC_2019-01.csv");
        assert_eq!(shard_file_name("RC_2019-01", 1), "RC_2019-01_part1.csv");
        assert_eq!(shard_file_name("RC_2019-01", 12), "RC_2019-01_part12.csv");
    }

    #[test]
    fn test_lazy_creation() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ShardWriter::new(dir.path(), "empty", 1024);
        writer.flush(&[], &SchemaUnion::new()).unwrap();
        assert!(writer.finish().unwrap().is_empty());
        assert!(!dir.path().join("empty.csv").exists());
    }

    #[test]
    fn test_header_and_sparse_rows() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![record(r#"{"a":1,"b":"x"}"#), record(r#"{"a":2,"c":true}"#)];
        let schema = schema_of(&records);

        let mut writer = ShardWriter::new(dir.path(), "arch", 1 << 20);
        writer.flush(&records, &schema).unwrap();
        let shards = writer.finish().unwrap();

        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].rows, 2);
        let (header, rows) = read_csv(&dir.path().join("arch.csv"));
        assert_eq!(header, vec!["a", "b", "c"]);
        assert_eq!(rows[0], vec!["1", "x", ""]);
        assert_eq!(rows[1], vec!["2", "", "true"]);
    }

    #[test]
    fn test_rotates_after_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let batch: Vec<_> = (0..10).map(|i| record(&format!(r#"{{"n":{}}}"#, i))).collect();
        let schema = schema_of(&batch);

        let mut writer = ShardWriter::new(dir.path(), "big", 16);
        for _ in 0..3 {
            writer.flush(&batch, &schema).unwrap();
        }
        let shards = writer.finish().unwrap();

        let names: Vec<_> = shards.iter().map(|s| s.file_name.as_str()).collect();
        assert_eq!(names, vec!["big.csv", "big_part1.csv", "big_part2.csv"]);
        for shard in &shards {
            assert_eq!(shard.rows, 10);
            let size = fs::metadata(dir.path().join(&shard.file_name)).unwrap().len();
            assert_eq!(size, shard.bytes);
        }
    }

    #[test]
    fn test_widening_batch_opens_new_shard() {
        let dir = tempfile::tempdir().unwrap();
        let first = vec![record(r#"{"a":1}"#)];
        let second = vec![record(r#"{"a":2,"b":3}"#)];

        let mut schema = schema_of(&first);
        let mut writer = ShardWriter::new(dir.path(), "w", 1 << 20);
        writer.flush(&first, &schema).unwrap();
        schema.merge_record(&second[0]);
        writer.flush(&second, &schema).unwrap();
        // Same fields again stay in the widened shard
        writer.flush(&second, &schema).unwrap();
        let shards = writer.finish().unwrap();

        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].header, vec!["a"]);
        assert_eq!(shards[1].header, vec!["a", "b"]);
        assert_eq!(shards[1].rows, 2);
    }

    #[test]
    fn test_unknown_field_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ShardWriter::new(dir.path(), "x", 1024);
        let records = vec![record(r#"{"a":1,"z":2}"#)];
        let schema = SchemaUnion::fixed(["a"]);
        assert!(writer.flush(&records, &schema).is_err());
    }

    #[test]
    fn test_remove_stale_shards() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            fs::write(dir.path().join(shard_file_name("old", i)), "a\n1\n").unwrap();
        }
        fs::write(dir.path().join("other.csv"), "a\n").unwrap();

        assert_eq!(remove_stale_shards(dir.path(), "old").unwrap(), 3);
        assert!(!dir.path().join("old.csv").exists());
        assert!(dir.path().join("other.csv").exists());
    }
}
