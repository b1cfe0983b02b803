//! Durable per-shard load progress
//!
//! The checkpoint file is one JSON object keyed by shard path:
//!
//! ```json
//! { "shards/RC_2019-01.csv": { "rows_processed": 3000, "completed": false } }
//! ```
//!
//! Every save rewrites the whole map through a temp file, `fsync` and rename,
//! so a crash mid-save leaves either the previous map or the new one.
//! `rows_processed` never decreases and a completed shard is never reopened;
//! saves that would break either rule are refused.

use serde::{Deserialize, Serialize};
use shardload_common::fsutil::write_atomic;
use shardload_common::{Result, ShardloadError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub rows_processed: u64,
    pub completed: bool,
}

#[derive(Debug, Default)]
pub struct CheckpointStore {
    /// `None` for an in-memory store that never touches disk
    path: Option<PathBuf>,
    entries: BTreeMap<String, CheckpointEntry>,
}

impl CheckpointStore {
    /// Load the checkpoint at `path`; a missing file is an empty checkpoint
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries: BTreeMap<String, CheckpointEntry> = if path.exists() {
            let bytes = fs::read(&path)?;
            serde_json::from_slice(&bytes).map_err(|e| ShardloadError::CheckpointCorrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        } else {
            BTreeMap::new()
        };
        debug!(checkpoint = %path.display(), entries = entries.len(), "Loaded checkpoint");
        Ok(Self { path: Some(path), entries })
    }

    /// A checkpoint that lives only in memory (dry runs)
    pub fn ephemeral() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &BTreeMap<String, CheckpointEntry> {
        &self.entries
    }

    pub fn entry(&self, file_id: &str) -> Option<CheckpointEntry> {
        self.entries.get(file_id).copied()
    }

    pub fn is_completed(&self, file_id: &str) -> bool {
        self.entries.get(file_id).is_some_and(|e| e.completed)
    }

    /// Data rows already committed for `file_id`
    pub fn resume_offset(&self, file_id: &str) -> u64 {
        self.entries.get(file_id).map_or(0, |e| e.rows_processed)
    }

    /// Record progress for one shard and persist the whole map
    ///
    /// Returns only after the new map is on stable storage.
    pub fn save(&mut self, file_id: &str, rows_processed: u64, completed: bool) -> Result<()> {
        let requested = CheckpointEntry { rows_processed, completed };
        let previous = self.entry(file_id);

        if let Some(stored) = previous {
            if requested.rows_processed < stored.rows_processed || (stored.completed && !completed) {
                return Err(ShardloadError::CheckpointRegression {
                    file_id: file_id.to_string(),
                    stored: stored.rows_processed,
                    stored_completed: stored.completed,
                    requested: rows_processed,
                    requested_completed: completed,
                });
            }
        }

        self.entries.insert(file_id.to_string(), requested);
        if let Err(e) = self.persist() {
            // Keep memory in line with what is on disk
            match previous {
                Some(entry) => self.entries.insert(file_id.to_string(), entry),
                None => self.entries.remove(file_id),
            };
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(&self.entries)?;
        write_atomic(path, &json)
    }
}
