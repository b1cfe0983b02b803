//! Extraction manifests
//!
//! A manifest is written next to the shards once an archive has been fully
//! extracted. Its presence is what marks the archive done: on the next run the
//! archive is skipped, while an archive without one is re-extracted from byte
//! zero after its stale shards are removed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shardload_common::fsutil::write_atomic;
use std::fs;
use std::path::{Path, PathBuf};

use super::shard::ShardInfo;

pub const MANIFEST_SUFFIX: &str = ".manifest.json";

/// Manifest path for an archive base name
pub fn manifest_path(dir: &Path, base: &str) -> PathBuf {
    dir.join(format!("{}{}", base, MANIFEST_SUFFIX))
}

pub fn is_manifest(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(MANIFEST_SUFFIX))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub archive: String,
    pub compression: String,
    pub lines_read: u64,
    pub rows_written: u64,
    pub lines_skipped: u64,
    pub schema: Vec<String>,
    pub shards: Vec<ShardInfo>,
}

impl ArchiveManifest {
    /// Read a manifest, `None` if it does not exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let manifest = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))?;
        Ok(Some(manifest))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize manifest")?;
        write_atomic(path, &json)
            .with_context(|| format!("Failed to write manifest {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = manifest_path(dir.path(), "RC_2019-01");
        assert!(ArchiveManifest::load(&path).unwrap().is_none());

        let manifest = ArchiveManifest {
            archive: "in/RC_2019-01.zst".into(),
            compression: "zstd".into(),
            lines_read: 3,
            rows_written: 2,
            lines_skipped: 1,
            schema: vec!["a".into(), "b".into()],
            shards: vec![ShardInfo {
                file_name: "RC_2019-01.csv".into(),
                rows: 2,
                bytes: 12,
                header: vec!["a".into(), "b".into()],
            }],
        };
        manifest.write(&path).unwrap();

        assert_eq!(ArchiveManifest::load(&path).unwrap(), Some(manifest));
        assert!(is_manifest(&path));
        assert!(!is_manifest(Path::new("RC_2019-01.csv")));
    }

    #[test]
    fn test_corrupt_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = manifest_path(dir.path(), "bad");
        fs::write(&path, b"{not json").unwrap();
        assert!(ArchiveManifest::load(&path).is_err());
    }
}
