//! Append-only skip log
//!
//! One human-readable line per event: `Skipped <count> rows from <file>`.
//! The pipeline never reads it back, and a failure to write it is logged and
//! otherwise ignored.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct SkipLog {
    path: Option<PathBuf>,
}

impl SkipLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: Some(path.into()) }
    }

    /// A skip log that records nothing
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append a summary line for `source`
    pub fn record(&self, source: &str, count: u64) {
        let Some(path) = &self.path else {
            return;
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "Skipped {} rows from {}", count, source));

        if let Err(e) = result {
            warn!(skip_log = %path.display(), source, count, error = %e, "Failed to write skip log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = SkipLog::new(dir.path().join("skip.txt"));
        log.record("RC_2019-01.zst", 1);
        log.record("RC_2019-01.csv", 0);

        let content = std::fs::read_to_string(dir.path().join("skip.txt")).unwrap();
        assert_eq!(
            content,
            "Skipped 1 rows from RC_2019-01.zst\nSkipped 0 rows from RC_2019-01.csv\n"
        );
    }

    #[test]
    fn test_unwritable_path_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let log = SkipLog::new(dir.path().join("missing").join("skip.txt"));
        log.record("x", 3);
        assert!(!dir.path().join("missing").exists());
    }

    #[test]
    fn test_disabled() {
        let log = SkipLog::disabled();
        assert!(log.path().is_none());
        log.record("x", 1);
    }
}
