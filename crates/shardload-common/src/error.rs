//! Error types for shardload

use thiserror::Error;

/// Result type alias for shardload operations
pub type Result<T> = std::result::Result<T, ShardloadError>;

/// Main error type for shardload
#[derive(Error, Debug)]
pub enum ShardloadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checkpoint file {path} is corrupt: {reason}")]
    CheckpointCorrupt { path: String, reason: String },

    #[error(
        "Checkpoint regression for {file_id}: stored rows_processed={stored}, completed={stored_completed}; \
         refused rows_processed={requested}, completed={requested_completed}"
    )]
    CheckpointRegression {
        file_id: String,
        stored: u64,
        stored_completed: bool,
        requested: u64,
        requested_completed: bool,
    },

    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Document store error: {0}")]
    Store(String),
}

impl ShardloadError {
    /// Whether retrying the failed operation could succeed.
    ///
    /// Only store and I/O failures are treated as transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, ShardloadError::Store(_) | ShardloadError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ShardloadError::Store("connection reset".into()).is_transient());
        assert!(ShardloadError::Io(std::io::Error::other("eof")).is_transient());
        assert!(!ShardloadError::InvalidCollection("Bad-Name".into()).is_transient());
        assert!(!ShardloadError::Config("x".into()).is_transient());
    }

    #[test]
    fn test_regression_message_names_file() {
        let err = ShardloadError::CheckpointRegression {
            file_id: "a.csv".into(),
            stored: 10,
            stored_completed: false,
            requested: 5,
            requested_completed: false,
        };
        assert!(err.to_string().contains("a.csv"));
    }
}
