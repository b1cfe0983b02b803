//! Ingestion configuration
//!
//! All knobs come from environment variables (a `.env` file is honoured) with
//! the `DEFAULT_*` constants below as fallbacks. CLI flags are applied on top
//! by the binary before [`IngestConfig::validate`] runs.

use anyhow::{Context, Result};
use byte_unit::Byte;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::load::store::validate_collection_name;

// ============================================================================
// Extract Stage Defaults
// ============================================================================

/// Default number of parse worker threads per archive.
pub const DEFAULT_PARSE_WORKERS: usize = 8;

/// Default number of records a worker buffers before flushing to the shard writer.
pub const DEFAULT_PARSE_BATCH_SIZE: usize = 10_000;

/// Default capacity of the bounded line queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default shard rotation threshold.
pub const DEFAULT_SHARD_MAX_SIZE: &str = "1GiB";

// ============================================================================
// Load Stage Defaults
// ============================================================================

/// Default rows per bulk insert.
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 1000;

/// Collection for shards whose name carries no known record-type prefix.
pub const DEFAULT_COLLECTION: &str = "documents";

/// Default attempts per bulk insert.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the second attempt; doubled for every further attempt.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Checkpoint file name inside the shard directory.
pub const CHECKPOINT_FILE_NAME: &str = "checkpoint.json";

/// Skip log file name inside the shard directory.
pub const SKIP_LOG_FILE_NAME: &str = "skip.txt";

// ============================================================================
// Database Defaults
// ============================================================================

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/shardload";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Complete configuration for a shardload run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub extract: ExtractConfig,
    pub load: LoadConfig,
    pub database: DatabaseConfig,
    /// Whether progress bars are drawn
    pub show_progress: bool,
}

/// Decompress/parse/shard stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    pub workers: usize,
    pub batch_size: usize,
    pub queue_capacity: usize,
    /// Rotate to a new shard once the current one exceeds this many bytes
    pub shard_max_bytes: u64,
    /// Fixed output columns; `None` means the discovered schema union
    pub fields: Option<Vec<String>>,
}

/// Bulk loader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    pub batch_size: usize,
    /// Explicit checkpoint path; defaults to `<shard dir>/checkpoint.json`
    pub checkpoint_file: Option<PathBuf>,
    /// Explicit skip log path; defaults to `<shard dir>/skip.txt`
    pub skip_log: Option<PathBuf>,
    pub default_collection: String,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

/// Document store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_PARSE_WORKERS,
            batch_size: DEFAULT_PARSE_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            // 1 GiB
            shard_max_bytes: 1 << 30,
            fields: None,
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_LOAD_BATCH_SIZE,
            checkpoint_file: None,
            skip_log: None,
            default_collection: DEFAULT_COLLECTION.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            extract: ExtractConfig::default(),
            load: LoadConfig::default(),
            database: DatabaseConfig::default(),
            show_progress: true,
        }
    }
}

/// Read and parse an environment variable, `None` when unset
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e)),
        Err(_) => Ok(None),
    }
}

/// Parse a human-readable size such as `512MiB`, `1 GB` or `1048576`
pub fn parse_byte_size(raw: &str) -> Result<u64> {
    let bytes = Byte::parse_str(raw.trim(), true)
        .with_context(|| format!("Invalid byte size '{}'", raw))?;
    Ok(bytes.as_u64())
}

/// Parse a comma-separated projection list, dropping blanks and duplicates
pub fn parse_field_list(raw: &str) -> Option<Vec<String>> {
    let mut fields: Vec<String> = Vec::new();
    for field in raw.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        if !fields.iter().any(|f| f == field) {
            fields.push(field.to_string());
        }
    }
    (!fields.is_empty()).then_some(fields)
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        let extract = &mut config.extract;
        if let Some(workers) = env_parse("SHARDLOAD_PARSE_WORKERS")? {
            extract.workers = workers;
        }
        if let Some(batch_size) = env_parse("SHARDLOAD_PARSE_BATCH_SIZE")? {
            extract.batch_size = batch_size;
        }
        if let Some(capacity) = env_parse("SHARDLOAD_QUEUE_CAPACITY")? {
            extract.queue_capacity = capacity;
        }
        extract.shard_max_bytes = match std::env::var("SHARDLOAD_SHARD_MAX_SIZE") {
            Ok(raw) => parse_byte_size(&raw).context("SHARDLOAD_SHARD_MAX_SIZE")?,
            Err(_) => parse_byte_size(DEFAULT_SHARD_MAX_SIZE)?,
        };
        if let Ok(raw) = std::env::var("SHARDLOAD_FIELDS") {
            extract.fields = parse_field_list(&raw);
        }

        let load = &mut config.load;
        if let Some(batch_size) = env_parse("SHARDLOAD_LOAD_BATCH_SIZE")? {
            load.batch_size = batch_size;
        }
        if let Ok(path) = std::env::var("SHARDLOAD_CHECKPOINT_FILE") {
            load.checkpoint_file = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("SHARDLOAD_SKIP_LOG") {
            load.skip_log = Some(PathBuf::from(path));
        }
        if let Ok(collection) = std::env::var("SHARDLOAD_DEFAULT_COLLECTION") {
            load.default_collection = collection.trim().to_string();
        }
        if let Some(retries) = env_parse("SHARDLOAD_MAX_RETRIES")? {
            load.max_retries = retries;
        }
        if let Some(delay) = env_parse("SHARDLOAD_RETRY_BASE_DELAY_MS")? {
            load.retry_base_delay_ms = delay;
        }

        let database = &mut config.database;
        if let Ok(url) = std::env::var("DATABASE_URL") {
            database.url = url;
        }
        if let Some(max) = env_parse("DATABASE_MAX_CONNECTIONS")? {
            database.max_connections = max;
        }
        if let Some(timeout) = env_parse("DATABASE_CONNECT_TIMEOUT")? {
            database.connect_timeout_secs = timeout;
        }

        if let Some(show) = env_parse("SHARDLOAD_PROGRESS")? {
            config.show_progress = show;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.extract.workers == 0 {
            anyhow::bail!("SHARDLOAD_PARSE_WORKERS must be greater than 0");
        }
        if self.extract.batch_size == 0 {
            anyhow::bail!("SHARDLOAD_PARSE_BATCH_SIZE must be greater than 0");
        }
        if self.extract.queue_capacity == 0 {
            anyhow::bail!("SHARDLOAD_QUEUE_CAPACITY must be greater than 0");
        }
        if self.extract.shard_max_bytes == 0 {
            anyhow::bail!("SHARDLOAD_SHARD_MAX_SIZE must be greater than 0");
        }
        if self.load.batch_size == 0 {
            anyhow::bail!("SHARDLOAD_LOAD_BATCH_SIZE must be greater than 0");
        }
        if self.load.max_retries == 0 {
            anyhow::bail!("SHARDLOAD_MAX_RETRIES must be at least 1");
        }
        validate_collection_name(&self.load.default_collection)
            .context("SHARDLOAD_DEFAULT_COLLECTION")?;
        if self.database.url.is_empty() {
            anyhow::bail!("DATABASE_URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }
        Ok(())
    }
}

impl LoadConfig {
    pub fn checkpoint_path(&self, shard_dir: &Path) -> PathBuf {
        self.checkpoint_file
            .clone()
            .unwrap_or_else(|| shard_dir.join(CHECKPOINT_FILE_NAME))
    }

    pub fn skip_log_path(&self, shard_dir: &Path) -> PathBuf {
        self.skip_log
            .clone()
            .unwrap_or_else(|| shard_dir.join(SKIP_LOG_FILE_NAME))
    }

    /// Backoff before retry number `attempt` (1-based: the wait after the first failure is attempt 1)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "SHARDLOAD_PARSE_WORKERS",
        "SHARDLOAD_PARSE_BATCH_SIZE",
        "SHARDLOAD_SHARD_MAX_SIZE",
        "SHARDLOAD_FIELDS",
        "SHARDLOAD_LOAD_BATCH_SIZE",
        "SHARDLOAD_DEFAULT_COLLECTION",
        "SHARDLOAD_MAX_RETRIES",
        "SHARDLOAD_PROGRESS",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("1GiB").unwrap(), 1 << 30);
        assert_eq!(parse_byte_size("512 KiB").unwrap(), 512 * 1024);
        assert_eq!(parse_byte_size("2048").unwrap(), 2048);
        assert!(parse_byte_size("lots").is_err());
    }

    #[test]
    fn test_parse_field_list() {
        assert_eq!(
            parse_field_list(" author, body ,,author,score"),
            Some(vec!["author".to_string(), "body".to_string(), "score".to_string()])
        );
        assert_eq!(parse_field_list(" , "), None);
    }

    #[test]
    fn test_retry_delay_doubles() {
        let load = LoadConfig { retry_base_delay_ms: 100, ..LoadConfig::default() };
        assert_eq!(load.retry_delay(1), Duration::from_millis(100));
        assert_eq!(load.retry_delay(2), Duration::from_millis(200));
        assert_eq!(load.retry_delay(4), Duration::from_millis(800));
    }

    #[test]
    fn test_default_paths_live_in_shard_dir() {
        let load = LoadConfig::default();
        let dir = Path::new("/data/shards");
        assert_eq!(load.checkpoint_path(dir), dir.join("checkpoint.json"));
        assert_eq!(load.skip_log_path(dir), dir.join("skip.txt"));
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        clear_env();
        env::set_var("SHARDLOAD_PARSE_WORKERS", "3");
        env::set_var("SHARDLOAD_SHARD_MAX_SIZE", "64MiB");
        env::set_var("SHARDLOAD_FIELDS", "author,body");
        env::set_var("SHARDLOAD_DEFAULT_COLLECTION", "posts");
        env::set_var("SHARDLOAD_PROGRESS", "false");

        let config = IngestConfig::from_env().expect("config from env");
        assert_eq!(config.extract.workers, 3);
        assert_eq!(config.extract.shard_max_bytes, 64 * 1024 * 1024);
        assert_eq!(config.extract.fields, Some(vec!["author".into(), "body".into()]));
        assert_eq!(config.load.default_collection, "posts");
        assert!(!config.show_progress);
        config.validate().expect("valid config");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_is_an_error() {
        clear_env();
        env::set_var("SHARDLOAD_PARSE_WORKERS", "many");
        let err = IngestConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("SHARDLOAD_PARSE_WORKERS"));
        clear_env();
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = IngestConfig::default();
        config.extract.workers = 0;
        assert!(config.validate().is_err());

        let mut config = IngestConfig::default();
        config.load.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = IngestConfig::default();
        config.load.default_collection = "Bad-Name".into();
        assert!(config.validate().is_err());

        assert!(IngestConfig::default().validate().is_ok());
    }
}
