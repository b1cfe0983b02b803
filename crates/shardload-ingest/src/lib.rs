//! Shardload Ingest Library
//!
//! Turns compressed archives of newline-delimited JSON records into CSV shards
//! and replays those shards into a document store, resumably.
//!
//! # Stages
//!
//! - **Extract** ([`extract`]): streaming decompression, a bounded line queue,
//!   a pool of parse workers and a per-archive coordinator that owns the schema
//!   union and the rotating shard writer
//! - **Load** ([`load`]): a checkpointed bulk loader that skips rows already
//!   committed, inserts the rest in idempotent batches and records progress
//!   after every batch
//!
//! # Example
//!
//! ```no_run
//! use shardload_ingest::config::IngestConfig;
//! use shardload_ingest::extract::ExtractPipeline;
//! use shardload_ingest::skip_log::SkipLog;
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let pipeline = ExtractPipeline::new(
//!         config.extract,
//!         "./shards",
//!         SkipLog::new("./shards/skip.txt"),
//!         false,
//!     );
//!     let reports = pipeline.run(Path::new("./archives"))?;
//!     println!("{} archives", reports.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod extract;
pub mod load;
pub mod progress;
pub mod skip_log;
pub mod summary;
