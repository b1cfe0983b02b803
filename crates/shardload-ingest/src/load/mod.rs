//! Load stage: CSV shards into the document store
//!
//! - [`checkpoint`]: durable per-shard progress
//! - [`reader`]: NUL-filtering shard reader and column-count verification
//! - [`store`]: document store trait with PostgreSQL and in-memory bindings
//! - [`loader`]: the resumable bulk loader

pub mod checkpoint;
pub mod loader;
pub mod reader;
pub mod store;

pub use checkpoint::{CheckpointEntry, CheckpointStore};
pub use loader::{BulkLoader, LoadState, ShardOutcome, ShardReport};
pub use reader::{verify_shard, ShardReader, VerifyReport};
pub use store::{Document, DocumentStore, MemoryDocumentStore, PgDocumentStore};
