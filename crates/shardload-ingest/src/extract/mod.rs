//! Extract stage: compressed archives to CSV shards
//!
//! - [`decompress`]: streaming zstd/gzip/plain line reader
//! - [`record`]: decoded record model
//! - [`schema`]: per-archive schema union
//! - [`shard`]: rotating shard writer
//! - [`manifest`]: completion markers that make re-runs skip finished archives
//! - [`pipeline`]: line queue, parse workers and the per-archive coordinator

pub mod decompress;
pub mod manifest;
pub mod pipeline;
pub mod record;
pub mod schema;
pub mod shard;

pub use manifest::ArchiveManifest;
pub use pipeline::{ArchiveReport, ArchiveStatus, ExtractPipeline};
pub use record::{FieldValue, RawRecord};
pub use schema::SchemaUnion;
pub use shard::{ShardInfo, ShardWriter};
