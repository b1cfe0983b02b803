//! Shardload Common Library
//!
//! Shared error handling, logging and checksum utilities for the shardload
//! workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the typed [`ShardloadError`] and [`Result`] alias
//! - **Logging**: centralized `tracing` initialisation ([`logging`])
//! - **Checksums**: stable row identities for idempotent loading ([`checksum`])
//! - **Durable writes**: atomic replace-on-write for state files ([`fsutil`])
//!
//! # Example
//!
//! ```no_run
//! use shardload_common::checksum::row_identity;
//!
//! let id = row_identity("shards/RC_2019-01.csv", 42);
//! assert_eq!(id.len(), 64);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod fsutil;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, ShardloadError};
