//! Document store abstraction
//!
//! The loader writes through the [`DocumentStore`] trait. The production
//! binding is [`PgDocumentStore`]: one PostgreSQL table per collection with
//! the document body in a `JSONB` column. [`MemoryDocumentStore`] backs dry
//! runs and tests.
//!
//! Inserts are idempotent. Every document carries a `doc_id` derived from its
//! shard path and row offset, and a document whose id is already present is
//! silently kept as-is, so replaying a batch after a crash cannot duplicate it.

use async_trait::async_trait;
use serde_json::{Map, Value};
use shardload_common::checksum::row_identity;
use shardload_common::{Result, ShardloadError};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::config::DatabaseConfig;

/// Postgres allows at most 65535 bind parameters per statement
const BINDS_PER_DOCUMENT: usize = 4;
const MAX_DOCUMENTS_PER_STATEMENT: usize = u16::MAX as usize / BINDS_PER_DOCUMENT;

/// Check that `name` is usable as a collection (table) name: `[a-z_][a-z0-9_]*`
pub fn validate_collection_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid_start && valid_rest && name.len() <= 63 {
        Ok(())
    } else {
        Err(ShardloadError::InvalidCollection(name.to_string()))
    }
}

/// One row ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub doc_id: String,
    pub source_file: String,
    pub row_offset: u64,
    pub body: Map<String, Value>,
}

impl Document {
    /// Build a document from a shard row, using the header as field names
    ///
    /// Values are kept verbatim as strings.
    pub fn from_row<'a, I>(source_file: &str, row_offset: u64, header: &[String], values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let body = header
            .iter()
            .zip(values)
            .map(|(name, value)| (name.clone(), Value::String(value.to_string())))
            .collect();

        Self {
            doc_id: row_identity(source_file, row_offset),
            source_file: source_file.to_string(),
            row_offset,
            body,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short name for logs
    fn kind(&self) -> &'static str;

    /// Create the collection if it does not exist yet
    async fn ensure_collection(&self, collection: &str) -> Result<()>;

    /// Insert a batch idempotently, returning how many documents were new
    async fn insert_batch(&self, collection: &str, documents: &[Document]) -> Result<u64>;
}

#[async_trait]
impl<S: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<S> {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        (**self).ensure_collection(collection).await
    }

    async fn insert_batch(&self, collection: &str, documents: &[Document]) -> Result<u64> {
        (**self).insert_batch(collection, documents).await
    }
}

fn store_error(context: &str, e: sqlx::Error) -> ShardloadError {
    ShardloadError::Store(format!("{}: {}", context, e))
}

/// PostgreSQL-backed document store
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| store_error("Failed to connect to document store", e))?;

        info!(max_connections = config.max_connections, "Document store connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Number of documents in a collection
    pub async fn count(&self, collection: &str) -> Result<u64> {
        validate_collection_name(collection)?;
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", collection))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("Failed to count documents", e))?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;

        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                doc_id TEXT PRIMARY KEY,
                source_file TEXT NOT NULL,
                row_offset BIGINT NOT NULL,
                document JSONB NOT NULL,
                loaded_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            collection
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("Failed to create collection", e))?;

        debug!(collection, "Collection ready");
        Ok(())
    }

    async fn insert_batch(&self, collection: &str, documents: &[Document]) -> Result<u64> {
        validate_collection_name(collection)?;
        if documents.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("Failed to begin transaction", e))?;

        let mut inserted = 0;
        for chunk in documents.chunks(MAX_DOCUMENTS_PER_STATEMENT) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (doc_id, source_file, row_offset, document) ",
                collection
            ));
            query_builder.push_values(chunk, |mut b, doc| {
                b.push_bind(&doc.doc_id)
                    .push_bind(&doc.source_file)
                    .push_bind(doc.row_offset as i64)
                    .push_bind(Value::Object(doc.body.clone()));
            });
            query_builder.push(" ON CONFLICT (doc_id) DO NOTHING");

            let result = query_builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| store_error("Failed to insert documents", e))?;
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| store_error("Failed to commit batch", e))?;

        Ok(inserted)
    }
}

/// In-memory document store keyed by `doc_id`
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, BTreeMap<String, Document>>>> {
        self.collections
            .lock()
            .map_err(|_| ShardloadError::Store("memory store lock poisoned".to_string()))
    }

    pub fn count(&self, collection: &str) -> usize {
        self.lock()
            .map(|c| c.get(collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock()
            .map(|c| c.get(collection).map(|docs| docs.values().cloned().collect()).unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().map(|c| c.keys().cloned().collect()).unwrap_or_default();
        names.sort();
        names
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;
        self.lock()?.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn insert_batch(&self, collection: &str, documents: &[Document]) -> Result<u64> {
        validate_collection_name(collection)?;
        let mut collections = self.lock()?;
        let docs = collections.entry(collection.to_string()).or_default();

        let mut inserted = 0;
        for doc in documents {
            if !docs.contains_key(&doc.doc_id) {
                docs.insert(doc.doc_id.clone(), doc.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_validate_collection_name() {
        assert!(validate_collection_name("comments").is_ok());
        assert!(validate_collection_name("_raw_2019").is_ok());
        assert!(validate_collection_name("Comments").is_err());
        assert!(validate_collection_name("2019").is_err());
        assert!(validate_collection_name("a-b").is_err());
        assert!(validate_collection_name("x; DROP TABLE y").is_err());
        assert!(validate_collection_name("").is_err());
    }

    #[test]
    fn test_document_from_row() {
        let doc = Document::from_row("s.csv", 7, &header(&["a", "b"]), ["1", ""]);
        assert_eq!(doc.body.get("a"), Some(&Value::String("1".into())));
        assert_eq!(doc.body.get("b"), Some(&Value::String(String::new())));
        assert_eq!(doc.doc_id, row_identity("s.csv", 7));
        assert_eq!(doc.row_offset, 7);
    }

    #[tokio::test]
    async fn test_memory_store_is_idempotent() {
        let store = MemoryDocumentStore::new();
        store.ensure_collection("comments").await.unwrap();

        let h = header(&["a"]);
        let batch: Vec<_> = (0..3).map(|i| Document::from_row("s.csv", i, &h, ["x"])).collect();

        assert_eq!(store.insert_batch("comments", &batch).await.unwrap(), 3);
        assert_eq!(store.insert_batch("comments", &batch[1..]).await.unwrap(), 0);
        assert_eq!(store.count("comments"), 3);
        assert_eq!(store.collections(), vec!["comments"]);
    }

    #[tokio::test]
    async fn test_memory_store_rejects_bad_collection() {
        let store = MemoryDocumentStore::new();
        let err = store.ensure_collection("Bad Name").await.unwrap_err();
        assert!(matches!(err, ShardloadError::InvalidCollection(_)));
    }
}
