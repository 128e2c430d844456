//! Embedded JSON document store.
//!
//! Documents are JSON objects grouped into named collections and addressed
//! by id. Everything lives in a single SQLite table accessed through Diesel;
//! each row carries a version that optimistic transactions validate at
//! commit time.
//!
//! # Example
//! ```ignore
//! let store = DocumentStore::open("sqlite:khobor.db");
//! store.init_schema().await?;
//! let outcome = store
//!     .run_transaction(|txn| {
//!         Box::pin(async move {
//!             let article: Option<Article> = txn.get("news", "a1").await?;
//!             Ok(article.is_some())
//!         })
//!     })
//!     .await?;
//! ```

pub mod pool;
pub mod schema;
mod transaction;
pub mod util;

use std::path::Path;
use std::time::Duration;

use diesel::prelude::*;
use diesel_async::{RunQueryDsl, SimpleAsyncConnection};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub use pool::{SqliteConn, SqlitePool};
pub use transaction::Transaction;

use schema::documents;

/// Default number of times a conflicting transaction is re-run.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Base delay between transaction attempts; grows linearly per attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(15);

/// Errors from the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Transaction abandoned after {0} conflicting attempts")]
    Contended(u32),

    #[error("Read of {collection}/{id} after a write in the same transaction")]
    ReadAfterWrite { collection: String, id: String },

    #[error("Update of {collection}/{id} without reading it first in the same transaction")]
    UnreadUpdate { collection: String, id: String },
}

impl StoreError {
    pub(crate) fn not_found(collection: &str, id: &str) -> Self {
        Self::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

/// A raw row of the documents table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = documents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentRecord {
    pub collection: String,
    pub id: String,
    pub data: String,
    pub version: i64,
    pub updated_at: String,
}

/// Decode a stored JSON document into a typed model.
///
/// The document id is injected as `id` when the stored body lacks one, so
/// documents written by other tools still deserialize.
pub(crate) fn decode<T: DeserializeOwned>(id: &str, mut value: Value) -> Result<T, StoreError> {
    if let Some(obj) = value.as_object_mut() {
        obj.entry("id")
            .or_insert_with(|| Value::String(id.to_string()));
    }
    Ok(serde_json::from_value(value)?)
}

/// Transactional JSON document store backed by SQLite.
#[derive(Clone, Debug)]
pub struct DocumentStore {
    pool: SqlitePool,
    max_attempts: u32,
}

impl DocumentStore {
    /// Create a store over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Open a store from a database URL (`sqlite:path` or a bare path).
    pub fn open(database_url: &str) -> Self {
        Self::new(SqlitePool::new(database_url))
    }

    /// Open a store from a database file path.
    pub fn from_path(path: &Path) -> Self {
        Self::new(SqlitePool::from_path(path))
    }

    /// Override how many times a conflicting transaction is attempted.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the documents table if it doesn't exist.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}',
                version INTEGER NOT NULL DEFAULT 1,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );
            CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
            "#,
        )
        .await?;
        Ok(())
    }

    /// Verify that the database can be opened and queried.
    pub async fn test_connection(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute("SELECT 1").await?;
        Ok(())
    }

    /// Get a single document.
    pub async fn get<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, StoreError> {
        let mut conn = self.pool.get().await?;

        let record = documents::table
            .filter(documents::collection.eq(collection))
            .filter(documents::id.eq(id))
            .select(DocumentRecord::as_select())
            .first::<DocumentRecord>(&mut conn)
            .await
            .optional()?;

        match record {
            Some(record) => {
                let value: Value = serde_json::from_str(&record.data)?;
                decode(&record.id, value).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Load every document of a collection, ordered by id.
    pub async fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>, StoreError> {
        let mut conn = self.pool.get().await?;

        let records = documents::table
            .filter(documents::collection.eq(collection))
            .order(documents::id.asc())
            .select(DocumentRecord::as_select())
            .load::<DocumentRecord>(&mut conn)
            .await?;

        let mut docs = Vec::with_capacity(records.len());
        for record in records {
            let value: Value = serde_json::from_str(&record.data)?;
            match decode(&record.id, value) {
                Ok(doc) => docs.push(doc),
                Err(e) => warn!(
                    "Skipping undecodable document {}/{}: {}",
                    collection, record.id, e
                ),
            }
        }
        Ok(docs)
    }

    /// Create or replace a document.
    pub async fn set<T: Serialize>(
        &self,
        collection: &str,
        id: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        let collection = collection.to_string();
        let id = id.to_string();

        self.run_transaction(|txn| {
            let (collection, id, value) = (collection.clone(), id.clone(), value.clone());
            Box::pin(async move { txn.set_value(&collection, &id, value) })
        })
        .await
    }

    /// Merge top-level fields into an existing document.
    pub async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        let collection = collection.to_string();
        let id = id.to_string();

        self.run_transaction(|txn| {
            let (collection, id, patch) = (collection.clone(), id.clone(), patch.clone());
            Box::pin(async move {
                if txn.get_value(&collection, &id).await?.is_none() {
                    return Err(StoreError::not_found(&collection, &id));
                }
                txn.update(&collection, &id, patch)
            })
        })
        .await
    }

    /// Delete a document. Returns whether it existed.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let collection = collection.to_string();
        let id = id.to_string();

        self.run_transaction(|txn| {
            let (collection, id) = (collection.clone(), id.clone());
            Box::pin(async move {
                let existed = txn.get_value(&collection, &id).await?.is_some();
                if existed {
                    txn.delete(&collection, &id);
                }
                Ok(existed)
            })
        })
        .await
    }

    /// Run `body` atomically.
    ///
    /// The body may be invoked several times: whenever commit finds that a
    /// document it read has changed underneath it, the buffered writes are
    /// discarded and the body runs again against fresh reads. Side effects
    /// other than transaction writes must therefore be idempotent.
    pub async fn run_transaction<T, F>(&self, mut body: F) -> Result<T, StoreError>
    where
        F: for<'t> FnMut(&'t mut Transaction) -> BoxFuture<'t, Result<T, StoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut txn = Transaction::begin(&self.pool).await?;
            let value = body(&mut txn).await?;

            match txn.commit().await {
                Ok(()) => return Ok(value),
                Err(StoreError::Conflict(reason)) => {
                    if attempt >= self.max_attempts {
                        warn!(
                            "Transaction abandoned after {} attempts: {}",
                            attempt, reason
                        );
                        return Err(StoreError::Contended(attempt));
                    }
                    debug!("Transaction conflict (attempt {}): {}", attempt, reason);
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        #[serde(default)]
        id: String,
        body: String,
        #[serde(default)]
        hits: i64,
    }

    async fn setup_store() -> (DocumentStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = DocumentStore::from_path(&dir.path().join("test.db"));
        store.init_schema().await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_document_crud() {
        let (store, _dir) = setup_store().await;

        let note = Note {
            id: "n1".to_string(),
            body: "hello".to_string(),
            hits: 0,
        };
        store.set("notes", "n1", &note).await.unwrap();

        let fetched: Note = store.get("notes", "n1").await.unwrap().unwrap();
        assert_eq!(fetched, note);

        store
            .update("notes", "n1", json!({"hits": 5}))
            .await
            .unwrap();
        let fetched: Note = store.get("notes", "n1").await.unwrap().unwrap();
        assert_eq!(fetched.hits, 5);
        assert_eq!(fetched.body, "hello");

        let all: Vec<Note> = store.list("notes").await.unwrap();
        assert_eq!(all.len(), 1);

        assert!(store.delete("notes", "n1").await.unwrap());
        assert!(!store.delete("notes", "n1").await.unwrap());
        assert!(store.get::<Note>("notes", "n1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_document_is_not_found() {
        let (store, _dir) = setup_store().await;

        let err = store
            .update("notes", "missing", json!({"hits": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_id_injected_when_missing_from_body() {
        let (store, _dir) = setup_store().await;

        store
            .set("notes", "raw", &json!({"body": "no id field"}))
            .await
            .unwrap();
        let fetched: Note = store.get("notes", "raw").await.unwrap().unwrap();
        assert_eq!(fetched.id, "raw");
    }

    #[tokio::test]
    async fn test_set_replaces_existing_document() {
        let (store, _dir) = setup_store().await;

        store
            .set("notes", "n1", &json!({"body": "first", "hits": 3}))
            .await
            .unwrap();
        store
            .set("notes", "n1", &json!({"body": "second"}))
            .await
            .unwrap();

        let fetched: Note = store.get("notes", "n1").await.unwrap().unwrap();
        assert_eq!(fetched.body, "second");
        assert_eq!(fetched.hits, 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let (store, _dir) = setup_store().await;
        store
            .set("notes", "counter", &json!({"body": "c", "hits": 0}))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .run_transaction(|txn| {
                        Box::pin(async move {
                            let note: Note = txn
                                .get("notes", "counter")
                                .await?
                                .ok_or_else(|| StoreError::not_found("notes", "counter"))?;
                            txn.update("notes", "counter", json!({"hits": note.hits + 1}))?;
                            Ok(())
                        })
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let note: Note = store.get("notes", "counter").await.unwrap().unwrap();
        assert_eq!(note.hits, 8);
    }
}
