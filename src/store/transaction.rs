//! Optimistic transactions over the document store.
//!
//! Reads go straight to the database and remember the version they saw.
//! Writes are buffered in the handle and only reach the database at commit,
//! inside a single `BEGIN IMMEDIATE` transaction that re-checks every
//! remembered version. Any mismatch aborts the commit with a conflict.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{RunQueryDsl, SimpleAsyncConnection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::pool::{SqliteConn, SqlitePool};
use super::schema::documents;
use super::util::{is_contention, merge_top_level};
use super::{decode, DocumentRecord, StoreError};

/// (collection, id)
type DocKey = (String, String);

/// What a read saw: the document body and its version, or absence.
#[derive(Debug, Clone)]
struct Observed {
    data: Option<Value>,
    version: Option<i64>,
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Set(Value),
    Delete,
}

fn key(collection: &str, id: &str) -> DocKey {
    (collection.to_string(), id.to_string())
}

/// Map a diesel error raised during commit, treating lock contention as a
/// conflict so the caller re-runs the transaction.
fn classify(e: diesel::result::Error) -> StoreError {
    if is_contention(&e) {
        StoreError::Conflict(e.to_string())
    } else {
        StoreError::Database(e)
    }
}

/// Handle passed to a transaction body.
pub struct Transaction {
    conn: SqliteConn,
    reads: HashMap<DocKey, Observed>,
    writes: BTreeMap<DocKey, PendingWrite>,
}

impl Transaction {
    pub(super) async fn begin(pool: &SqlitePool) -> Result<Self, StoreError> {
        Ok(Self {
            conn: pool.get().await?,
            reads: HashMap::new(),
            writes: BTreeMap::new(),
        })
    }

    /// Read a typed document.
    pub async fn get<T: DeserializeOwned>(
        &mut self,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get_value(collection, id).await? {
            Some(value) => decode(id, value).map(Some),
            None => Ok(None),
        }
    }

    /// Read a raw JSON document.
    ///
    /// Repeated reads of the same document return the first observation.
    pub async fn get_value(
        &mut self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, StoreError> {
        if !self.writes.is_empty() {
            return Err(StoreError::ReadAfterWrite {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        let doc_key = key(collection, id);
        if let Some(observed) = self.reads.get(&doc_key) {
            return Ok(observed.data.clone());
        }

        let record = documents::table
            .filter(documents::collection.eq(collection))
            .filter(documents::id.eq(id))
            .select(DocumentRecord::as_select())
            .first::<DocumentRecord>(&mut self.conn)
            .await
            .optional()?;

        let observed = match record {
            Some(record) => Observed {
                data: Some(serde_json::from_str(&record.data)?),
                version: Some(record.version),
            },
            None => Observed {
                data: None,
                version: None,
            },
        };

        let data = observed.data.clone();
        self.reads.insert(doc_key, observed);
        Ok(data)
    }

    /// Buffer a full replacement of a document.
    pub fn set<T: Serialize>(
        &mut self,
        collection: &str,
        id: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        self.set_value(collection, id, serde_json::to_value(value)?)
    }

    /// Buffer a full replacement of a document from raw JSON.
    pub fn set_value(&mut self, collection: &str, id: &str, value: Value) -> Result<(), StoreError> {
        self.writes
            .insert(key(collection, id), PendingWrite::Set(value));
        Ok(())
    }

    /// Buffer a merge of top-level fields into a document read earlier in
    /// this transaction.
    pub fn update(&mut self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        let doc_key = key(collection, id);

        let mut base = match self.writes.get(&doc_key) {
            Some(PendingWrite::Set(value)) => value.clone(),
            Some(PendingWrite::Delete) => return Err(StoreError::not_found(collection, id)),
            None => match self.reads.get(&doc_key) {
                Some(Observed {
                    data: Some(value), ..
                }) => value.clone(),
                Some(Observed { data: None, .. }) => {
                    return Err(StoreError::not_found(collection, id))
                }
                None => {
                    return Err(StoreError::UnreadUpdate {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    })
                }
            },
        };

        merge_top_level(&mut base, &patch);
        self.writes.insert(doc_key, PendingWrite::Set(base));
        Ok(())
    }

    /// Buffer deletion of a document.
    pub fn delete(&mut self, collection: &str, id: &str) {
        self.writes.insert(key(collection, id), PendingWrite::Delete);
    }

    /// Number of buffered writes.
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Apply buffered writes atomically, validating every read.
    pub(super) async fn commit(mut self) -> Result<(), StoreError> {
        if self.writes.is_empty() {
            // Read-only transactions have nothing to publish.
            return Ok(());
        }

        self.conn
            .batch_execute("BEGIN IMMEDIATE")
            .await
            .map_err(classify)?;

        match self.apply().await {
            Ok(()) => {
                if let Err(e) = self.conn.batch_execute("COMMIT").await {
                    if let Err(rollback) = self.conn.batch_execute("ROLLBACK").await {
                        warn!("Rollback after failed commit also failed: {}", rollback);
                    }
                    return Err(classify(e));
                }
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.conn.batch_execute("ROLLBACK").await {
                    warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn apply(&mut self) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let writes = std::mem::take(&mut self.writes);

        for ((collection, id), write) in &writes {
            let expected = self
                .reads
                .get(&(collection.clone(), id.clone()))
                .map(|observed| observed.version);

            match (write, expected) {
                (PendingWrite::Set(value), Some(Some(version))) => {
                    let body = serde_json::to_string(value)?;
                    let rows = diesel::update(
                        documents::table
                            .filter(documents::collection.eq(collection))
                            .filter(documents::id.eq(id))
                            .filter(documents::version.eq(version)),
                    )
                    .set((
                        documents::data.eq(&body),
                        documents::version.eq(version + 1),
                        documents::updated_at.eq(&now),
                    ))
                    .execute(&mut self.conn)
                    .await
                    .map_err(classify)?;

                    if rows == 0 {
                        return Err(StoreError::Conflict(format!(
                            "{}/{} changed since it was read",
                            collection, id
                        )));
                    }
                }
                (PendingWrite::Set(value), Some(None)) => {
                    // Read as absent: a concurrent create surfaces as a unique violation.
                    self.insert(collection, id, value, &now).await?;
                }
                (PendingWrite::Set(value), None) => {
                    let body = serde_json::to_string(value)?;
                    let rows = diesel::update(
                        documents::table
                            .filter(documents::collection.eq(collection))
                            .filter(documents::id.eq(id)),
                    )
                    .set((
                        documents::data.eq(&body),
                        documents::version.eq(documents::version + 1),
                        documents::updated_at.eq(&now),
                    ))
                    .execute(&mut self.conn)
                    .await
                    .map_err(classify)?;

                    if rows == 0 {
                        self.insert(collection, id, value, &now).await?;
                    }
                }
                (PendingWrite::Delete, Some(Some(version))) => {
                    let rows = diesel::delete(
                        documents::table
                            .filter(documents::collection.eq(collection))
                            .filter(documents::id.eq(id))
                            .filter(documents::version.eq(version)),
                    )
                    .execute(&mut self.conn)
                    .await
                    .map_err(classify)?;

                    if rows == 0 {
                        return Err(StoreError::Conflict(format!(
                            "{}/{} changed before it could be deleted",
                            collection, id
                        )));
                    }
                }
                (PendingWrite::Delete, Some(None)) => {
                    if self.current_version(collection, id).await?.is_some() {
                        return Err(StoreError::Conflict(format!(
                            "{}/{} was created concurrently",
                            collection, id
                        )));
                    }
                }
                (PendingWrite::Delete, None) => {
                    diesel::delete(
                        documents::table
                            .filter(documents::collection.eq(collection))
                            .filter(documents::id.eq(id)),
                    )
                    .execute(&mut self.conn)
                    .await
                    .map_err(classify)?;
                }
            }
        }

        // Documents that were read but not written must still be unchanged.
        let read_only: Vec<(DocKey, Option<i64>)> = self
            .reads
            .iter()
            .filter(|(doc_key, _)| !writes.contains_key(*doc_key))
            .map(|(doc_key, observed)| (doc_key.clone(), observed.version))
            .collect();

        for ((collection, id), version) in read_only {
            if self.current_version(&collection, &id).await? != version {
                return Err(StoreError::Conflict(format!(
                    "{}/{} changed since it was read",
                    collection, id
                )));
            }
        }

        debug!("Committed {} document writes", writes.len());
        Ok(())
    }

    async fn insert(
        &mut self,
        collection: &str,
        id: &str,
        value: &Value,
        now: &str,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(value)?;
        diesel::insert_into(documents::table)
            .values((
                documents::collection.eq(collection),
                documents::id.eq(id),
                documents::data.eq(&body),
                documents::version.eq(1i64),
                documents::updated_at.eq(now),
            ))
            .execute(&mut self.conn)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn current_version(
        &mut self,
        collection: &str,
        id: &str,
    ) -> Result<Option<i64>, StoreError> {
        documents::table
            .filter(documents::collection.eq(collection))
            .filter(documents::id.eq(id))
            .select(documents::version)
            .first::<i64>(&mut self.conn)
            .await
            .optional()
            .map_err(classify)
    }
}
