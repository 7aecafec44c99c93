//! MongoDB client and typed collections
//!
//! Each schema declares its own indexes (`IntoIndexes`); they are applied
//! when the collection is opened. Write failures on a unique index surface
//! as `AttestError::Conflict` so both stores report duplicates the same way.

use bson::{doc, Document};
use futures_util::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::{
    options::{IndexOptions, UpdateModifications},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::db::schemas::Metadata;
use crate::types::AttestError;

/// Fail fast instead of hanging when the server is unreachable
const SELECTION_TIMEOUT_MS: u64 = 3_000;

/// Server error code for a unique index violation
const DUPLICATE_KEY: i32 = 11_000;

pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

fn with_selection_timeout(uri: &str) -> String {
    let separator = if uri.contains('?') { '&' } else { '?' };
    format!(
        "{}{}serverSelectionTimeoutMS={}&connectTimeoutMS={}",
        uri, separator, SELECTION_TIMEOUT_MS, SELECTION_TIMEOUT_MS
    )
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and ping. Errors when the server cannot be reached in time.
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, AttestError> {
        info!("Connecting to MongoDB at {}", uri);

        let client = Client::with_uri_str(with_selection_timeout(uri))
            .await
            .map_err(|e| AttestError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| AttestError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Open a typed collection, applying its schema indexes
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, AttestError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        let collection = MongoCollection {
            inner: self.client.database(&self.db_name).collection::<T>(name),
        };
        collection.apply_indexes(name).await?;
        Ok(collection)
    }
}

#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    async fn apply_indexes(&self, name: &str) -> Result<(), AttestError> {
        let indices: Vec<IndexModel> = T::into_indices()
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();
        if indices.is_empty() {
            return Ok(());
        }

        let count = indices.len();
        self.inner.create_indexes(indices).await.map_err(|e| {
            AttestError::Database(format!("Failed to create indexes on {}: {}", name, e))
        })?;
        debug!(collection = name, count, "Indexes applied");
        Ok(())
    }

    /// Insert with fresh metadata. A unique index violation is a `Conflict`.
    pub async fn insert_one(&self, mut item: T) -> Result<(), AttestError> {
        *item.mut_metadata() = Metadata::new();

        match self.inner.insert_one(item).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                Err(AttestError::Conflict("Record already exists".to_string()))
            }
            Err(e) => Err(AttestError::Database(format!("Insert failed: {}", e))),
        }
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, AttestError> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| AttestError::Database(format!("Find failed: {}", e)))
    }

    /// Documents matching `filter` in `sort` order, at most `limit`
    pub async fn find_sorted(
        &self,
        filter: Document,
        sort: Document,
        limit: i64,
    ) -> Result<Vec<T>, AttestError> {
        let cursor = self
            .inner
            .find(filter)
            .sort(sort)
            .limit(limit)
            .await
            .map_err(|e| AttestError::Database(format!("Find failed: {}", e)))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| AttestError::Database(format!("Cursor read failed: {}", e)))
    }

    /// Conditional single-document update; callers inspect `matched_count`
    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult, AttestError> {
        self.inner
            .update_one(filter, update.into())
            .await
            .map_err(|e| AttestError::Database(format!("Update failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_timeout_appended() {
        assert_eq!(
            with_selection_timeout("mongodb://localhost:27017"),
            "mongodb://localhost:27017?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000"
        );
        assert_eq!(
            with_selection_timeout("mongodb://db/?replicaSet=rs0"),
            "mongodb://db/?replicaSet=rs0&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000"
        );
    }
}
