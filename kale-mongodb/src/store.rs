use async_trait::async_trait;
use bson::{Bson, Document, doc};
use mongodb::{
    Client, Collection as MongoCollection, Cursor, IndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, FindOneOptions, FindOptions, IndexOptions},
};
use tracing::debug;

use kale_core::{
    backend::{RawCursor, StoreBackend, StoreBackendBuilder},
    container::ID_KEY,
    error::{KaleError, KaleResult},
    query::{Expr, Query, Sort, SortDirection},
};

use crate::query::MongoQueryTranslator;

const DUPLICATE_KEY: i32 = 11000;
const NAMESPACE_EXISTS: i32 = 48;
const NAMESPACE_NOT_FOUND: i32 = 26;

fn backend_error(err: MongoError) -> KaleError {
    KaleError::Backend(err.to_string())
}

fn error_code(err: &MongoError) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        _ => None,
    }
}

fn sort_document(sort: &Sort) -> Document {
    doc! {
        sort.field.clone(): match sort.direction {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// A negative limit means "single batch" to the server, so large limits saturate.
fn find_options(query: &Query) -> FindOptions {
    let mut options = FindOptions::default();

    if let Some(limit) = query.limit {
        options.limit = Some(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if let Some(skip) = query.offset {
        options.skip = Some(skip as u64);
    }
    if let Some(sort) = &query.sort {
        options.sort = Some(sort_document(sort));
    }

    options
}

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert_document(&self, document: Document, collection: &str) -> KaleResult<Bson> {
        let requested = document
            .get(ID_KEY)
            .map(ToString::to_string);

        let result = self
            .get_collection(collection)
            .insert_one(document)
            .await
            .map_err(|e| match error_code(&e) {
                Some(DUPLICATE_KEY) => KaleError::DuplicateIdentifier(
                    requested.unwrap_or_default(),
                    collection.to_string(),
                ),
                _ => backend_error(e),
            })?;

        Ok(result.inserted_id)
    }

    async fn replace_document(&self, id: Bson, mut document: Document, collection: &str) -> KaleResult<()> {
        document.insert(ID_KEY, id.clone());

        self.get_collection(collection)
            .replace_one(doc! { ID_KEY: id }, document)
            .upsert(true)
            .await
            .map_err(backend_error)?;

        Ok(())
    }

    async fn delete_documents(&self, filter: Option<Expr>, collection: &str) -> KaleResult<u64> {
        Ok(self
            .get_collection(collection)
            .delete_many(MongoQueryTranslator::translate(filter.as_ref())?)
            .await
            .map_err(backend_error)?
            .deleted_count)
    }

    async fn find_one(&self, query: Query, collection: &str) -> KaleResult<Option<Document>> {
        let mut options = FindOneOptions::default();

        if let Some(skip) = query.offset {
            options.skip = Some(skip as u64);
        }
        if let Some(sort) = &query.sort {
            options.sort = Some(sort_document(sort));
        }

        if query.limit == Some(0) {
            return Ok(None);
        }

        self.get_collection(collection)
            .find_one(MongoQueryTranslator::translate(query.filter.as_ref())?)
            .with_options(options)
            .await
            .map_err(backend_error)
    }

    async fn find(&self, query: Query, collection: &str) -> KaleResult<Box<dyn RawCursor>> {
        // The driver reads a limit of zero as "no limit".
        if query.limit == Some(0) {
            return Ok(Box::new(MongoCursor { inner: None }));
        }

        let options = find_options(&query);
        let cursor = self
            .get_collection(collection)
            .find(MongoQueryTranslator::translate(query.filter.as_ref())?)
            .with_options(options)
            .await
            .map_err(backend_error)?;

        Ok(Box::new(MongoCursor { inner: Some(cursor) }))
    }

    async fn count_documents(&self, filter: Option<Expr>, collection: &str) -> KaleResult<u64> {
        self.get_collection(collection)
            .count_documents(MongoQueryTranslator::translate(filter.as_ref())?)
            .await
            .map_err(backend_error)
    }

    async fn create_collection(&self, name: &str) -> KaleResult<()> {
        match self
            .client
            .database(&self.database)
            .create_collection(name)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if error_code(&e) == Some(NAMESPACE_EXISTS) => Ok(()),
            Err(e) => Err(backend_error(e)),
        }
    }

    async fn drop_collection(&self, name: &str) -> KaleResult<()> {
        match self.get_collection(name).drop().await {
            Ok(()) => Ok(()),
            Err(e) if error_code(&e) == Some(NAMESPACE_NOT_FOUND) => Ok(()),
            Err(e) => Err(backend_error(e)),
        }
    }

    async fn list_collections(&self) -> KaleResult<Vec<String>> {
        let mut names = self
            .client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(backend_error)?;
        names.sort();

        Ok(names)
    }

    async fn add_index(&self, collection: &str, field: &str, unique: bool) -> KaleResult<()> {
        self.get_collection(collection)
            .create_index(
                IndexModel::builder()
                .keys(doc! { field: 1 })
                .options(
                    IndexOptions::builder()
                    .name(field.to_string())
                    .unique(unique)
                    .build()
                )
                .build()
            )
            .await
            .map_err(backend_error)?;

        Ok(())
    }

    async fn drop_index(&self, collection: &str, field: &str) -> KaleResult<()> {
        self.get_collection(collection)
            .drop_index(field)
            .await
            .map_err(backend_error)?;

        Ok(())
    }

    async fn shutdown(&self) -> KaleResult<()> {
        debug!(database = %self.database, "shutting down mongodb client");
        self.client.clone().shutdown().await;

        Ok(())
    }
}

/// Pulls documents from a driver cursor one batch at a time.
struct MongoCursor {
    inner: Option<Cursor<Document>>,
}

#[async_trait]
impl RawCursor for MongoCursor {
    async fn next_document(&mut self) -> KaleResult<Option<Document>> {
        let Some(cursor) = self.inner.as_mut() else {
            return Ok(None);
        };

        if !cursor.advance().await.map_err(backend_error)? {
            self.inner = None;
            return Ok(None);
        }

        Ok(Some(cursor.deserialize_current().map_err(backend_error)?))
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> KaleResult<Self::Backend> {
        debug!(database = %self.database, "connecting to mongodb");

        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| KaleError::Initialization(e.to_string()))?,
            )
            .map_err(|e| KaleError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_options_carry_the_window() {
        let query = Query::builder()
            .offset(20)
            .limit(5)
            .sort("n", SortDirection::Desc)
            .build();

        let options = find_options(&query);

        assert_eq!(options.skip, Some(20));
        assert_eq!(options.limit, Some(5));
        assert_eq!(options.sort, Some(doc! { "n": -1 }));
    }

    #[test]
    fn oversized_limits_saturate() {
        let query = Query::builder().limit(usize::MAX).build();

        assert_eq!(find_options(&query).limit, Some(i64::MAX));
    }
}
