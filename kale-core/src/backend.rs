//! Storage backend abstraction for the document store.
//!
//! The model layer talks to storage only through [`StoreBackend`]. Documents
//! cross this boundary as raw BSON [`Document`]s keyed by the opaque value
//! stored under `_id`; queries cross it as [`Query`] ASTs.
//!
//! # Example
//!
//! ```ignore
//! use kale::backend::StoreBackend;
//! use bson::doc;
//!
//! let id = backend.insert_document(doc! { "name": "Alice" }, "users").await?;
//! let found = backend.find_one(Filter::id(id).into(), "users").await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use std::fmt::Debug;

use crate::{
    error::KaleResult,
    query::{Expr, Query},
};

/// Abstract interface for document storage backends.
///
/// Backends are shared between every collection of a
/// [`Database`](crate::database::Database) and must tolerate concurrent calls.
///
/// Every method takes the collection name last. A collection that does not
/// exist behaves as an empty one for reads and deletes, and is created on the
/// first write.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts a new document and returns its identifier.
    ///
    /// If the document carries an `_id` it is used as-is; otherwise the
    /// backend assigns a fresh one of its own choosing. The document written
    /// to the store always contains `_id`.
    ///
    /// # Errors
    ///
    /// - [`KaleError::DuplicateIdentifier`](crate::error::KaleError::DuplicateIdentifier)
    ///   if a document with the same `_id` already exists.
    /// - [`KaleError::InvalidDocument`](crate::error::KaleError::InvalidDocument)
    ///   if `_id` holds a value the backend cannot use as an identifier.
    async fn insert_document(&self, document: Document, collection: &str) -> KaleResult<Bson>;

    /// Replaces the document stored under `id`, inserting it if absent.
    ///
    /// The stored document's `_id` is always `id`.
    async fn replace_document(
        &self,
        id: Bson,
        document: Document,
        collection: &str,
    ) -> KaleResult<()>;

    /// Deletes every document matching `filter` (every document when `None`)
    /// and returns how many were removed.
    async fn delete_documents(&self, filter: Option<Expr>, collection: &str) -> KaleResult<u64>;

    /// Returns the first document matching the query, honoring its sort and offset.
    async fn find_one(&self, query: Query, collection: &str) -> KaleResult<Option<Document>>;

    /// Opens a cursor over every document matching the query.
    async fn find(&self, query: Query, collection: &str) -> KaleResult<Box<dyn RawCursor>>;

    /// Counts documents matching `filter` (every document when `None`).
    async fn count_documents(&self, filter: Option<Expr>, collection: &str) -> KaleResult<u64>;

    /// Creates an empty collection. Creating an existing collection is not an error.
    async fn create_collection(&self, name: &str) -> KaleResult<()>;

    /// Drops a collection and all its documents. Dropping a missing collection is a no-op.
    async fn drop_collection(&self, name: &str) -> KaleResult<()>;

    /// Lists the names of all collections in the store.
    async fn list_collections(&self) -> KaleResult<Vec<String>>;

    /// Creates an index on a field in a collection.
    ///
    /// # Errors
    ///
    /// If `unique` is true and existing documents violate the constraint,
    /// the backend returns an error.
    async fn add_index(&self, collection: &str, field: &str, unique: bool) -> KaleResult<()>;

    /// Removes the index on a field.
    async fn drop_index(&self, collection: &str, field: &str) -> KaleResult<()>;

    /// Releases connections and other resources held by the backend.
    async fn shutdown(&self) -> KaleResult<()> {
        Ok(())
    }
}

/// A forward-only stream of raw documents produced by [`StoreBackend::find`].
///
/// Once `next_document` has returned `Ok(None)` the cursor is exhausted.
#[async_trait]
pub trait RawCursor: Send {
    async fn next_document(&mut self) -> KaleResult<Option<Document>>;
}

/// Factory for backends that need asynchronous setup (connecting, seeding).
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> KaleResult<Self::Backend>;
}
