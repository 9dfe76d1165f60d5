//! Collection handles.
//!
//! - [`RawCollection`] talks to the backend directly in raw BSON documents.
//! - [`CollectionProxy`] is the model-aware view of a collection: reads come
//!   back as [`Instance`]s routed through the collection's identity map, so
//!   two reads of the same document while an instance is alive return the
//!   same object.
//!
//! # Example
//!
//! ```ignore
//! let users = User::collection()?;
//!
//! let alice = users.find_one(Filter::eq("name", "alice")).await?;
//! let first_ten = users.find(Query::new()).slice(..10)?.try_collect().await?;
//! let raw = users.raw().find_one(Query::new()).await?;
//! ```

use std::{fmt, marker::PhantomData, sync::Arc};

use bson::{Bson, Document};
use tracing::trace;

use crate::{
    backend::{RawCursor, StoreBackend},
    container::{AttrContainer, ID_KEY},
    cursor::CursorProxy,
    error::KaleResult,
    identity::IdentityMap,
    model::{Instance, Model},
    query::{Expr, Query},
    value::Value,
};

/// An untyped collection: raw documents in, raw documents out.
#[derive(Clone)]
pub struct RawCollection {
    name: String,
    backend: Arc<dyn StoreBackend>,
}

impl RawCollection {
    pub(crate) fn new(name: String, backend: Arc<dyn StoreBackend>) -> Self {
        Self { name, backend }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts a document, returning its (possibly freshly assigned) identifier.
    ///
    /// # Errors
    ///
    /// [`KaleError::DuplicateIdentifier`](crate::error::KaleError::DuplicateIdentifier)
    /// if the document's `_id` is already stored.
    pub async fn insert(&self, document: Document) -> KaleResult<Bson> {
        self.backend
            .insert_document(document, &self.name)
            .await
    }

    /// Replaces the document stored under `id`, inserting it if absent.
    pub async fn replace(&self, id: Bson, document: Document) -> KaleResult<()> {
        self.backend
            .replace_document(id, document, &self.name)
            .await
    }

    /// Deletes every matching document (every document for `None`) and returns the count.
    pub async fn delete_many(&self, filter: Option<Expr>) -> KaleResult<u64> {
        self.backend
            .delete_documents(filter, &self.name)
            .await
    }

    pub async fn find_one(&self, query: impl Into<Query>) -> KaleResult<Option<Document>> {
        self.backend
            .find_one(query.into(), &self.name)
            .await
    }

    /// Opens a raw cursor over the matching documents.
    pub async fn find(&self, query: impl Into<Query>) -> KaleResult<Box<dyn RawCursor>> {
        self.backend
            .find(query.into(), &self.name)
            .await
    }

    pub async fn count(&self, filter: Option<Expr>) -> KaleResult<u64> {
        self.backend
            .count_documents(filter, &self.name)
            .await
    }

    /// Drops the collection and all its documents.
    pub async fn drop(&self) -> KaleResult<()> {
        self.backend.drop_collection(&self.name).await
    }

    pub async fn add_index(&self, field: &str, unique: bool) -> KaleResult<()> {
        self.backend
            .add_index(&self.name, field, unique)
            .await
    }

    pub async fn drop_index(&self, field: &str) -> KaleResult<()> {
        self.backend
            .drop_index(&self.name, field)
            .await
    }
}

impl fmt::Debug for RawCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCollection")
            .field("name", &self.name)
            .finish()
    }
}

/// Normalizes a stored `_id` to the form an instance carries it in, so that
/// identifiers read from the store and identifiers held by instances key the
/// identity map alike.
pub(crate) fn identity_key(id: Bson) -> KaleResult<Bson> {
    Value::from_bson(id)?.to_bson()
}

/// State shared by every handle to one model's collection.
pub(crate) struct ProxyShared<T> {
    raw: RawCollection,
    identity: IdentityMap,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ProxyShared<T> {
    pub(crate) fn new(raw: RawCollection) -> Self {
        Self {
            raw,
            identity: IdentityMap::new(),
            _marker: PhantomData,
        }
    }
}

/// Model-aware view of the collection backing `T`.
pub struct CollectionProxy<T: Model> {
    shared: Arc<ProxyShared<T>>,
}

impl<T: Model> Clone for CollectionProxy<T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T: Model> CollectionProxy<T> {
    pub(crate) fn from_shared(shared: Arc<ProxyShared<T>>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<ProxyShared<T>> {
        &self.shared
    }

    pub(crate) fn identity(&self) -> &IdentityMap {
        &self.shared.identity
    }

    pub fn name(&self) -> &str {
        self.shared.raw.name()
    }

    /// The underlying collection, bypassing hydration.
    pub fn raw(&self) -> &RawCollection {
        &self.shared.raw
    }

    /// Returns the first matching document as an instance.
    pub async fn find_one(&self, query: impl Into<Query>) -> KaleResult<Option<Instance<T>>> {
        match self.shared.raw.find_one(query).await? {
            Some(document) => self.hydrate(document).map(Some),
            None => Ok(None),
        }
    }

    /// Returns a lazy cursor over the matching documents. Nothing is fetched
    /// until the cursor is first advanced.
    pub fn find(&self, query: impl Into<Query>) -> CursorProxy<T> {
        CursorProxy::new(self.clone(), query.into())
    }

    /// Turns a raw document into an instance.
    ///
    /// If an instance for the document's `_id` is still alive, that instance is
    /// returned unchanged. Otherwise a new instance is built from the document
    /// and, if it has an identifier, tracked.
    pub fn hydrate(&self, document: Document) -> KaleResult<Instance<T>> {
        let id = document
            .get(ID_KEY)
            .cloned()
            .map(identity_key)
            .transpose()?;
        let Some(id) = id else {
            return Ok(Instance::bind(AttrContainer::from_document(document)?, self.clone()));
        };

        if let Some(container) = self.shared.identity.lookup(&id) {
            trace!(%id, collection = self.name(), "hydrate hit");
            return Ok(Instance::bind(container, self.clone()));
        }

        let built = AttrContainer::from_document(document)?;
        let container = match self
            .shared
            .identity
            .register_if_absent(id.clone(), &built)
        {
            Some(live) => {
                trace!(%id, collection = self.name(), "hydrate lost to a concurrent read");
                live
            }
            None => {
                trace!(%id, collection = self.name(), "hydrate miss");
                built
            }
        };

        Ok(Instance::bind(container, self.clone()))
    }

    /// Returns the live instance tracked under `id` without touching the store.
    pub fn tracked(&self, id: impl Into<Bson>) -> Option<Instance<T>> {
        let id = identity_key(id.into()).ok()?;

        self.shared
            .identity
            .lookup(&id)
            .map(|container| Instance::bind(container, self.clone()))
    }

    pub async fn count(&self, filter: Option<Expr>) -> KaleResult<u64> {
        self.shared.raw.count(filter).await
    }

    /// Deletes every matching document. Live instances keep their `_id`.
    pub async fn delete_many(&self, filter: Option<Expr>) -> KaleResult<u64> {
        self.shared.raw.delete_many(filter).await
    }

    pub async fn drop(&self) -> KaleResult<()> {
        self.shared.raw.drop().await
    }

    pub async fn add_index(&self, field: &str, unique: bool) -> KaleResult<()> {
        self.shared.raw.add_index(field, unique).await
    }

    pub async fn drop_index(&self, field: &str) -> KaleResult<()> {
        self.shared.raw.drop_index(field).await
    }
}

impl<T: Model> fmt::Debug for CollectionProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionProxy")
            .field("model", &std::any::type_name::<T>())
            .field("name", &self.name())
            .field("identity", &self.shared.identity)
            .finish()
    }
}
