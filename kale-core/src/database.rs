//! Database handle shared by every model bound to the same store.
//!
//! A [`Database`] wraps one [`StoreBackend`] and hands out collections. It is
//! a cheap, clonable handle; every clone talks to the same backend and shares
//! the same per-model collection proxies, so identity maps are shared too.
//!
//! # Example
//!
//! ```ignore
//! use kale::{database::Database, memory::InMemoryStore};
//!
//! let db = Database::new(InMemoryStore::new());
//! let users = db.collection("users");
//! users.insert(doc! { "name": "alice" }).await?;
//! ```

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::debug;

use crate::{
    backend::{StoreBackend, StoreBackendBuilder},
    collection::{ProxyShared, RawCollection},
    error::KaleResult,
    model::Model,
};

type ProxyCache = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

struct DatabaseInner {
    backend: Arc<dyn StoreBackend>,
    proxies: Mutex<ProxyCache>,
}

/// A handle to one document store.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Creates a database over the given backend.
    pub fn new(backend: impl StoreBackend + 'static) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    /// Creates a database over an already shared backend.
    pub fn from_arc(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                backend,
                proxies: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Builds the backend and wraps it.
    ///
    /// # Errors
    ///
    /// Whatever the builder reports, typically
    /// [`KaleError::Initialization`](crate::error::KaleError::Initialization).
    pub async fn connect<B>(builder: B) -> KaleResult<Self>
    where
        B: StoreBackendBuilder,
        B::Backend: 'static,
    {
        Ok(Self::new(builder.build().await?))
    }

    /// Returns the untyped collection called `name`.
    pub fn collection(&self, name: &str) -> RawCollection {
        RawCollection::new(name.to_string(), self.inner.backend.clone())
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.inner.backend
    }

    pub async fn create_collection(&self, name: &str) -> KaleResult<()> {
        self.inner.backend.create_collection(name).await
    }

    /// Drops a collection and all its documents. Missing collections are ignored.
    pub async fn drop_collection(&self, name: &str) -> KaleResult<()> {
        debug!(collection = name, "dropping collection");
        self.inner.backend.drop_collection(name).await
    }

    pub async fn list_collections(&self) -> KaleResult<Vec<String>> {
        self.inner.backend.list_collections().await
    }

    /// Shuts down the backend.
    pub async fn shutdown(&self) -> KaleResult<()> {
        self.inner.backend.shutdown().await
    }

    /// Returns `true` if both handles refer to the same database.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.inner, &other.inner)
    }

    /// Returns the proxy state for model `T`, creating it on first use.
    ///
    /// The first caller fixes the collection name for the lifetime of this database.
    pub(crate) fn proxy<T: Model>(&self, name: &str) -> Arc<ProxyShared<T>> {
        let mut proxies = self
            .inner
            .proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let entry = proxies
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                debug!(model = std::any::type_name::<T>(), collection = name, "binding model to collection");
                Arc::new(ProxyShared::<T>::new(self.collection(name)))
            });

        match entry.clone().downcast::<ProxyShared<T>>() {
            Ok(shared) => shared,
            Err(_) => unreachable!("proxy cache entries are keyed by their own type id"),
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.inner.backend)
            .finish()
    }
}
