//! In-memory storage implementation.
//!
//! Collections are kept in insertion order behind an async-aware read-write
//! lock. Queries scan the whole collection.

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc};
use tracing::trace;

use kale_core::{
    backend::{RawCursor, StoreBackend, StoreBackendBuilder},
    container::ID_KEY,
    error::{KaleError, KaleResult},
    query::{Expr, Query, SortDirection},
};

use crate::evaluator::{Comparable, DocumentEvaluator, compare_field, lookup};

#[derive(Debug, Default, Clone)]
struct CollectionData {
    /// Documents in insertion order. Replacing keeps a document's position.
    documents: Vec<(Bson, Document)>,
    /// Indexed field -> unique.
    indexes: HashMap<String, bool>,
}

impl CollectionData {
    fn position(&self, id: &Bson) -> Option<usize> {
        self.documents
            .iter()
            .position(|(existing, _)| same_id(existing, id))
    }

    /// Fails if storing `document` under `id` would break a unique index.
    fn check_unique(&self, id: &Bson, document: &Document, collection: &str) -> KaleResult<()> {
        for field in self
            .indexes
            .iter()
            .filter(|(_, unique)| **unique)
            .map(|(field, _)| field)
        {
            let Some(value) = lookup(document, field) else {
                continue;
            };
            let value = Comparable::from(value);

            let clash = self
                .documents
                .iter()
                .filter(|(other, _)| !same_id(other, id))
                .filter_map(|(_, other)| lookup(other, field))
                .any(|other| Comparable::from(other) == value);

            if clash {
                return Err(KaleError::Backend(format!(
                    "duplicate value for unique index '{field}' in collection {collection}"
                )));
            }
        }

        Ok(())
    }
}

/// Numeric identifiers match across integer and double types, as in queries.
fn same_id(a: &Bson, b: &Bson) -> bool {
    match (Comparable::from(a), Comparable::from(b)) {
        (Comparable::Number(x), Comparable::Number(y)) => x == y,
        _ => a == b,
    }
}

type StoreMap = HashMap<String, CollectionData>;

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, so
/// clones share the same underlying data.
///
/// # Example
///
/// ```ignore
/// use kale_memory::InMemoryStore;
/// use kale::backend::StoreBackend;
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let id = store.insert_document(doc! { "name": "Alice" }, "users").await?;
/// assert_eq!(store.count_documents(None, "users").await?, 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Runs `query` against a snapshot of the collection.
    async fn select(&self, query: &Query, collection: &str) -> KaleResult<Vec<Document>> {
        let store = self.store.read().await;
        let Some(data) = store.get(collection) else {
            return Ok(Vec::new());
        };

        let mut selected = Vec::new();
        for (_, document) in &data.documents {
            if DocumentEvaluator::matches(document, query.filter.as_ref())? {
                selected.push(document.clone());
            }
        }

        if let Some(sort) = &query.sort {
            selected.sort_by(|a, b| match sort.direction {
                SortDirection::Asc => compare_field(a, b, &sort.field),
                SortDirection::Desc => compare_field(b, a, &sort.field),
            });
        }

        Ok(selected
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }
}

/// Rejects keys no document store accepts.
fn validate_keys(document: &Document) -> KaleResult<()> {
    for (key, value) in document {
        if key.starts_with('$') || key.contains('\0') {
            return Err(KaleError::UnsupportedValue(format!("invalid field name {key:?}")));
        }
        validate_value(value)?;
    }

    Ok(())
}

/// Arrays and regular expressions cannot identify a document.
fn validate_id(id: &Bson) -> KaleResult<()> {
    match id {
        Bson::Array(_) | Bson::RegularExpression(_) | Bson::Undefined => Err(KaleError::InvalidDocument(
            format!("{ID_KEY} cannot be of type {:?}", id.element_type()),
        )),
        _ => Ok(()),
    }
}

fn validate_value(value: &Bson) -> KaleResult<()> {
    match value {
        Bson::Document(inner) => validate_keys(inner),
        Bson::Array(items) => items.iter().try_for_each(validate_value),
        _ => Ok(()),
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_document(&self, mut document: Document, collection: &str) -> KaleResult<Bson> {
        validate_keys(&document)?;
        let id = match document.get(ID_KEY).cloned() {
            Some(id) => {
                validate_id(&id)?;
                id
            }
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                document.insert(ID_KEY, id.clone());
                id
            }
        };

        let mut store = self.store.write().await;
        let data = store
            .entry(collection.to_string())
            .or_default();

        if data.position(&id).is_some() {
            return Err(KaleError::DuplicateIdentifier(id.to_string(), collection.to_string()));
        }
        data.check_unique(&id, &document, collection)?;
        trace!(%id, collection, "stored document");
        data.documents.push((id.clone(), document));

        Ok(id)
    }

    async fn replace_document(&self, id: Bson, mut document: Document, collection: &str) -> KaleResult<()> {
        validate_keys(&document)?;
        validate_id(&id)?;
        document.insert(ID_KEY, id.clone());

        let mut store = self.store.write().await;
        let data = store
            .entry(collection.to_string())
            .or_default();
        data.check_unique(&id, &document, collection)?;

        match data.position(&id) {
            Some(position) => data.documents[position].1 = document,
            None => data.documents.push((id, document)),
        }

        Ok(())
    }

    async fn delete_documents(&self, filter: Option<Expr>, collection: &str) -> KaleResult<u64> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(collection) else {
            return Ok(0);
        };

        let doomed = data
            .documents
            .iter()
            .map(|(_, document)| DocumentEvaluator::matches(document, filter.as_ref()))
            .collect::<KaleResult<Vec<bool>>>()?;
        let deleted = doomed.iter().filter(|hit| **hit).count() as u64;

        let mut doomed = doomed.into_iter();
        data.documents
            .retain(|_| !doomed.next().unwrap_or(false));

        Ok(deleted)
    }

    async fn find_one(&self, query: Query, collection: &str) -> KaleResult<Option<Document>> {
        let query = Query { limit: Some(1), ..query };

        Ok(self
            .select(&query, collection)
            .await?
            .into_iter()
            .next())
    }

    async fn find(&self, query: Query, collection: &str) -> KaleResult<Box<dyn RawCursor>> {
        let documents = self.select(&query, collection).await?;

        Ok(Box::new(VecCursor { documents: documents.into_iter() }))
    }

    async fn count_documents(&self, filter: Option<Expr>, collection: &str) -> KaleResult<u64> {
        let store = self.store.read().await;
        let Some(data) = store.get(collection) else {
            return Ok(0);
        };

        let mut count = 0;
        for (_, document) in &data.documents {
            if DocumentEvaluator::matches(document, filter.as_ref())? {
                count += 1;
            }
        }

        Ok(count)
    }

    async fn create_collection(&self, name: &str) -> KaleResult<()> {
        self.store
            .write()
            .await
            .entry(name.to_string())
            .or_default();

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> KaleResult<()> {
        self.store.write().await.remove(name);

        Ok(())
    }

    async fn list_collections(&self) -> KaleResult<Vec<String>> {
        let mut names = self
            .store
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();

        Ok(names)
    }

    async fn add_index(&self, collection: &str, field: &str, unique: bool) -> KaleResult<()> {
        let mut store = self.store.write().await;
        let data = store
            .entry(collection.to_string())
            .or_default();

        if unique {
            let mut seen: Vec<Comparable<'_>> = Vec::new();
            for value in data
                .documents
                .iter()
                .filter_map(|(_, document)| lookup(document, field))
                .map(Comparable::from)
            {
                if seen.contains(&value) {
                    return Err(KaleError::Backend(format!(
                        "cannot add unique index '{field}' to collection {collection}: duplicate values"
                    )));
                }
                seen.push(value);
            }
        }
        data.indexes.insert(field.to_string(), unique);

        Ok(())
    }

    async fn drop_index(&self, collection: &str, field: &str) -> KaleResult<()> {
        if let Some(data) = self.store.write().await.get_mut(collection) {
            data.indexes.remove(field);
        }

        Ok(())
    }
}

/// Cursor over a snapshot taken when the query ran.
struct VecCursor {
    documents: std::vec::IntoIter<Document>,
}

#[async_trait]
impl RawCursor for VecCursor {
    async fn next_document(&mut self) -> KaleResult<Option<Document>> {
        Ok(self.documents.next())
    }
}

/// Builder for constructing [`InMemoryStore`] instances, optionally pre-seeded.
///
/// # Example
///
/// ```ignore
/// use kale_memory::InMemoryStore;
/// use kale::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder()
///     .with_documents("users", vec![doc! { "name": "alice" }])
///     .build()
///     .await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder {
    seed: Vec<(String, Vec<Document>)>,
}

impl InMemoryStoreBuilder {
    /// Inserts `documents` into `collection` when the store is built.
    pub fn with_documents(mut self, collection: impl Into<String>, documents: Vec<Document>) -> Self {
        self.seed.push((collection.into(), documents));
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> KaleResult<Self::Backend> {
        let store = InMemoryStore::new();
        for (collection, documents) in self.seed {
            store.create_collection(&collection).await?;
            for document in documents {
                store
                    .insert_document(document, &collection)
                    .await
                    .map_err(|err| KaleError::Initialization(err.to_string()))?;
            }
        }

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use kale_core::query::Filter;

    async fn drain(mut cursor: Box<dyn RawCursor>) -> Vec<Document> {
        let mut documents = Vec::new();
        while let Some(document) = cursor.next_document().await.unwrap() {
            documents.push(document);
        }
        documents
    }

    #[tokio::test]
    async fn insert_assigns_an_id_when_missing() {
        let store = InMemoryStore::new();

        let id = store
            .insert_document(doc! { "name": "alice" }, "users")
            .await
            .unwrap();
        let found = store
            .find_one(Filter::id(id.clone()).into(), "users")
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(id, Bson::ObjectId(_)));
        assert_eq!(found.get(ID_KEY), Some(&id));
        assert_eq!(found.get_str("name").unwrap(), "alice");
    }

    #[tokio::test]
    async fn insert_rejects_a_reused_id() {
        let store = InMemoryStore::new();
        let id = ObjectId::new();

        store
            .insert_document(doc! { "_id": id }, "users")
            .await
            .unwrap();
        let err = store
            .insert_document(doc! { "_id": id, "again": true }, "users")
            .await
            .unwrap_err();

        assert!(matches!(err, KaleError::DuplicateIdentifier(..)));
        assert_eq!(store.count_documents(None, "users").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn insert_keeps_caller_identifiers_of_any_scalar_type() {
        let store = InMemoryStore::new();

        let named = store
            .insert_document(doc! { "_id": "user-42" }, "users")
            .await
            .unwrap();
        assert_eq!(named, Bson::String("user-42".to_string()));
        store
            .insert_document(doc! { "_id": 7_i32 }, "users")
            .await
            .unwrap();

        let err = store
            .insert_document(doc! { "_id": 7_i64 }, "users")
            .await
            .unwrap_err();
        assert!(matches!(err, KaleError::DuplicateIdentifier(..)));
        let found = store
            .find_one(Filter::id("user-42").into(), "users")
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn insert_rejects_array_ids_and_bad_keys() {
        let store = InMemoryStore::new();

        let err = store
            .insert_document(doc! { "_id": [1, 2] }, "users")
            .await
            .unwrap_err();
        assert!(matches!(err, KaleError::InvalidDocument(_)));

        let err = store
            .insert_document(doc! { "nested": { "$where": 1 } }, "users")
            .await
            .unwrap_err();
        assert!(matches!(err, KaleError::UnsupportedValue(_)));
    }

    #[tokio::test]
    async fn replace_upserts_and_keeps_position() {
        let store = InMemoryStore::new();
        let first = store.insert_document(doc! { "n": 1 }, "c").await.unwrap();
        store.insert_document(doc! { "n": 2 }, "c").await.unwrap();

        store
            .replace_document(first, doc! { "n": 10 }, "c")
            .await
            .unwrap();
        let missing = Bson::ObjectId(ObjectId::new());
        store
            .replace_document(missing.clone(), doc! { "n": 3 }, "c")
            .await
            .unwrap();

        let all = drain(store.find(Query::new(), "c").await.unwrap()).await;
        let values = all
            .iter()
            .map(|d| d.get_i32("n").unwrap())
            .collect::<Vec<_>>();
        assert_eq!(values, vec![10, 2, 3]);
        assert_eq!(all[2].get(ID_KEY), Some(&missing));
    }

    #[tokio::test]
    async fn find_sorts_and_windows() {
        let store = InMemoryStore::new();
        for n in [3, 1, 4, 1, 5, 9, 2, 6] {
            store.insert_document(doc! { "n": n }, "c").await.unwrap();
        }

        let query = Query::builder()
            .filter(Filter::gt("n", 1))
            .sort("n", SortDirection::Desc)
            .offset(1)
            .limit(3)
            .build();
        let found = drain(store.find(query, "c").await.unwrap()).await;
        let values = found
            .iter()
            .map(|d| d.get_i32("n").unwrap())
            .collect::<Vec<_>>();

        assert_eq!(values, vec![6, 5, 4]);
    }

    #[tokio::test]
    async fn delete_and_count_by_filter() {
        let store = InMemoryStore::new();
        for n in 0..5 {
            store.insert_document(doc! { "n": n }, "c").await.unwrap();
        }

        let deleted = store
            .delete_documents(Some(Filter::lt("n", 2)), "c")
            .await
            .unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(store.count_documents(None, "c").await.unwrap(), 3);
        assert_eq!(store.delete_documents(None, "c").await.unwrap(), 3);
        assert_eq!(store.delete_documents(None, "missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn collections_are_created_on_write_and_dropped_idempotently() {
        let store = InMemoryStore::new();
        store.insert_document(doc! {}, "b").await.unwrap();
        store.create_collection("a").await.unwrap();

        assert_eq!(store.list_collections().await.unwrap(), vec!["a", "b"]);

        store.drop_collection("b").await.unwrap();
        store.drop_collection("b").await.unwrap();
        assert_eq!(store.list_collections().await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn unique_indexes_are_enforced() {
        let store = InMemoryStore::new();
        store.insert_document(doc! { "email": "a@x" }, "users").await.unwrap();
        store.add_index("users", "email", true).await.unwrap();

        let err = store
            .insert_document(doc! { "email": "a@x" }, "users")
            .await
            .unwrap_err();
        assert!(matches!(err, KaleError::Backend(_)));

        store.drop_index("users", "email").await.unwrap();
        store.insert_document(doc! { "email": "a@x" }, "users").await.unwrap();
        assert!(store.add_index("users", "email", true).await.is_err());
    }

    #[tokio::test]
    async fn builder_seeds_documents() {
        let store = InMemoryStore::builder()
            .with_documents("users", vec![doc! { "name": "alice" }, doc! { "name": "bob" }])
            .build()
            .await
            .unwrap();

        assert_eq!(store.count_documents(None, "users").await.unwrap(), 2);
    }
}
