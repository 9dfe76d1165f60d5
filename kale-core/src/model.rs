//! Persistent models.
//!
//! A model type is a marker that declares where its documents live:
//!
//! ```ignore
//! use kale::prelude::*;
//!
//! static DB: OnceLock<Database> = OnceLock::new();
//!
//! fn db() -> Database {
//!     DB.get_or_init(|| Database::new(InMemoryStore::new())).clone()
//! }
//!
//! #[derive(Model)]
//! #[model(collection = "users", database = db)]
//! struct User;
//!
//! let alice = Instance::<User>::new()?;
//! alice.set("name", "alice");
//! alice.save().await?;
//!
//! let again = User::collection()?.find_one(Filter::eq("name", "alice")).await?;
//! assert!(Instance::ptr_eq(&alice, &again.unwrap()));
//! ```
//!
//! Instances are [`Instance<T>`] values: an [`AttrContainer`] bound to the
//! model's [`CollectionProxy`]. Like containers they are shared handles, and
//! an instance stored as a field of another is kept by reference.

use std::{
    any::{Any, TypeId, type_name},
    fmt,
    ops::Deref,
    sync::Arc,
};

use bson::{Bson, Document, oid::ObjectId};
use serde::Serialize;
use tracing::debug;

use crate::{
    collection::{CollectionProxy, identity_key},
    container::{AttrContainer, Attribute, ID_KEY},
    database::Database,
    error::{KaleError, KaleResult},
    query::{Expr, Filter},
    value::{ModelRef, Value},
};

/// Per-type declarations of a persistent model.
///
/// Every declaration defaults to "not declared". Use `#[derive(Model)]` to
/// generate them.
pub trait Model: 'static {
    /// The database the model's collection lives in.
    fn database() -> Option<Database> {
        None
    }

    /// Name of the model's collection.
    fn collection_name() -> Option<&'static str> {
        None
    }

    /// Extra attribute names that resolve to the model rather than to stored keys.
    fn members() -> &'static [&'static str] {
        &[]
    }
}

/// The abstract base model. Declares nothing and can never be instantiated.
#[derive(Debug, Clone, Copy)]
pub struct BaseModel;

impl Model for BaseModel {}

/// Type-level operations available on every [`Model`].
pub trait ModelExt: Model + Sized {
    /// The collection proxy bound to this model.
    ///
    /// Built on first use and cached by the model's database, so every call
    /// shares the same identity map.
    ///
    /// # Errors
    ///
    /// [`KaleError::Configuration`] if the model does not declare both a
    /// database and a collection name, or is [`BaseModel`].
    fn collection() -> KaleResult<CollectionProxy<Self>> {
        if TypeId::of::<Self>() == TypeId::of::<BaseModel>() {
            return Err(KaleError::Configuration(
                "BaseModel is abstract and cannot be instantiated".to_string(),
            ));
        }
        let name = Self::collection_name().ok_or_else(|| {
            KaleError::Configuration(format!("{} does not declare a collection", type_name::<Self>()))
        })?;
        let database = Self::database().ok_or_else(|| {
            KaleError::Configuration(format!("{} does not declare a database", type_name::<Self>()))
        })?;

        Ok(CollectionProxy::from_shared(database.proxy::<Self>(name)))
    }

    /// Turns a raw document into an instance of this model.
    fn hydrate(document: Document) -> KaleResult<Instance<Self>> {
        Self::collection()?.hydrate(document)
    }
}

impl<T: Model> ModelExt for T {}

/// A live model instance.
///
/// Dereferences to its [`AttrContainer`], so every container operation is
/// available directly. Cloning clones the handle.
pub struct Instance<T: Model> {
    container: AttrContainer,
    collection: CollectionProxy<T>,
}

impl<T: Model> Instance<T> {
    /// Names that attribute access resolves to the instance rather than to stored keys.
    pub const MEMBERS: &'static [&'static str] = &[
        "collection",
        "hydrate",
        "id",
        "insert",
        "is_persisted",
        "remove",
        "save",
    ];

    pub(crate) fn bind(container: AttrContainer, collection: CollectionProxy<T>) -> Self {
        Self { container, collection }
    }

    /// Creates an empty, unsaved instance.
    ///
    /// # Errors
    ///
    /// [`KaleError::Configuration`] if `T` is not fully declared.
    pub fn new() -> KaleResult<Self> {
        Ok(Self::bind(AttrContainer::new(), T::collection()?))
    }

    /// Creates an unsaved instance holding the entries of `value`.
    ///
    /// Nested mappings are wrapped; containers and instances nested inside
    /// `value` are kept by reference.
    pub fn from_value(value: impl Into<Value>) -> KaleResult<Self> {
        let instance = Self::new()?;
        instance.container.update([value.into()])?;

        Ok(instance)
    }

    /// Creates an unsaved instance from any serde-serializable value.
    pub fn from_serialize<S: Serialize>(value: &S) -> KaleResult<Self> {
        let collection = T::collection()?;

        Ok(Self::bind(AttrContainer::from_serialize(value)?, collection))
    }

    /// Returns the tracked instance for `document`'s `_id`, or a new one.
    pub fn hydrate(document: Document) -> KaleResult<Self> {
        T::collection()?.hydrate(document)
    }

    /// Recovers a typed instance from a reference stored in a container.
    ///
    /// Returns `None` if the reference belongs to another model type.
    pub fn from_model_ref(model: &ModelRef) -> Option<Self> {
        let shared = model.binding().clone().downcast().ok()?;

        Some(Self::bind(
            model.container().clone(),
            CollectionProxy::from_shared(shared),
        ))
    }

    pub fn container(&self) -> &AttrContainer {
        &self.container
    }

    pub fn collection(&self) -> &CollectionProxy<T> {
        &self.collection
    }

    /// Returns `true` if both handles refer to the same instance.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        AttrContainer::ptr_eq(&this.container, &other.container)
    }

    /// The stored identifier, if the instance has one.
    ///
    /// Identifiers are opaque: whatever the store put under `_id` is returned
    /// as BSON.
    ///
    /// # Errors
    ///
    /// [`KaleError::UnsupportedValue`] if `_id` holds a cyclic reference.
    pub fn id(&self) -> KaleResult<Option<Bson>> {
        self.container
            .get(ID_KEY)
            .map(|id| id.to_bson())
            .transpose()
    }

    pub fn is_persisted(&self) -> bool {
        self.container.contains_key(ID_KEY)
    }

    /// Writes the instance to its collection.
    ///
    /// A persisted instance replaces the stored document with the same
    /// identifier (inserting it if it has gone missing). An unsaved instance
    /// is inserted, gains an `_id` and becomes tracked.
    pub async fn save(&self) -> KaleResult<Bson> {
        let document = self.container.to_document()?;

        match self.id()? {
            Some(id) => {
                self.collection
                    .raw()
                    .replace(id.clone(), document)
                    .await?;
                debug!(%id, collection = self.collection.name(), "replaced document");

                Ok(id)
            }
            None => self.insert_document(document).await,
        }
    }

    /// Inserts the instance as a new document, even if it already has an `_id`.
    ///
    /// # Errors
    ///
    /// [`KaleError::DuplicateIdentifier`] if the store already holds a
    /// document with this instance's `_id`.
    pub async fn insert(&self) -> KaleResult<Bson> {
        let document = self.container.to_document()?;
        self.insert_document(document).await
    }

    /// Claims the identifier in the identity map before writing, so a read of
    /// the new document that completes before this call returns resolves to
    /// this instance. Instances without an `_id` get a fresh object id, which
    /// is taken back if the write fails.
    async fn insert_document(&self, mut document: Document) -> KaleResult<Bson> {
        let (id, assigned) = match document.get(ID_KEY).cloned() {
            Some(id) => (identity_key(id)?, false),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                document.insert(ID_KEY, id.clone());
                (id, true)
            }
        };

        if assigned {
            self.container.set(ID_KEY, Value::from_bson(id.clone())?);
        }

        let identity = self.collection.identity();
        let claimed = identity
            .register_if_absent(id.clone(), &self.container)
            .is_none();

        match self.collection.raw().insert(document).await {
            Ok(_) => {
                identity.register(id.clone(), &self.container);
                debug!(%id, collection = self.collection.name(), "inserted document");

                Ok(id)
            }
            Err(err) => {
                if claimed {
                    identity.forget_instance(&id, &self.container);
                }
                if assigned {
                    self.container.remove(ID_KEY);
                }
                Err(err)
            }
        }
    }

    /// Deletes this instance's document and clears its `_id`.
    ///
    /// An unsaved instance is left untouched. Deleting other documents by
    /// filter belongs to the collection, so any non-empty `filter` is rejected.
    ///
    /// # Errors
    ///
    /// [`KaleError::WrongLevel`] if `filter` constrains anything.
    pub async fn remove(&self, filter: Option<Expr>) -> KaleResult<()> {
        if filter.as_ref().is_some_and(|filter| !filter.is_empty()) {
            return Err(KaleError::WrongLevel(
                "an instance removes only itself; use CollectionProxy::delete_many to delete by filter"
                    .to_string(),
            ));
        }
        let Some(id) = self.id()? else {
            return Ok(());
        };

        self.collection
            .delete_many(Some(Filter::id(id.clone())))
            .await?;
        self.container.remove(ID_KEY);
        self.collection
            .identity()
            .forget_instance(&id, &self.container);
        debug!(%id, collection = self.collection.name(), "removed document");

        Ok(())
    }

    fn member_groups() -> [&'static [&'static str]; 3] {
        [Self::MEMBERS, AttrContainer::MEMBERS, T::members()]
    }

    /// Attribute-style read. Model and container members take precedence over stored keys.
    pub fn attr(&self, name: &str) -> KaleResult<Attribute> {
        self.container
            .attr_with(&Self::member_groups(), name)
    }

    pub fn set_attr(&self, name: &str, value: impl Into<Value>) -> KaleResult<()> {
        self.container
            .set_attr_with(&Self::member_groups(), name, value)
    }

    pub fn del_attr(&self, name: &str) -> KaleResult<Value> {
        self.container
            .del_attr_with(&Self::member_groups(), name)
    }

    fn to_model_ref(&self) -> ModelRef {
        let binding: Arc<dyn Any + Send + Sync> = self.collection.shared().clone();
        ModelRef::new(self.container.clone(), binding, type_name::<T>())
    }
}

impl Value {
    /// Reads a stored model reference back as an instance of `T`.
    pub fn as_instance<T: Model>(&self) -> Option<Instance<T>> {
        self.as_model_ref()
            .and_then(Instance::from_model_ref)
    }
}

impl<T: Model> Clone for Instance<T> {
    fn clone(&self) -> Self {
        Self {
            container: self.container.clone(),
            collection: self.collection.clone(),
        }
    }
}

impl<T: Model> Deref for Instance<T> {
    type Target = AttrContainer;

    fn deref(&self) -> &AttrContainer {
        &self.container
    }
}

impl<T: Model> PartialEq for Instance<T> {
    fn eq(&self, other: &Self) -> bool {
        self.container == other.container
    }
}

impl<T: Model> PartialEq<Value> for Instance<T> {
    fn eq(&self, other: &Value) -> bool {
        self.container == *other
    }
}

impl<T: Model> From<Instance<T>> for Value {
    fn from(instance: Instance<T>) -> Self {
        Value::Model(instance.to_model_ref())
    }
}

impl<T: Model> From<&Instance<T>> for Value {
    fn from(instance: &Instance<T>) -> Self {
        Value::Model(instance.to_model_ref())
    }
}

impl<T: Model> fmt::Display for Instance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.container, f)
    }
}

impl<T: Model> fmt::Debug for Instance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", type_name::<T>(), self.container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Undeclared;

    impl Model for Undeclared {}

    struct NoDatabase;

    impl Model for NoDatabase {
        fn collection_name() -> Option<&'static str> {
            Some("orphans")
        }
    }

    fn assert_configuration<T: Model>() {
        assert!(matches!(Instance::<T>::new(), Err(KaleError::Configuration(_))));
        assert!(matches!(
            Instance::<T>::from_value(Value::map([("a", 1)])),
            Err(KaleError::Configuration(_))
        ));
        assert!(matches!(T::collection(), Err(KaleError::Configuration(_))));
    }

    #[test]
    fn base_model_cannot_be_instantiated() {
        assert_configuration::<BaseModel>();
    }

    #[test]
    fn undeclared_models_cannot_be_instantiated() {
        assert_configuration::<Undeclared>();
        assert_configuration::<NoDatabase>();
    }

    #[test]
    fn model_members_come_first() {
        let groups = Instance::<BaseModel>::member_groups();

        assert!(groups[0].contains(&"save"));
        assert!(groups[1].contains(&"update"));
        assert!(groups[2].is_empty());
    }
}
