//! Nested attribute containers.
//!
//! [`AttrContainer`] is the in-memory shape of a document: an ordered mapping
//! from string keys to [`Value`]s that can be read by item (`get`, `item`) or
//! by attribute (`attr`). Writing a plain mapping, at any depth, wraps it into
//! a new container; writing a container or a model stores that very object.
//!
//! Containers are shared handles. Cloning one clones the handle, so two clones
//! observe each other's writes and compare identical with
//! [`AttrContainer::ptr_eq`].
//!
//! # Example
//!
//! ```ignore
//! use kale::{container::AttrContainer, value::Value};
//!
//! let user = AttrContainer::new();
//! user.set("name", "alice");
//! user.set("address", Value::map([("city", "Montreal")]));
//!
//! let address = user.item("address")?.as_container().unwrap();
//! assert_eq!(address.attr("city")?.into_value(), Some(Value::from("Montreal")));
//! ```

use std::{
    fmt,
    str::FromStr,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak},
};

use bson::{Bson, Document, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;

use crate::{
    error::{KaleError, KaleResult},
    value::Value,
};

/// Key under which a document's store identifier lives.
pub const ID_KEY: &str = "_id";

type Entries = Vec<(String, Value)>;

#[derive(Default)]
struct Slots {
    entries: RwLock<Entries>,
}

/// Result of an attribute-style read.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    /// The name resolved to a declared member of the container or model type.
    Member(&'static str),
    /// The name resolved to a stored key.
    Value(Value),
}

impl Attribute {
    pub fn is_member(&self) -> bool {
        matches!(self, Attribute::Member(_))
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Attribute::Value(value) => Some(value),
            Attribute::Member(_) => None,
        }
    }
}

/// A shared, ordered, dynamically-typed key/value container.
#[derive(Clone, Default)]
pub struct AttrContainer {
    slots: Arc<Slots>,
}

/// Non-owning handle to a container's storage.
#[derive(Clone)]
pub(crate) struct WeakContainer {
    slots: Weak<Slots>,
}

impl WeakContainer {
    pub(crate) fn upgrade(&self) -> Option<AttrContainer> {
        self.slots
            .upgrade()
            .map(|slots| AttrContainer { slots })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.slots.strong_count() > 0
    }

    pub(crate) fn points_to(&self, container: &AttrContainer) -> bool {
        Weak::as_ptr(&self.slots) == Arc::as_ptr(&container.slots)
    }
}

impl AttrContainer {
    /// Names that attribute access resolves to the container itself rather
    /// than to stored keys.
    pub const MEMBERS: &'static [&'static str] = &[
        "attr",
        "clear",
        "contains_key",
        "del_attr",
        "get",
        "is_empty",
        "item",
        "items",
        "keys",
        "len",
        "remove",
        "set",
        "set_attr",
        "set_default",
        "update",
        "values",
    ];

    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a container from a mapping value.
    ///
    /// A plain mapping is wrapped into a new container; a container or model
    /// value yields that same object.
    ///
    /// # Errors
    ///
    /// Returns [`KaleError::InvalidDocument`] if the value is not a mapping.
    pub fn from_value(value: impl Into<Value>) -> KaleResult<Self> {
        match value.into().wrap() {
            Value::Container(container) => Ok(container),
            Value::Model(model) => Ok(model.container().clone()),
            other => Err(KaleError::InvalidDocument(format!(
                "expected a mapping, got {}",
                other.kind()
            ))),
        }
    }

    /// Wraps a raw store document, recursively.
    pub fn from_document(document: Document) -> KaleResult<Self> {
        Self::from_value(Value::try_from(document)?)
    }

    /// Builds a container from any serde-serializable struct or map.
    pub fn from_serialize<S: Serialize>(value: &S) -> KaleResult<Self> {
        match serialize_to_bson(value)? {
            Bson::Document(document) => Self::from_document(document),
            other => Err(KaleError::InvalidDocument(format!(
                "expected a document, got {:?}",
                other.element_type()
            ))),
        }
    }

    /// Deserializes the container's current contents into a typed value.
    pub fn deserialize_into<D: DeserializeOwned>(&self) -> KaleResult<D> {
        Ok(deserialize_from_bson(Bson::Document(self.to_document()?))?)
    }

    pub(crate) fn from_entries(entries: Entries) -> Self {
        let container = Self::new();
        for (key, value) in entries {
            container.set(key, value);
        }
        container
    }

    /// Returns `true` if both handles refer to the same container.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.slots, &other.slots)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.slots) as usize
    }

    pub(crate) fn downgrade(&self) -> WeakContainer {
        WeakContainer { slots: Arc::downgrade(&self.slots) }
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.slots
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.slots
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`KaleError::KeyNotFound`] if the key is absent.
    pub fn item(&self, key: &str) -> KaleResult<Value> {
        self.get(key)
            .ok_or_else(|| KaleError::KeyNotFound(key.to_string()))
    }

    /// Stores `value` under `key`, wrapping plain mappings.
    ///
    /// An existing key keeps its position; a new key is appended.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into().wrap();
        let mut entries = self.write();

        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => entries.push((key, value)),
        }
    }

    /// Removes `key`, returning its value if it was present.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut entries = self.write();
        let position = entries.iter().position(|(k, _)| k == key)?;

        Some(entries.remove(position).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read().iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.read()
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.read()
            .iter()
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Snapshot of all entries in insertion order.
    pub fn items(&self) -> Vec<(String, Value)> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Attribute-style read. Container members take precedence over stored keys.
    ///
    /// # Errors
    ///
    /// Returns [`KaleError::KeyNotFound`] if `name` is neither a member nor a stored key.
    pub fn attr(&self, name: &str) -> KaleResult<Attribute> {
        self.attr_with(&[Self::MEMBERS], name)
    }

    /// Attribute-style write. Fails with [`KaleError::ReadOnlyMember`] for member names.
    pub fn set_attr(&self, name: &str, value: impl Into<Value>) -> KaleResult<()> {
        self.set_attr_with(&[Self::MEMBERS], name, value)
    }

    /// Attribute-style delete, returning the removed value.
    ///
    /// # Errors
    ///
    /// [`KaleError::ReadOnlyMember`] for member names, [`KaleError::KeyNotFound`]
    /// if nothing is stored under `name`.
    pub fn del_attr(&self, name: &str) -> KaleResult<Value> {
        self.del_attr_with(&[Self::MEMBERS], name)
    }

    pub(crate) fn attr_with(&self, members: &[&[&'static str]], name: &str) -> KaleResult<Attribute> {
        if let Some(member) = find_member(members, name) {
            return Ok(Attribute::Member(member));
        }
        self.item(name).map(Attribute::Value)
    }

    pub(crate) fn set_attr_with(
        &self,
        members: &[&[&'static str]],
        name: &str,
        value: impl Into<Value>,
    ) -> KaleResult<()> {
        if find_member(members, name).is_some() {
            return Err(KaleError::ReadOnlyMember(name.to_string()));
        }
        self.set(name, value);

        Ok(())
    }

    pub(crate) fn del_attr_with(&self, members: &[&[&'static str]], name: &str) -> KaleResult<Value> {
        if find_member(members, name).is_some() {
            return Err(KaleError::ReadOnlyMember(name.to_string()));
        }
        self.remove(name)
            .ok_or_else(|| KaleError::KeyNotFound(name.to_string()))
    }

    /// Merges the keys of one source mapping into this container.
    ///
    /// Takes zero or one source; zero is a no-op.
    ///
    /// # Errors
    ///
    /// [`KaleError::ArgumentCount`] if more than one source is given,
    /// [`KaleError::InvalidDocument`] if the source is not a mapping.
    pub fn update<I>(&self, sources: I) -> KaleResult<()>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let mut sources = sources
            .into_iter()
            .map(Into::into)
            .collect::<Vec<Value>>();

        if sources.len() > 1 {
            return Err(KaleError::ArgumentCount(sources.len()));
        }
        let Some(source) = sources.pop() else {
            return Ok(());
        };
        let entries = source.mapping_entries().ok_or_else(|| {
            KaleError::InvalidDocument(format!("cannot update from a {} value", source.kind()))
        })?;

        for (key, value) in entries {
            self.set(key, value);
        }

        Ok(())
    }

    /// Returns the value under `key`, storing `value` first if the key is absent.
    pub fn set_default(&self, key: impl Into<String>, value: impl Into<Value>) -> Value {
        let key = key.into();
        if let Some(existing) = self.get(&key) {
            return existing;
        }
        let value = value.into().wrap();
        self.set(key, value.clone());

        value
    }

    /// Encodes the container as a BSON document for the store.
    ///
    /// # Errors
    ///
    /// Returns [`KaleError::UnsupportedValue`] if the container (directly or
    /// through nested containers or models) refers back to itself.
    pub fn to_document(&self) -> KaleResult<Document> {
        self.encode(&mut Vec::new())
    }

    pub(crate) fn encode(&self, stack: &mut Vec<usize>) -> KaleResult<Document> {
        let addr = self.addr();
        if stack.contains(&addr) {
            return Err(KaleError::UnsupportedValue(
                "cyclic reference between containers".to_string(),
            ));
        }
        stack.push(addr);

        let mut document = Document::new();
        for (key, value) in self.items() {
            document.insert(key, value.encode(stack)?);
        }
        stack.pop();

        Ok(document)
    }

    /// Renders the container as JSON.
    pub fn to_json(&self) -> JsonValue {
        self.render(&mut Vec::new())
    }

    pub(crate) fn render(&self, stack: &mut Vec<usize>) -> JsonValue {
        let addr = self.addr();
        if stack.contains(&addr) {
            return JsonValue::String("{...}".to_string());
        }
        stack.push(addr);

        let rendered = JsonValue::Object(
            self.items()
                .into_iter()
                .map(|(k, v)| {
                    let v = v.render(stack);
                    (k, v)
                })
                .collect(),
        );
        stack.pop();

        rendered
    }
}

fn find_member(members: &[&[&'static str]], name: &str) -> Option<&'static str> {
    members
        .iter()
        .flat_map(|group| group.iter())
        .find(|member| **member == name)
        .copied()
}

impl PartialEq for AttrContainer {
    fn eq(&self, other: &Self) -> bool {
        Value::Container(self.clone()).equals(&Value::Container(other.clone()), &mut Vec::new())
    }
}

impl PartialEq<Value> for AttrContainer {
    fn eq(&self, other: &Value) -> bool {
        Value::Container(self.clone()) == *other
    }
}

impl fmt::Display for AttrContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl fmt::Debug for AttrContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttrContainer({self})")
    }
}

impl FromStr for AttrContainer {
    type Err = KaleError;

    fn from_str(s: &str) -> KaleResult<Self> {
        Self::from_value(Value::from(serde_json::from_str::<JsonValue>(s)?))
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for AttrContainer {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.set(key, value);
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for AttrContainer {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut container = Self::new();
        container.extend(iter);
        container
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;
    use serde::Deserialize;

    fn nested() -> AttrContainer {
        AttrContainer::from_value(Value::map([
            ("name", Value::from("kale")),
            ("nest", Value::map([("leaf", Value::from(1))])),
            ("list", Value::array(vec![Value::map([("x", 1)]), Value::from(2)])),
        ]))
        .unwrap()
    }

    #[test]
    fn nested_mappings_are_wrapped_on_write() {
        let container = nested();

        assert!(matches!(container.get("nest"), Some(Value::Container(_))));
        let list = container.item("list").unwrap();
        assert!(matches!(list.as_array().unwrap()[0], Value::Container(_)));
        assert_eq!(list.as_array().unwrap()[1], Value::Int(2));
    }

    #[test]
    fn attribute_and_item_access_agree() {
        let container = nested();

        for key in container.keys() {
            assert_eq!(
                container.attr(&key).unwrap().into_value(),
                container.get(&key)
            );
        }

        let nest = container.item("nest").unwrap().as_container().unwrap();
        assert_eq!(nest.attr("leaf").unwrap(), Attribute::Value(Value::Int(1)));
    }

    #[test]
    fn attribute_read_of_missing_key_is_key_not_found() {
        let err = nested().attr("missing").unwrap_err();

        assert!(matches!(err, KaleError::KeyNotFound(ref key) if key == "missing"));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn members_shadow_stored_keys() {
        let container = AttrContainer::new();
        container.set("keys", "stored");

        assert_eq!(container.attr("keys").unwrap(), Attribute::Member("keys"));
        assert_eq!(container.get("keys"), Some(Value::from("stored")));
        assert!(matches!(
            container.set_attr("update", 1),
            Err(KaleError::ReadOnlyMember(_))
        ));
        assert!(matches!(
            container.del_attr("keys"),
            Err(KaleError::ReadOnlyMember(_))
        ));
    }

    #[test]
    fn set_and_delete_by_attribute() {
        let container = AttrContainer::new();
        container.set_attr("colour", "green").unwrap();

        assert_eq!(container.get("colour"), Some(Value::from("green")));
        assert_eq!(container.del_attr("colour").unwrap(), Value::from("green"));
        assert!(matches!(
            container.del_attr("colour"),
            Err(KaleError::KeyNotFound(_))
        ));
    }

    #[test]
    fn update_accepts_at_most_one_source() {
        let container = AttrContainer::new();

        container.update([Value::map([("a", 1)])]).unwrap();
        container.update(Vec::<Value>::new()).unwrap();
        assert_eq!(container.get("a"), Some(Value::Int(1)));

        let err = container
            .update([Value::map([("b", 2)]), Value::map([("c", 3)])])
            .unwrap_err();
        assert!(matches!(err, KaleError::ArgumentCount(2)));
        assert!(!container.contains_key("b"));

        assert!(matches!(
            container.update([Value::from(3)]),
            Err(KaleError::InvalidDocument(_))
        ));
    }

    #[test]
    fn update_wraps_plain_mapping_values() {
        let container = AttrContainer::new();
        container
            .update([Value::map([("inner", Value::map([("x", 1)]))])])
            .unwrap();

        assert!(matches!(container.get("inner"), Some(Value::Container(_))));
    }

    #[test]
    fn set_default_only_stores_when_absent() {
        let container = AttrContainer::new();

        assert_eq!(container.set_default("a", 1), Value::Int(1));
        assert_eq!(container.set_default("a", 2), Value::Int(1));
        assert!(matches!(
            container.set_default("m", Value::map([("x", 1)])),
            Value::Container(_)
        ));
    }

    #[test]
    fn stored_containers_keep_reference_identity() {
        let outer = AttrContainer::new();
        let inner = AttrContainer::new();
        outer.set("inner", &inner);

        inner.set("late", true);
        let read_back = outer.item("inner").unwrap().as_container().unwrap();

        assert!(AttrContainer::ptr_eq(&read_back, &inner));
        assert_eq!(read_back.get("late"), Some(Value::Bool(true)));
    }

    #[test]
    fn equality_ignores_order_and_container_ness() {
        let a = AttrContainer::from_value(Value::map([("x", 1), ("y", 2)])).unwrap();
        let b: AttrContainer = [("y", 2), ("x", 1)].into_iter().collect();

        assert_eq!(a, b);
        assert_eq!(a, Value::map([("x", 1), ("y", 2)]));
        b.set("z", 3);
        assert_ne!(a, b);
    }

    #[test]
    fn string_representation_parses_back() {
        let container = nested();
        container.set("id", ObjectId::new());
        container.set("when", chrono::Utc::now());
        container.set("ratio", 0.25);
        container.set("nothing", Value::Null);

        let parsed: AttrContainer = container.to_string().parse().unwrap();

        assert_eq!(parsed, container);
        assert!(!AttrContainer::ptr_eq(&parsed, &container));
    }

    #[test]
    fn cyclic_containers_cannot_be_encoded() {
        let a = AttrContainer::new();
        let b = AttrContainer::new();
        a.set("b", &b);
        b.set("a", &a);

        assert!(matches!(a.to_document(), Err(KaleError::UnsupportedValue(_))));
        assert!(a.to_string().contains("{...}"));
    }

    #[test]
    fn cyclic_containers_compare_by_shape() {
        let a = AttrContainer::new();
        a.set("n", 1);
        a.set("me", &a);
        let b = AttrContainer::new();
        b.set("n", 1);
        b.set("me", &b);

        assert_eq!(a, b);
        assert_eq!(a, a.clone());

        b.set("n", 2);
        assert_ne!(a, b);
    }

    #[test]
    fn shared_child_is_not_a_cycle() {
        let parent = AttrContainer::new();
        let child = AttrContainer::new();
        child.set("v", 1);
        parent.set("left", &child);
        parent.set("right", &child);

        let document = parent.to_document().unwrap();
        assert_eq!(document.get_document("left").unwrap(), document.get_document("right").unwrap());
    }

    #[test]
    fn document_round_trip_through_bson() {
        let container = nested();
        let back = AttrContainer::from_document(container.to_document().unwrap()).unwrap();

        assert_eq!(back, container);
        assert!(matches!(back.get("nest"), Some(Value::Container(_))));
    }

    #[test]
    fn serde_bridge() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Profile {
            handle: String,
            followers: i64,
        }

        let profile = Profile { handle: "uniphil".into(), followers: 3 };
        let container = AttrContainer::from_serialize(&profile).unwrap();

        assert_eq!(container.get("handle"), Some(Value::from("uniphil")));
        assert_eq!(container.deserialize_into::<Profile>().unwrap(), profile);
    }
}
