//! Dynamically-typed field values held by an [`AttrContainer`].
//!
//! A [`Value`] is either a scalar, a sequence, a plain mapping, a shared
//! container, or a reference to a live model instance. Plain mappings only
//! exist on the way *in*: writing one into a container wraps it (and every
//! mapping nested inside sequences) into an [`AttrContainer`].
//!
//! Values convert to and from BSON at the store boundary and to and from JSON
//! for their textual representation. Object ids and timestamps use the
//! extended JSON tags `{"$oid": ...}` and `{"$date": ...}` so that the text
//! parses back into an equal value.

use std::{any::Any, fmt, sync::Arc};

use bson::{Bson, Document, oid::ObjectId};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map as JsonMap, Number, Value as JsonValue};

use crate::{
    container::AttrContainer,
    error::{KaleError, KaleResult},
};

/// A single field value.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    ObjectId(ObjectId),
    Array(Vec<Value>),
    /// A plain mapping. Wrapped into a [`Value::Container`] when written into a container.
    Map(Vec<(String, Value)>),
    /// A shared container, stored and read back by reference.
    Container(AttrContainer),
    /// A live model instance, stored and read back by reference.
    Model(ModelRef),
}

impl Value {
    /// Builds a plain mapping value from key/value pairs.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let value = Value::map([("name", Value::from("alice")), ("age", 30.into())]);
    /// ```
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds a sequence value.
    pub fn array<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    /// Short name of the value's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::ObjectId(_) => "objectid",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Container(_) => "container",
            Value::Model(_) => "model",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a float, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Value::ObjectId(oid) => Some(*oid),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the container handle behind a container or model value.
    ///
    /// The returned handle is the stored object itself, not a copy.
    pub fn as_container(&self) -> Option<AttrContainer> {
        match self {
            Value::Container(container) => Some(container.clone()),
            Value::Model(model) => Some(model.container().clone()),
            _ => None,
        }
    }

    pub fn as_model_ref(&self) -> Option<&ModelRef> {
        match self {
            Value::Model(model) => Some(model),
            _ => None,
        }
    }

    /// Whether this value is any kind of mapping (plain, container or model).
    pub fn is_mapping(&self) -> bool {
        matches!(self, Value::Map(_) | Value::Container(_) | Value::Model(_))
    }

    /// Snapshot of the entries of a mapping value. Nested containers are
    /// returned as handles, not copies.
    pub fn mapping_entries(&self) -> Option<Vec<(String, Value)>> {
        match self {
            Value::Map(entries) => Some(entries.clone()),
            Value::Container(container) => Some(container.items()),
            Value::Model(model) => Some(model.container().items()),
            _ => None,
        }
    }

    /// Applies the wrapping rule: plain mappings become containers, at any
    /// depth inside sequences too. Scalars, containers and models are kept.
    pub(crate) fn wrap(self) -> Value {
        match self {
            Value::Map(entries) => Value::Container(AttrContainer::from_entries(entries)),
            Value::Array(items) => Value::Array(items.into_iter().map(Value::wrap).collect()),
            other => other,
        }
    }

    fn container_addr(&self) -> Option<usize> {
        match self {
            Value::Container(container) => Some(container.addr()),
            Value::Model(model) => Some(model.container().addr()),
            _ => None,
        }
    }

    /// Converts a raw BSON value read from the store.
    ///
    /// Embedded documents come back as [`Value::Map`] and are wrapped when the
    /// value is written into a container.
    pub fn from_bson(bson: Bson) -> KaleResult<Value> {
        Ok(match bson {
            Bson::Null | Bson::Undefined => Value::Null,
            Bson::Boolean(b) => Value::Bool(b),
            Bson::Int32(i) => Value::Int(i64::from(i)),
            Bson::Int64(i) => Value::Int(i),
            Bson::Double(d) => Value::Double(d),
            Bson::String(s) => Value::String(s),
            Bson::DateTime(dt) => Value::DateTime(dt.to_chrono()),
            Bson::ObjectId(oid) => Value::ObjectId(oid),
            Bson::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::from_bson)
                    .collect::<KaleResult<Vec<_>>>()?,
            ),
            Bson::Document(document) => Value::Map(
                document
                    .into_iter()
                    .map(|(k, v)| Value::from_bson(v).map(|v| (k, v)))
                    .collect::<KaleResult<Vec<_>>>()?,
            ),
            other => {
                return Err(KaleError::UnsupportedValue(format!(
                    "BSON element type {:?} has no field value representation",
                    other.element_type()
                )));
            }
        })
    }

    /// Encodes the value as BSON.
    ///
    /// # Errors
    ///
    /// [`KaleError::UnsupportedValue`] if the value contains a cyclic reference.
    pub fn to_bson(&self) -> KaleResult<Bson> {
        self.encode(&mut Vec::new())
    }

    /// Encodes the value for the store. `stack` holds the addresses of the
    /// containers currently being encoded and rejects cycles.
    pub(crate) fn encode(&self, stack: &mut Vec<usize>) -> KaleResult<Bson> {
        Ok(match self {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(*b),
            Value::Int(i) => Bson::Int64(*i),
            Value::Double(d) => Bson::Double(*d),
            Value::String(s) => Bson::String(s.clone()),
            Value::DateTime(dt) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
            Value::ObjectId(oid) => Bson::ObjectId(*oid),
            Value::Array(items) => Bson::Array(
                items
                    .iter()
                    .map(|item| item.encode(stack))
                    .collect::<KaleResult<Vec<_>>>()?,
            ),
            Value::Map(entries) => {
                let mut document = Document::new();
                for (key, value) in entries {
                    document.insert(key.clone(), value.encode(stack)?);
                }
                Bson::Document(document)
            }
            Value::Container(container) => Bson::Document(container.encode(stack)?),
            Value::Model(model) => Bson::Document(model.container().encode(stack)?),
        })
    }

    /// Renders the value as JSON. Back-references to a container that is
    /// already being rendered come out as the string `"{...}"`.
    pub(crate) fn render(&self, stack: &mut Vec<usize>) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::Number(Number::from(*i)),
            Value::Double(d) => Number::from_f64(*d)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::DateTime(dt) => tagged("$date", dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::ObjectId(oid) => tagged("$oid", oid.to_hex()),
            Value::Array(items) => JsonValue::Array(items.iter().map(|item| item.render(stack)).collect()),
            Value::Map(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.render(stack)))
                    .collect(),
            ),
            Value::Container(container) => container.render(stack),
            Value::Model(model) => model.container().render(stack),
        }
    }
}

fn tagged(tag: &str, text: String) -> JsonValue {
    let mut map = JsonMap::new();
    map.insert(tag.to_string(), JsonValue::String(text));
    JsonValue::Object(map)
}

fn untag(map: &JsonMap<String, JsonValue>) -> Option<Value> {
    if map.len() != 1 {
        return None;
    }
    let (tag, text) = map.iter().next()?;
    let text = text.as_str()?;

    match tag.as_str() {
        "$oid" => ObjectId::parse_str(text).ok().map(Value::ObjectId),
        "$date" => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| Value::DateTime(dt.with_timezone(&Utc))),
        _ => None,
    }
}

/// Compares two entry lists as unordered mappings.
///
/// `stack` holds the container address pairs currently being compared. A
/// pair that is already on it is taken as equal, so cyclic containers compare
/// by shape instead of recursing forever.
fn mappings_equal(
    left: &[(String, Value)],
    right: &[(String, Value)],
    stack: &mut Vec<(usize, usize)>,
) -> bool {
    left.len() == right.len()
        && left.iter().all(|(key, value)| {
            right
                .iter()
                .find(|(other, _)| other == key)
                .is_some_and(|(_, other)| value.equals(other, stack))
        })
}

impl Value {
    pub(crate) fn equals(&self, other: &Value, stack: &mut Vec<(usize, usize)>) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Int(a), Value::Double(b)) | (Value::Double(b), Value::Int(a)) => *a as f64 == *b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::ObjectId(a), Value::ObjectId(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|(a, b)| a.equals(b, stack))
            }
            _ => {
                let pair = self
                    .container_addr()
                    .zip(other.container_addr());
                if let Some((a, b)) = pair {
                    if a == b || stack.contains(&(a, b)) {
                        return true;
                    }
                }

                let (Some(a), Some(b)) = (self.mapping_entries(), other.mapping_entries()) else {
                    return false;
                };
                if let Some(pair) = pair {
                    stack.push(pair);
                }
                let equal = mappings_equal(&a, &b, stack);
                if pair.is_some() {
                    stack.pop();
                }

                equal
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other, &mut Vec::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(&mut Vec::new()))
    }
}

/// Reference to a live model instance stored as a field value.
///
/// Holds the instance's storage and its collection binding so the typed
/// instance can be recovered with `Instance::<T>::from_model_ref`.
#[derive(Clone)]
pub struct ModelRef {
    container: AttrContainer,
    binding: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ModelRef {
    pub(crate) fn new(
        container: AttrContainer,
        binding: Arc<dyn Any + Send + Sync>,
        type_name: &'static str,
    ) -> Self {
        Self { container, binding, type_name }
    }

    /// The referenced instance's storage.
    pub fn container(&self) -> &AttrContainer {
        &self.container
    }

    /// Rust type name of the model the instance belongs to.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn binding(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.binding
    }
}

impl fmt::Debug for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name, self.container)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f32> for Value {
    fn from(d: f32) -> Self {
        Value::Double(f64::from(d))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<ObjectId> for Value {
    fn from(oid: ObjectId) -> Self {
        Value::ObjectId(oid)
    }
}

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(items: Vec<V>) -> Self {
        Value::array(items)
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(value: Option<V>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<AttrContainer> for Value {
    fn from(container: AttrContainer) -> Self {
        Value::Container(container)
    }
}

impl From<&AttrContainer> for Value {
    fn from(container: &AttrContainer) -> Self {
        Value::Container(container.clone())
    }
}

impl From<ModelRef> for Value {
    fn from(model: ModelRef) -> Self {
        Value::Model(model)
    }
}

impl TryFrom<Bson> for Value {
    type Error = KaleError;

    fn try_from(bson: Bson) -> KaleResult<Self> {
        Value::from_bson(bson)
    }
}

impl TryFrom<Document> for Value {
    type Error = KaleError;

    fn try_from(document: Document) -> KaleResult<Self> {
        Value::from_bson(Bson::Document(document))
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => match untag(&map) {
                Some(value) => value,
                None => Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
            },
        }
    }
}
