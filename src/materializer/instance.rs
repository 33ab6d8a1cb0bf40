//! Materialized instances and values.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};

use docql_core::metadata::CollectionKind;

use crate::error::DqlResult;

/// Shared handle to a materialized object; identity is pointer identity.
pub type InstanceRef = Arc<Instance>;

/// A typed value produced by the materializer
#[derive(Debug, Clone)]
pub enum MaterializedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Enum { type_name: String, variant: String },
    Object(InstanceRef),
    Collection(Collection),
}

impl PartialEq for MaterializedValue {
    fn eq(&self, other: &Self) -> bool {
        use MaterializedValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (
                Enum { type_name: ta, variant: va },
                Enum { type_name: tb, variant: vb },
            ) => ta == tb && va == vb,
            (Object(a), Object(b)) => Arc::ptr_eq(a, b),
            (Collection(a), Collection(b)) => a == b,
            _ => false,
        }
    }
}

impl MaterializedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, MaterializedValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MaterializedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MaterializedValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MaterializedValue::Float(f) => Some(*f),
            MaterializedValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MaterializedValue::String(s) => Some(s),
            MaterializedValue::Enum { variant, .. } => Some(variant),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&DateTime<Utc>> {
        match self {
            MaterializedValue::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&InstanceRef> {
        match self {
            MaterializedValue::Object(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            MaterializedValue::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    /// JSON rendering; object cycles become `{"$ref": "Type/key"}`
    pub fn to_json(&self) -> Value {
        self.render(&mut Vec::new())
    }

    fn render(&self, path: &mut Vec<*const Instance>) -> Value {
        match self {
            MaterializedValue::Null => Value::Null,
            MaterializedValue::Bool(b) => Value::Bool(*b),
            MaterializedValue::Int(i) => Value::from(*i),
            MaterializedValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            MaterializedValue::String(s) => Value::String(s.clone()),
            MaterializedValue::Timestamp(ts) => {
                Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            MaterializedValue::Enum { variant, .. } => Value::String(variant.clone()),
            MaterializedValue::Object(instance) => instance.render(path),
            MaterializedValue::Collection(collection) => {
                Value::Array(collection.items().iter().map(|v| v.render(path)).collect())
            }
        }
    }
}

/// Collection realized as the declared kind
#[derive(Debug, Clone, PartialEq)]
pub enum Collection {
    List(Vec<MaterializedValue>),
    /// Fixed-size, read-only
    Sequence(Box<[MaterializedValue]>),
    /// Insertion-ordered, without duplicates
    Set(Vec<MaterializedValue>),
}

impl Collection {
    pub fn build(kind: CollectionKind, items: Vec<MaterializedValue>) -> Self {
        match kind {
            CollectionKind::List => Collection::List(items),
            CollectionKind::Sequence => Collection::Sequence(items.into_boxed_slice()),
            CollectionKind::Set => {
                let mut unique: Vec<MaterializedValue> = Vec::with_capacity(items.len());
                for item in items {
                    if !unique.contains(&item) {
                        unique.push(item);
                    }
                }
                Collection::Set(unique)
            }
        }
    }

    pub fn kind(&self) -> CollectionKind {
        match self {
            Collection::List(_) => CollectionKind::List,
            Collection::Sequence(_) => CollectionKind::Sequence,
            Collection::Set(_) => CollectionKind::Set,
        }
    }

    pub fn items(&self) -> &[MaterializedValue] {
        match self {
            Collection::List(items) | Collection::Set(items) => items.as_slice(),
            Collection::Sequence(items) => &items[..],
        }
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}

/// A materialized object.
///
/// Fields stay mutable behind a lock so include loading can attach
/// navigations to instances already handed out through the identity map.
pub struct Instance {
    type_name: String,
    key: Option<String>,
    constructor: Option<String>,
    fields: RwLock<BTreeMap<String, MaterializedValue>>,
    /// (navigation, include plan) pairs already loaded onto this instance
    loaded: Mutex<HashSet<(String, String)>>,
}

impl Instance {
    pub fn new(
        type_name: impl Into<String>,
        key: Option<String>,
        constructor: Option<String>,
        fields: BTreeMap<String, MaterializedValue>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            key,
            constructor,
            fields: RwLock::new(fields),
            loaded: Mutex::new(HashSet::new()),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Identity key; `None` for complex and projected types
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Constructor used to create the instance, `None` for the implicit default
    pub fn constructor(&self) -> Option<&str> {
        self.constructor.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<MaterializedValue> {
        self.fields.read().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: MaterializedValue) {
        self.fields.write().insert(name.into(), value);
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.read().keys().cloned().collect()
    }

    /// Mark a navigation as loaded by one include plan; false when that
    /// plan already loaded it.
    pub fn mark_loaded(&self, navigation: &str, plan: &str) -> bool {
        self.loaded.lock().insert((navigation.to_string(), plan.to_string()))
    }

    /// Whether any include plan loaded the navigation
    pub fn is_loaded(&self, navigation: &str) -> bool {
        self.loaded.lock().iter().any(|(name, _)| name == navigation)
    }

    pub fn to_json(&self) -> Value {
        self.render(&mut Vec::new())
    }

    /// Convert into a caller-defined serde type
    pub fn deserialize<T: DeserializeOwned>(&self) -> DqlResult<T> {
        Ok(serde_json::from_value(self.to_json())?)
    }

    fn render(&self, path: &mut Vec<*const Instance>) -> Value {
        let ptr = self as *const Instance;
        if path.contains(&ptr) {
            let mut reference = Map::new();
            reference.insert(
                "$ref".to_string(),
                Value::String(format!("{}/{}", self.type_name, self.key.as_deref().unwrap_or(""))),
            );
            return Value::Object(reference);
        }

        path.push(ptr);
        let fields = self.fields.read().clone();
        let object = fields
            .iter()
            .map(|(name, value)| (name.clone(), value.render(path)))
            .collect::<Map<_, _>>();
        path.pop();
        Value::Object(object)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type_name", &self.type_name)
            .field("key", &self.key)
            .field("fields", &self.fields.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
