//! Entity metadata consumed by the translator, resolver and materializer.
//!
//! The model describes, per type:
//! - which property is the primary key and which collection stores the type
//! - the declared type of every property and how it is stored
//! - navigations, either child collections nested under the parent document
//!   or pointers to documents elsewhere in the store
//! - the constructors available for materialization
//!
//! A `Model` is plain data and deserializes from JSON, so hosts can ship it
//! alongside their schema.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};

/// Field path the store uses to address a document's own identity.
pub const DOCUMENT_ID_FIELD: &str = "__name__";

/// Scalar value types understood by the conversion layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    Bool,
    Int,
    Float,
    String,
    Timestamp,
    /// Enum-backed value, stored as the variant name
    Enum(String),
}

/// Concrete collection realization a property or navigation declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Growable list (`Vec`)
    #[default]
    List,
    /// Fixed, read-only ordered sequence
    Sequence,
    /// Insertion-ordered set without duplicates
    Set,
}

/// Declared target type of a property, parameter or projection member
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredType {
    Scalar(ScalarType),
    /// Value object stored inline in the owning document
    Complex(String),
    /// Another entity, materialized with identity resolution
    Entity(String),
    Collection {
        #[serde(default)]
        kind: CollectionKind,
        element: Box<DeclaredType>,
    },
}

/// Shape tag of a value, derived from its declared type only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ValueKind {
    Scalar,
    ComplexType,
    EntityReference,
    ScalarList,
    ObjectList,
}

impl DeclaredType {
    pub fn bool() -> Self {
        DeclaredType::Scalar(ScalarType::Bool)
    }

    pub fn int() -> Self {
        DeclaredType::Scalar(ScalarType::Int)
    }

    pub fn float() -> Self {
        DeclaredType::Scalar(ScalarType::Float)
    }

    pub fn string() -> Self {
        DeclaredType::Scalar(ScalarType::String)
    }

    pub fn timestamp() -> Self {
        DeclaredType::Scalar(ScalarType::Timestamp)
    }

    pub fn enumeration(name: &str) -> Self {
        DeclaredType::Scalar(ScalarType::Enum(name.to_string()))
    }

    pub fn complex(name: &str) -> Self {
        DeclaredType::Complex(name.to_string())
    }

    pub fn entity(name: &str) -> Self {
        DeclaredType::Entity(name.to_string())
    }

    pub fn collection(kind: CollectionKind, element: DeclaredType) -> Self {
        DeclaredType::Collection {
            kind,
            element: Box::new(element),
        }
    }

    pub fn list(element: DeclaredType) -> Self {
        Self::collection(CollectionKind::List, element)
    }

    /// Classify the value shape this declared type produces.
    pub fn value_kind(&self) -> ValueKind {
        match self {
            DeclaredType::Scalar(_) => ValueKind::Scalar,
            DeclaredType::Complex(_) => ValueKind::ComplexType,
            DeclaredType::Entity(_) => ValueKind::EntityReference,
            DeclaredType::Collection { element, .. } => match element.as_ref() {
                DeclaredType::Scalar(_) => ValueKind::ScalarList,
                _ => ValueKind::ObjectList,
            },
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, DeclaredType::Collection { .. })
    }

    /// Scalar type if this is a scalar
    pub fn as_scalar(&self) -> Option<&ScalarType> {
        match self {
            DeclaredType::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Enum name of a scalar enum, or of the elements of an enum collection
    pub fn enum_name(&self) -> Option<&str> {
        match self {
            DeclaredType::Scalar(ScalarType::Enum(name)) => Some(name),
            DeclaredType::Collection { element, .. } => element.enum_name(),
            _ => None,
        }
    }
}

/// One persisted (or ignored) property of a type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    /// Field name in the stored document (defaults to `name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_name: Option<String>,
    pub declared: DeclaredType,
    #[serde(default)]
    pub nullable: bool,
    /// Whether null values are written to the store instead of being dropped
    #[serde(default)]
    pub persist_null: bool,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default = "default_true")]
    pub settable: bool,
}

fn default_true() -> bool {
    true
}

impl PropertyDescriptor {
    pub fn new(name: &str, declared: DeclaredType) -> Self {
        Self {
            name: name.to_string(),
            stored_name: None,
            declared,
            nullable: false,
            persist_null: false,
            ignored: false,
            settable: true,
        }
    }

    pub fn stored_as(mut self, stored_name: &str) -> Self {
        self.stored_name = Some(stored_name.to_string());
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn persisting_null(mut self) -> Self {
        self.nullable = true;
        self.persist_null = true;
        self
    }

    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.settable = false;
        self
    }

    pub fn stored_name(&self) -> &str {
        self.stored_name.as_deref().unwrap_or(&self.name)
    }
}

/// Singular navigations hold one target, collection navigations many
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    Singular,
    Collection(CollectionKind),
}

/// Physical layout of a navigation in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationStorage {
    /// Targets live in a collection nested under the parent document path
    ChildCollection { subcollection: String },
    /// The parent document stores the target's document path in `field`
    Reference { field: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationDescriptor {
    pub name: String,
    pub target: String,
    pub multiplicity: Multiplicity,
    pub storage: NavigationStorage,
}

impl NavigationDescriptor {
    pub fn child_collection(name: &str, target: &str, kind: CollectionKind, subcollection: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            multiplicity: Multiplicity::Collection(kind),
            storage: NavigationStorage::ChildCollection {
                subcollection: subcollection.to_string(),
            },
        }
    }

    pub fn reference(name: &str, target: &str, field: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            multiplicity: Multiplicity::Singular,
            storage: NavigationStorage::Reference {
                field: field.to_string(),
            },
        }
    }

    pub fn reference_list(name: &str, target: &str, kind: CollectionKind, field: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            multiplicity: Multiplicity::Collection(kind),
            storage: NavigationStorage::Reference {
                field: field.to_string(),
            },
        }
    }

    pub fn is_singular(&self) -> bool {
        matches!(self.multiplicity, Multiplicity::Singular)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub declared: DeclaredType,
}

/// A constructor the materializer may call, by parameter names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructorDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
}

impl ConstructorDescriptor {
    pub fn new(name: &str, parameters: &[(&str, DeclaredType)]) -> Self {
        Self {
            name: name.to_string(),
            parameters: parameters
                .iter()
                .map(|(n, d)| ParameterDescriptor {
                    name: n.to_string(),
                    declared: d.clone(),
                })
                .collect(),
        }
    }

    pub fn parameterless(name: &str) -> Self {
        Self::new(name, &[])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Entity { collection: String, key: String },
    Complex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub kind: TypeKind,
    #[serde(default)]
    pub properties: Vec<PropertyDescriptor>,
    #[serde(default)]
    pub navigations: Vec<NavigationDescriptor>,
    /// Empty means an implicit parameterless constructor
    #[serde(default)]
    pub constructors: Vec<ConstructorDescriptor>,
}

impl TypeDescriptor {
    pub fn entity(name: &str, collection: &str, key: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: TypeKind::Entity {
                collection: collection.to_string(),
                key: key.to_string(),
            },
            properties: Vec::new(),
            navigations: Vec::new(),
            constructors: Vec::new(),
        }
    }

    pub fn complex(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: TypeKind::Complex,
            properties: Vec::new(),
            navigations: Vec::new(),
            constructors: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_navigation(mut self, navigation: NavigationDescriptor) -> Self {
        self.navigations.push(navigation);
        self
    }

    pub fn with_constructor(mut self, constructor: ConstructorDescriptor) -> Self {
        self.constructors.push(constructor);
        self
    }

    pub fn is_entity(&self) -> bool {
        matches!(self.kind, TypeKind::Entity { .. })
    }

    /// Root collection name of an entity type
    pub fn collection(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::Entity { collection, .. } => Some(collection),
            TypeKind::Complex => None,
        }
    }

    /// Primary key property name of an entity type
    pub fn key(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::Entity { key, .. } => Some(key),
            TypeKind::Complex => None,
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn navigation(&self, name: &str) -> Option<&NavigationDescriptor> {
        self.navigations.iter().find(|n| n.name == name)
    }

    pub fn is_key(&self, property: &str) -> bool {
        self.key() == Some(property)
    }

    /// Properties that are read from and written to documents
    pub fn persisted_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| !p.ignored)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumVariant {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDescriptor {
    pub name: String,
    pub variants: Vec<EnumVariant>,
}

impl EnumDescriptor {
    /// Build an enum whose variants are numbered from zero in order
    pub fn new(name: &str, variants: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            variants: variants
                .iter()
                .enumerate()
                .map(|(i, v)| EnumVariant {
                    name: v.to_string(),
                    value: i as i64,
                })
                .collect(),
        }
    }

    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.variants
            .iter()
            .find(|v| v.value == value)
            .map(|v| v.name.as_str())
    }

    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.variants.iter().find(|v| v.name == name).map(|v| v.value)
    }
}

/// Complete metadata for all types a query may touch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    #[serde(default)]
    types: HashMap<String, TypeDescriptor>,
    #[serde(default)]
    enums: HashMap<String, EnumDescriptor>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.insert(descriptor.name.clone(), descriptor);
        self
    }

    pub fn with_enum(mut self, descriptor: EnumDescriptor) -> Self {
        self.enums.insert(descriptor.name.clone(), descriptor);
        self
    }

    pub fn type_descriptor(&self, name: &str) -> QueryResult<&TypeDescriptor> {
        self.types
            .get(name)
            .ok_or_else(|| QueryError::UnknownType(name.to_string()))
    }

    pub fn entity(&self, name: &str) -> QueryResult<&TypeDescriptor> {
        let descriptor = self.type_descriptor(name)?;
        if !descriptor.is_entity() {
            return Err(QueryError::unsupported(format!(
                "'{}' is a complex type and cannot be queried directly",
                name
            )));
        }
        Ok(descriptor)
    }

    pub fn enum_descriptor(&self, name: &str) -> QueryResult<&EnumDescriptor> {
        self.enums
            .get(name)
            .ok_or_else(|| QueryError::UnknownType(name.to_string()))
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }
}
