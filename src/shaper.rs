//! Result shaper.
//!
//! Converts raw store records into `ShapedItem`s: logical result names
//! mapped to values tagged by their *declared* type. The tag never depends on
//! the raw value, so an empty or missing list still shapes as a list.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use docql_core::metadata::{DeclaredType, Model, ValueKind};
use docql_core::{Projection, ProjectionMember};

use crate::error::{DqlError, DqlResult};
use crate::store::RawDocument;

/// Logical result name → shaped value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapedItem {
    entries: BTreeMap<String, ShapedValue>,
}

impl ShapedItem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ShapedValue) {
        self.entries.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ShapedValue> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ShapedValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shaped content, chosen by the declared type
#[derive(Debug, Clone, PartialEq)]
pub enum ShapedContent {
    Scalar,
    Complex(Option<ShapedItem>),
    EntityReference(Option<ShapedItem>),
    ScalarList(Vec<Value>),
    ObjectList(Vec<ShapedItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapedValue {
    pub declared: DeclaredType,
    /// Value as extracted from the record
    pub raw: Value,
    pub content: ShapedContent,
}

impl ShapedValue {
    pub fn kind(&self) -> ValueKind {
        match self.content {
            ShapedContent::Scalar => ValueKind::Scalar,
            ShapedContent::Complex(_) => ValueKind::ComplexType,
            ShapedContent::EntityReference(_) => ValueKind::EntityReference,
            ShapedContent::ScalarList(_) => ValueKind::ScalarList,
            ShapedContent::ObjectList(_) => ValueKind::ObjectList,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(
            self.content,
            ShapedContent::Scalar | ShapedContent::Complex(None) | ShapedContent::EntityReference(None)
        ) && self.raw.is_null()
    }
}

pub struct Shaper<'m> {
    model: &'m Model,
}

impl<'m> Shaper<'m> {
    pub fn new(model: &'m Model) -> Self {
        Self { model }
    }

    /// Shape one record of `entity_type` under a projection.
    pub fn shape(&self, doc: &RawDocument, projection: &Projection, entity_type: &str) -> DqlResult<ShapedItem> {
        match projection {
            Projection::Entity => self.shape_entity(doc, entity_type),
            Projection::Field(member) => {
                let mut item = ShapedItem::new();
                item.insert(member.result_name(), self.shape_member(doc, member)?);
                Ok(item)
            }
            Projection::Members(projected) => {
                let mut item = ShapedItem::new();
                for member in &projected.members {
                    item.insert(member.result_name(), self.shape_member(doc, member)?);
                }
                Ok(item)
            }
        }
    }

    /// One entry per persisted property; the key comes from the document id.
    pub fn shape_entity(&self, doc: &RawDocument, entity_type: &str) -> DqlResult<ShapedItem> {
        let empty = Map::new();
        let data = doc.data.as_object().unwrap_or(&empty);
        self.shape_object(data, entity_type, Some(doc.id()))
    }

    fn shape_member(&self, doc: &RawDocument, member: &ProjectionMember) -> DqlResult<ShapedValue> {
        let raw = doc.field(&member.source).unwrap_or(Value::Null);
        self.shape_value(&member.declared, raw)
    }

    fn shape_object(&self, data: &Map<String, Value>, type_name: &str, id: Option<&str>) -> DqlResult<ShapedItem> {
        let descriptor = self.model.type_descriptor(type_name)?;
        let mut item = ShapedItem::new();
        for property in descriptor.persisted_properties() {
            let raw = match id {
                Some(id) if descriptor.is_key(&property.name) => Value::String(id.to_string()),
                _ => data.get(property.stored_name()).cloned().unwrap_or(Value::Null),
            };
            let value = self.shape_value(&property.declared, raw).map_err(|e| match e {
                DqlError::Materialization(reason) => DqlError::Materialization(format!(
                    "{}.{}: {}",
                    type_name, property.name, reason
                )),
                other => other,
            })?;
            item.insert(property.name.clone(), value);
        }
        Ok(item)
    }

    /// Shape a raw value by its declared type.
    pub fn shape_value(&self, declared: &DeclaredType, raw: Value) -> DqlResult<ShapedValue> {
        let content = match declared {
            DeclaredType::Scalar(_) => ShapedContent::Scalar,
            DeclaredType::Complex(type_name) => ShapedContent::Complex(match &raw {
                Value::Object(map) => Some(self.shape_object(map, type_name, None)?),
                Value::Null => None,
                other => return Err(expected("an object", other)),
            }),
            DeclaredType::Entity(type_name) => ShapedContent::EntityReference(match &raw {
                Value::Object(map) => Some(self.shape_object(map, type_name, None)?),
                // a stored path; loaded by includes, not by shaping
                _ => None,
            }),
            DeclaredType::Collection { element, .. } => {
                let items = match &raw {
                    Value::Array(items) => items.as_slice(),
                    Value::Null => &[],
                    other => return Err(expected("a list", other)),
                };
                match element.as_ref() {
                    DeclaredType::Scalar(_) => ShapedContent::ScalarList(items.to_vec()),
                    DeclaredType::Complex(type_name) | DeclaredType::Entity(type_name) => {
                        let mut shaped = Vec::with_capacity(items.len());
                        for item in items {
                            let Value::Object(map) = item else {
                                return Err(expected("an object element", item));
                            };
                            shaped.push(self.shape_object(map, type_name, None)?);
                        }
                        ShapedContent::ObjectList(shaped)
                    }
                    DeclaredType::Collection { .. } => {
                        return Err(DqlError::materialization("nested collections are not supported"))
                    }
                }
            }
        };
        Ok(ShapedValue {
            declared: declared.clone(),
            raw,
            content,
        })
    }
}

fn expected(what: &str, got: &Value) -> DqlError {
    DqlError::materialization(format!("expected {}, got {}", what, got))
}
