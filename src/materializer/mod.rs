//! Materializer.
//!
//! Turns shaped items into typed instances. Scalars go through the
//! conversion layer, nested objects recurse, entities resolve through the
//! per-execution [`IdentityMap`], and collections take their declared kind.

pub mod convert;
mod identity;
mod instance;
pub mod plan;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use docql_core::metadata::{DeclaredType, Model};
use docql_core::Projection;

use crate::error::{DqlError, DqlResult};
use crate::shaper::{ShapedContent, ShapedItem, ShapedValue};

pub use identity::IdentityMap;
pub use instance::{Collection, Instance, InstanceRef, MaterializedValue};
pub use plan::{CacheStats, MaterializationPlan, PlanCache};

pub struct Materializer<'a> {
    model: &'a Model,
    plans: &'a PlanCache,
    identities: &'a IdentityMap,
}

impl<'a> Materializer<'a> {
    pub fn new(model: &'a Model, plans: &'a PlanCache, identities: &'a IdentityMap) -> Self {
        Self {
            model,
            plans,
            identities,
        }
    }

    /// Materialize a shaped root item under its projection.
    pub fn materialize_result(
        &self,
        item: &ShapedItem,
        projection: &Projection,
        entity_type: &str,
    ) -> DqlResult<MaterializedValue> {
        match projection {
            Projection::Entity => Ok(MaterializedValue::Object(self.materialize(item, entity_type)?)),
            Projection::Field(member) => match item.get(member.result_name()) {
                Some(value) => self.materialize_value(value),
                None => Ok(MaterializedValue::Null),
            },
            Projection::Members(projected) => {
                Ok(MaterializedValue::Object(self.materialize(item, &projected.type_name)?))
            }
        }
    }

    /// Materialize one object; entities with a key go through the identity map.
    pub fn materialize(&self, item: &ShapedItem, type_name: &str) -> DqlResult<InstanceRef> {
        let key = self.identity_key(item, type_name);
        if let Some(key) = &key {
            if let Some(existing) = self.identities.get(type_name, key) {
                tracing::trace!("[MATERIALIZER] Identity hit {}/{}", type_name, key);
                return Ok(existing);
            }
        }

        let names: Vec<String> = item.names().map(str::to_string).collect();
        let plan = self.plans.plan_for(self.model, type_name, &names)?;

        let mut fields = BTreeMap::new();
        for name in plan.assigned() {
            if let Some(value) = item.get(name) {
                let value = self.materialize_value(value).map_err(|e| match e {
                    DqlError::Materialization(reason) => {
                        DqlError::Materialization(format!("{}.{}: {}", type_name, name, reason))
                    }
                    other => other,
                })?;
                fields.insert(name.to_string(), value);
            }
        }

        let instance = Arc::new(Instance::new(
            type_name,
            key.clone(),
            plan.constructor.clone(),
            fields,
        ));
        Ok(match key {
            Some(key) => self.identities.register(type_name, &key, instance),
            None => instance,
        })
    }

    /// Materialize one shaped value, dispatching on its kind.
    pub fn materialize_value(&self, value: &ShapedValue) -> DqlResult<MaterializedValue> {
        match (&value.content, &value.declared) {
            (ShapedContent::Scalar, DeclaredType::Scalar(scalar)) => {
                convert::convert_scalar(self.model, scalar, &value.raw)
            }
            (ShapedContent::Scalar, declared) => {
                Err(DqlError::materialization(format!("{:?} is not a scalar type", declared)))
            }
            (ShapedContent::Complex(item), declared) | (ShapedContent::EntityReference(item), declared) => {
                match item {
                    Some(item) => Ok(MaterializedValue::Object(self.materialize(item, object_type(declared)?)?)),
                    None => Ok(MaterializedValue::Null),
                }
            }
            (ShapedContent::ScalarList(items), DeclaredType::Collection { kind, element }) => {
                let DeclaredType::Scalar(scalar) = element.as_ref() else {
                    return Err(DqlError::materialization("scalar list with a non-scalar element type"));
                };
                let values = items
                    .iter()
                    .map(|raw| convert::convert_scalar(self.model, scalar, raw))
                    .collect::<DqlResult<Vec<_>>>()?;
                Ok(MaterializedValue::Collection(Collection::build(*kind, values)))
            }
            (ShapedContent::ObjectList(items), DeclaredType::Collection { kind, element }) => {
                let type_name = object_type(element)?;
                let values = items
                    .iter()
                    .map(|item| self.materialize(item, type_name).map(MaterializedValue::Object))
                    .collect::<DqlResult<Vec<_>>>()?;
                Ok(MaterializedValue::Collection(Collection::build(*kind, values)))
            }
            (_, declared) => Err(DqlError::materialization(format!(
                "{:?} is not a collection type",
                declared
            ))),
        }
    }

    fn identity_key(&self, item: &ShapedItem, type_name: &str) -> Option<String> {
        let descriptor = self.model.type_descriptor(type_name).ok()?;
        let key = item.get(descriptor.key()?)?;
        match &key.raw {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

fn object_type(declared: &DeclaredType) -> DqlResult<&str> {
    match declared {
        DeclaredType::Complex(name) | DeclaredType::Entity(name) => Ok(name),
        other => Err(DqlError::materialization(format!("{:?} is not an object type", other))),
    }
}
