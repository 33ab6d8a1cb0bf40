//! AST resolver.
//!
//! Binds a compiled `QueryNode` against execution parameters and validates it
//! against the model. The node is only borrowed; each execution gets its own
//! `ResolvedQuery` with concrete values.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::ast::*;
use crate::error::{QueryError, QueryResult};
use crate::metadata::{DeclaredType, Model, NavigationDescriptor, DOCUMENT_ID_FIELD};

/// Bind variables for one execution
pub type Parameters = HashMap<String, Value>;

/// Filter with every value bound
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedFilter {
    Field {
        field: FieldRef,
        op: FilterOperator,
        value: Value,
    },
    Or(Vec<ResolvedFilter>),
    And(Vec<ResolvedFilter>),
}

impl ResolvedFilter {
    /// Visit every field comparison, depth first
    pub fn for_each_field<'a>(&'a self, f: &mut impl FnMut(&'a FieldRef, FilterOperator, &'a Value)) {
        match self {
            ResolvedFilter::Field { field, op, value } => f(field, *op, value),
            ResolvedFilter::Or(members) | ResolvedFilter::And(members) => {
                members.iter().for_each(|m| m.for_each_field(f))
            }
        }
    }

    pub fn has_or(&self) -> bool {
        match self {
            ResolvedFilter::Field { .. } => false,
            ResolvedFilter::Or(_) => true,
            ResolvedFilter::And(members) => members.iter().any(|m| m.has_or()),
        }
    }
}

/// How the root documents are reached
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Identity lookup of one document id
    Document(String),
    /// Filtered query; the list is an implicit AND
    Collection { filters: Vec<ResolvedFilter> },
}

/// Validated navigation load with its bound sub-plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncludePlan {
    pub navigation: NavigationDescriptor,
    pub target_type: String,
    pub filters: Vec<ResolvedFilter>,
    pub order_by: Vec<OrderClause>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
    pub children: Vec<IncludePlan>,
}

/// A query ready for execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedQuery {
    pub collection: String,
    pub entity_type: String,
    pub key_property: String,
    pub access: Access,
    pub order_by: Vec<OrderClause>,
    pub limit: Option<usize>,
    pub limit_to_last: Option<usize>,
    pub skip: Option<usize>,
    pub aggregation: Option<Aggregation>,
    pub cardinality: ResultCardinality,
    pub projection: Projection,
    pub includes: Vec<IncludePlan>,
}

impl ResolvedQuery {
    pub fn filters(&self) -> &[ResolvedFilter] {
        match &self.access {
            Access::Document(_) => &[],
            Access::Collection { filters } => filters,
        }
    }

    pub fn is_fast_path(&self) -> bool {
        matches!(self.access, Access::Document(_))
    }
}

pub struct Resolver<'m> {
    model: &'m Model,
}

impl<'m> Resolver<'m> {
    pub fn new(model: &'m Model) -> Self {
        Self { model }
    }

    pub fn resolve(&self, node: &QueryNode, parameters: &Parameters) -> QueryResult<ResolvedQuery> {
        let access = match &node.target {
            QueryTarget::Document(id) => Access::Document(document_id(bind(id, parameters)?, id)?),
            QueryTarget::Collection => {
                let filters = self.resolve_filters(&node.filters, parameters)?;
                fast_path(filters)
            }
        };

        let includes = node
            .includes
            .iter()
            .map(|info| self.resolve_include(info, &node.entity_type, parameters))
            .collect::<QueryResult<Vec<_>>>()?;

        Ok(ResolvedQuery {
            collection: node.collection.clone(),
            entity_type: node.entity_type.clone(),
            key_property: node.key_property().to_string(),
            access,
            order_by: node.order_by.clone(),
            limit: count(node.limit.as_ref(), "limit", parameters)?,
            limit_to_last: count(node.limit_to_last.as_ref(), "limit_to_last", parameters)?,
            skip: count(node.skip.as_ref(), "skip", parameters)?,
            aggregation: node.aggregation.clone(),
            cardinality: node.cardinality,
            projection: node.projection.clone(),
            includes,
        })
    }

    fn resolve_filters(&self, filters: &[FilterNode], parameters: &Parameters) -> QueryResult<Vec<ResolvedFilter>> {
        let mut resolved = Vec::with_capacity(filters.len());
        for filter in filters {
            match self.resolve_filter(filter, parameters)? {
                ResolvedFilter::And(members) => resolved.extend(members),
                other => resolved.push(other),
            }
        }
        Ok(resolved)
    }

    fn resolve_filter(&self, filter: &FilterNode, parameters: &Parameters) -> QueryResult<ResolvedFilter> {
        match filter {
            FilterNode::Where(clause) => self.resolve_clause(clause, parameters),
            FilterNode::Or(group) => {
                let mut members = Vec::with_capacity(group.members.len());
                for member in &group.members {
                    match self.resolve_filter(member, parameters)? {
                        ResolvedFilter::Or(nested) => members.extend(nested),
                        other => members.push(other),
                    }
                }
                Ok(unwrap_single(members, ResolvedFilter::Or))
            }
            FilterNode::And(group) => {
                let mut members = Vec::with_capacity(group.len());
                for member in group {
                    match self.resolve_filter(member, parameters)? {
                        ResolvedFilter::And(nested) => members.extend(nested),
                        other => members.push(other),
                    }
                }
                Ok(unwrap_single(members, ResolvedFilter::And))
            }
        }
    }

    fn resolve_clause(&self, clause: &WhereClause, parameters: &Parameters) -> QueryResult<ResolvedFilter> {
        let field = &clause.field;
        let op = clause.operator;
        let mut value = bind(&clause.value, parameters)?;

        if value.is_null() {
            match op {
                FilterOperator::EqualTo | FilterOperator::NotEqualTo => {
                    if !field.persist_null {
                        return Err(QueryError::NullFilterUnsupported(field.property.clone()));
                    }
                }
                other => {
                    return Err(QueryError::unsupported(format!(
                        "operator {} on '{}' cannot compare against null",
                        other, field.property
                    )))
                }
            }
        }

        if op.takes_list() && !value.is_array() {
            return Err(QueryError::InvalidParameter {
                name: value_name(&clause.value),
                reason: format!("operator {} needs a list, got {}", op, value),
            });
        }

        if let Some(enum_name) = &field.enum_hint {
            value = self.apply_enum_hint(enum_name, value, &clause.value)?;
        }

        if field.is_document_id() {
            value = match value {
                Value::Array(ids) => Value::Array(
                    ids.into_iter()
                        .map(|id| document_id(id, &clause.value).map(Value::String))
                        .collect::<QueryResult<_>>()?,
                ),
                Value::Null => Value::Null,
                id => Value::String(document_id(id, &clause.value)?),
            };
        }

        Ok(ResolvedFilter::Field {
            field: field.clone(),
            op,
            value,
        })
    }

    /// Numbers compared against an enum field become the stored variant name
    fn apply_enum_hint(&self, enum_name: &str, value: Value, source: &ValueExpr) -> QueryResult<Value> {
        let descriptor = self.model.enum_descriptor(enum_name)?;
        let convert = |v: Value| -> QueryResult<Value> {
            match v.as_i64() {
                Some(n) => descriptor
                    .name_of(n)
                    .map(|name| Value::String(name.to_string()))
                    .ok_or_else(|| QueryError::InvalidParameter {
                        name: value_name(source),
                        reason: format!("{} is not a value of enum {}", n, enum_name),
                    }),
                None => Ok(v),
            }
        };
        match value {
            Value::Array(items) => Ok(Value::Array(
                items.into_iter().map(convert).collect::<QueryResult<_>>()?,
            )),
            other => convert(other),
        }
    }

    fn resolve_include(&self, info: &IncludeInfo, parent_type: &str, parameters: &Parameters) -> QueryResult<IncludePlan> {
        let parent = self.model.type_descriptor(parent_type)?;
        let Some(navigation) = parent.navigation(&info.navigation) else {
            let first = info.navigation.split('.').next().unwrap_or_default();
            let reason = match parent.property(first).map(|p| &p.declared) {
                Some(DeclaredType::Complex(complex)) => format!(
                    "navigations cannot be loaded through complex property '{}' ({})",
                    first, complex
                ),
                Some(_) => format!("'{}' is a property of '{}', not a navigation", first, parent_type),
                None => format!("'{}' has no navigation '{}'", parent_type, info.navigation),
            };
            return Err(QueryError::InvalidInclude {
                path: info.navigation.clone(),
                reason,
            });
        };

        let target = self.model.entity(&navigation.target).map_err(|_| QueryError::InvalidInclude {
            path: info.navigation.clone(),
            reason: format!("target '{}' is not an entity type", navigation.target),
        })?;

        let children = info
            .nested
            .iter()
            .map(|child| self.resolve_include(child, &target.name, parameters))
            .collect::<QueryResult<Vec<_>>>()?;

        Ok(IncludePlan {
            navigation: navigation.clone(),
            target_type: target.name.clone(),
            filters: self.resolve_filters(&info.filters, parameters)?,
            order_by: info.order_by.clone(),
            limit: count(info.limit.as_ref(), "limit", parameters)?,
            skip: count(info.skip.as_ref(), "skip", parameters)?,
            children,
        })
    }
}

/// Exactly one key equality and nothing else is an identity lookup
fn fast_path(filters: Vec<ResolvedFilter>) -> Access {
    if let [ResolvedFilter::Field {
        field,
        op: FilterOperator::EqualTo,
        value: Value::String(id),
    }] = filters.as_slice()
    {
        if field.path == DOCUMENT_ID_FIELD {
            return Access::Document(id.clone());
        }
    }
    Access::Collection { filters }
}

fn unwrap_single(mut members: Vec<ResolvedFilter>, wrap: fn(Vec<ResolvedFilter>) -> ResolvedFilter) -> ResolvedFilter {
    if members.len() == 1 {
        members.remove(0)
    } else {
        wrap(members)
    }
}

fn bind(value: &ValueExpr, parameters: &Parameters) -> QueryResult<Value> {
    match value {
        ValueExpr::Constant(v) => Ok(v.clone()),
        ValueExpr::Parameter(name) => parameters
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::MissingParameter(name.clone())),
    }
}

fn value_name(value: &ValueExpr) -> String {
    match value {
        ValueExpr::Parameter(name) => name.clone(),
        ValueExpr::Constant(_) => "constant".to_string(),
    }
}

fn document_id(value: Value, source: &ValueExpr) -> QueryResult<String> {
    match value {
        Value::String(id) => Ok(id),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(QueryError::InvalidParameter {
            name: value_name(source),
            reason: format!("document id must be a string, got {}", other),
        }),
    }
}

/// Pagination count; must be a non-negative integer
fn count(value: Option<&ValueExpr>, label: &str, parameters: &Parameters) -> QueryResult<Option<usize>> {
    let Some(expr) = value else {
        return Ok(None);
    };
    let bound = bind(expr, parameters)?;
    bound
        .as_u64()
        .map(|n| Some(n as usize))
        .ok_or_else(|| QueryError::InvalidParameter {
            name: match expr {
                ValueExpr::Parameter(name) => name.clone(),
                ValueExpr::Constant(_) => label.to_string(),
            },
            reason: format!("{} must be a non-negative integer, got {}", label, bound),
        })
}
