//! Query AST shared by translation, resolution and execution.
//!
//! A `QueryNode` is produced once per compiled query and treated as an
//! immutable template afterwards: resolution reads it and produces a
//! separate `ResolvedQuery` for each execution.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metadata::{DeclaredType, DOCUMENT_ID_FIELD};

/// Store-native filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    EqualTo,
    NotEqualTo,
    LessThan,
    LessThanOrEqualTo,
    GreaterThan,
    GreaterThanOrEqualTo,
    ArrayContains,
    In,
    ArrayContainsAny,
    NotIn,
}

impl FilterOperator {
    /// Operators the store treats as range/inequality filters
    pub fn is_inequality(&self) -> bool {
        matches!(
            self,
            FilterOperator::NotEqualTo
                | FilterOperator::LessThan
                | FilterOperator::LessThanOrEqualTo
                | FilterOperator::GreaterThan
                | FilterOperator::GreaterThanOrEqualTo
                | FilterOperator::NotIn
        )
    }

    /// Operators whose value is a list of candidates
    pub fn takes_list(&self) -> bool {
        matches!(
            self,
            FilterOperator::In | FilterOperator::ArrayContainsAny | FilterOperator::NotIn
        )
    }

    /// Operator equivalent to `!(field op value)`, when the store has one
    pub fn negated(&self) -> Option<FilterOperator> {
        match self {
            FilterOperator::EqualTo => Some(FilterOperator::NotEqualTo),
            FilterOperator::NotEqualTo => Some(FilterOperator::EqualTo),
            FilterOperator::LessThan => Some(FilterOperator::GreaterThanOrEqualTo),
            FilterOperator::LessThanOrEqualTo => Some(FilterOperator::GreaterThan),
            FilterOperator::GreaterThan => Some(FilterOperator::LessThanOrEqualTo),
            FilterOperator::GreaterThanOrEqualTo => Some(FilterOperator::LessThan),
            FilterOperator::In => Some(FilterOperator::NotIn),
            FilterOperator::NotIn => Some(FilterOperator::In),
            FilterOperator::ArrayContains | FilterOperator::ArrayContainsAny => None,
        }
    }

    /// Operator to use when the operands are swapped (`5 < x` is `x > 5`)
    pub fn mirrored(&self) -> FilterOperator {
        match self {
            FilterOperator::LessThan => FilterOperator::GreaterThan,
            FilterOperator::LessThanOrEqualTo => FilterOperator::GreaterThanOrEqualTo,
            FilterOperator::GreaterThan => FilterOperator::LessThan,
            FilterOperator::GreaterThanOrEqualTo => FilterOperator::LessThanOrEqualTo,
            other => *other,
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Value of a clause, bound at execution time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueExpr {
    Constant(Value),
    Parameter(String),
}

impl ValueExpr {
    pub fn constant(value: impl Into<Value>) -> Self {
        ValueExpr::Constant(value.into())
    }

    pub fn parameter(name: &str) -> Self {
        ValueExpr::Parameter(name.to_string())
    }
}

/// A field a clause or ordering targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    /// Dot-separated stored path (`address.city`), or `__name__`
    pub path: String,
    /// Property path as written in the query (`Address.City`)
    pub property: String,
    pub declared: DeclaredType,
    pub persist_null: bool,
    /// Enum type backing the field, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_hint: Option<String>,
}

impl FieldRef {
    /// Reference to the document identity
    pub fn document_id(property: &str) -> Self {
        Self {
            path: DOCUMENT_ID_FIELD.to_string(),
            property: property.to_string(),
            declared: DeclaredType::string(),
            persist_null: false,
            enum_hint: None,
        }
    }

    pub fn is_document_id(&self) -> bool {
        self.path == DOCUMENT_ID_FIELD
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    pub field: FieldRef,
    pub operator: FilterOperator,
    pub value: ValueExpr,
}

impl WhereClause {
    pub fn new(field: FieldRef, operator: FilterOperator, value: ValueExpr) -> Self {
        Self {
            field,
            operator,
            value,
        }
    }

    pub fn is_key_equality(&self) -> bool {
        self.field.is_document_id() && self.operator == FilterOperator::EqualTo
    }
}

/// Disjunction of filter nodes: `B OR C` inside `A AND (B OR C)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrFilterGroup {
    pub members: Vec<FilterNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterNode {
    Where(WhereClause),
    Or(OrFilterGroup),
    /// Conjunction nested inside a disjunction
    And(Vec<FilterNode>),
}

impl FilterNode {
    /// Visit every clause in this node, depth first
    pub fn for_each_clause<'a>(&'a self, f: &mut impl FnMut(&'a WhereClause)) {
        match self {
            FilterNode::Where(clause) => f(clause),
            FilterNode::Or(group) => group.members.iter().for_each(|m| m.for_each_clause(f)),
            FilterNode::And(members) => members.iter().for_each(|m| m.for_each_clause(f)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderClause {
    pub field: FieldRef,
    pub direction: Direction,
}

/// How a query addresses its documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryTarget {
    Collection,
    /// Single-document fast path: identity lookup
    Document(ValueExpr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateKind {
    Count,
    Any,
    Sum,
    Average,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub kind: AggregateKind,
    /// Aggregated field (none for Count/Any)
    pub field: Option<FieldRef>,
    /// Selector may yield null (Min/Max over nothing returns null)
    #[serde(default)]
    pub nullable: bool,
}

/// Shape of the final result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCardinality {
    Sequence,
    First { or_default: bool },
    Single { or_default: bool },
    Last { or_default: bool },
}

/// One member of a projected result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionMember {
    /// Result name; `None` keeps the dot-qualified source path
    pub name: Option<String>,
    /// Stored source path, `__name__` for the key
    pub source: String,
    pub declared: DeclaredType,
}

impl ProjectionMember {
    pub fn result_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.source)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedType {
    pub type_name: String,
    pub members: Vec<ProjectionMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// The root entity itself
    Entity,
    /// A single value; when complex this is a direct nested projection
    Field(ProjectionMember),
    Members(ProjectedType),
}

/// Pending navigation load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeInfo {
    /// Navigation path as written (`Orders`, `Address.Owner`)
    pub navigation: String,
    #[serde(default)]
    pub filters: Vec<FilterNode>,
    #[serde(default)]
    pub order_by: Vec<OrderClause>,
    #[serde(default)]
    pub limit: Option<ValueExpr>,
    #[serde(default)]
    pub skip: Option<ValueExpr>,
    #[serde(default)]
    pub nested: Vec<IncludeInfo>,
}

impl IncludeInfo {
    pub fn new(navigation: &str) -> Self {
        Self {
            navigation: navigation.to_string(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            skip: None,
            nested: Vec::new(),
        }
    }

    pub fn has_sub_plan(&self) -> bool {
        !self.filters.is_empty()
            || !self.order_by.is_empty()
            || self.limit.is_some()
            || self.skip.is_some()
    }
}

/// AST root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryNode {
    pub collection: String,
    pub entity_type: String,
    pub target: QueryTarget,
    pub filters: Vec<FilterNode>,
    pub order_by: Vec<OrderClause>,
    pub limit: Option<ValueExpr>,
    pub limit_to_last: Option<ValueExpr>,
    pub skip: Option<ValueExpr>,
    pub aggregation: Option<Aggregation>,
    pub cardinality: ResultCardinality,
    pub projection: Projection,
    pub includes: Vec<IncludeInfo>,
    /// Key property name of the root entity
    key_property: String,
}

impl QueryNode {
    pub fn new(collection: &str, entity_type: &str, key_property: &str) -> Self {
        Self {
            collection: collection.to_string(),
            entity_type: entity_type.to_string(),
            target: QueryTarget::Collection,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            limit_to_last: None,
            skip: None,
            aggregation: None,
            cardinality: ResultCardinality::Sequence,
            projection: Projection::Entity,
            includes: Vec::new(),
            key_property: key_property.to_string(),
        }
    }

    pub fn key_property(&self) -> &str {
        &self.key_property
    }

    pub fn is_fast_path(&self) -> bool {
        matches!(self.target, QueryTarget::Document(_))
    }

    /// Add a top-level AND filter.
    ///
    /// A primary-key equality on an otherwise unfiltered query switches to the
    /// fast path. Any further filter moves the identity back into the filter
    /// list as an ordinary `__name__` clause.
    pub fn add_filter(&mut self, filter: FilterNode) {
        if let QueryTarget::Document(id) =
            std::mem::replace(&mut self.target, QueryTarget::Collection)
        {
            self.filters.push(FilterNode::Where(WhereClause::new(
                FieldRef::document_id(&self.key_property),
                FilterOperator::EqualTo,
                id,
            )));
        }

        match filter {
            FilterNode::Where(clause) if clause.is_key_equality() && self.filters.is_empty() => {
                self.target = QueryTarget::Document(clause.value);
            }
            other => self.filters.push(other),
        }
    }

    /// Whether any OR group is present at the top level
    pub fn has_or_groups(&self) -> bool {
        self.filters.iter().any(|f| matches!(f, FilterNode::Or(_)))
    }
}
