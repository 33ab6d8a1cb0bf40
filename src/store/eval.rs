//! Filter and ordering semantics of the store.
//!
//! Shared by the in-memory store and by client-side emulation (merged
//! disjunctions, filtered reference includes) so both agree on ordering.

use std::cmp::Ordering;

use serde_json::Value;

use docql_core::{Direction, FilterOperator};

use super::{RawDocument, StoreFilter, StoreOrder};

/// Get a nested value by dot-separated path.
pub fn field_value<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Compare two JSON values for equality.
///
/// Numbers are compared by their f64 representation for proper numeric comparison.
#[inline]
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Rank of a value's type in the store's cross-type ordering
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total ordering across types: null < bool < number < string < array < map.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let a_f64 = a.as_f64().unwrap_or(0.0);
            let b_f64 = b.as_f64().unwrap_or(0.0);
            a_f64.partial_cmp(&b_f64).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| compare_values(x, y))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (Value::Object(a), Value::Object(b)) => a.len().cmp(&b.len()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Range comparisons only match values of the same type
fn comparable(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b) && !a.is_null()
}

/// Whether a document satisfies a filter.
///
/// A document lacking a filtered field never matches, whatever the operator.
pub fn matches(doc: &RawDocument, filter: &StoreFilter) -> bool {
    match filter {
        StoreFilter::And(members) => members.iter().all(|m| matches(doc, m)),
        StoreFilter::Or(members) => members.iter().any(|m| matches(doc, m)),
        StoreFilter::Field { path, op, value } => {
            let Some(actual) = doc.field(path) else {
                return false;
            };
            clause_matches(&actual, *op, value)
        }
    }
}

fn clause_matches(actual: &Value, op: FilterOperator, expected: &Value) -> bool {
    let list = || expected.as_array().map(Vec::as_slice).unwrap_or(&[]);
    match op {
        FilterOperator::EqualTo => values_equal(actual, expected),
        FilterOperator::NotEqualTo => !actual.is_null() && !values_equal(actual, expected),
        FilterOperator::LessThan => comparable(actual, expected) && compare_values(actual, expected) == Ordering::Less,
        FilterOperator::LessThanOrEqualTo => {
            comparable(actual, expected) && compare_values(actual, expected) != Ordering::Greater
        }
        FilterOperator::GreaterThan => {
            comparable(actual, expected) && compare_values(actual, expected) == Ordering::Greater
        }
        FilterOperator::GreaterThanOrEqualTo => {
            comparable(actual, expected) && compare_values(actual, expected) != Ordering::Less
        }
        FilterOperator::ArrayContains => actual
            .as_array()
            .is_some_and(|items| items.iter().any(|i| values_equal(i, expected))),
        FilterOperator::In => list().iter().any(|v| values_equal(actual, v)),
        FilterOperator::ArrayContainsAny => actual
            .as_array()
            .is_some_and(|items| items.iter().any(|i| list().iter().any(|v| values_equal(i, v)))),
        FilterOperator::NotIn => !actual.is_null() && !list().iter().any(|v| values_equal(actual, v)),
    }
}

/// Documents lacking an ordered field are excluded from ordered results
pub fn has_order_fields(doc: &RawDocument, order_by: &[StoreOrder]) -> bool {
    order_by.iter().all(|o| doc.field(&o.path).is_some())
}

/// Compare two documents under an ordering; ties break on document path in
/// the direction of the last clause.
pub fn compare_documents(a: &RawDocument, b: &RawDocument, order_by: &[StoreOrder]) -> Ordering {
    for order in order_by {
        let left = a.field(&order.path).unwrap_or(Value::Null);
        let right = b.field(&order.path).unwrap_or(Value::Null);
        let ordering = match order.direction {
            Direction::Ascending => compare_values(&left, &right),
            Direction::Descending => compare_values(&right, &left),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    match order_by.last().map(|o| o.direction) {
        Some(Direction::Descending) => b.path.cmp(&a.path),
        _ => a.path.cmp(&b.path),
    }
}
