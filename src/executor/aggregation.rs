//! Aggregation strategies.
//!
//! Count, Sum and Average run natively when the store sees the whole query.
//! Min and Max have no server-side form: they become an ordered query
//! limited to one document. Everything else is reduced client-side over the
//! fetched window.

use serde::Serialize;
use serde_json::{Number, Value};

use docql_core::{
    AggregateKind, Aggregation, Direction, FieldRef, FilterOperator, QueryError, ResolvedFilter,
};

use super::Window;
use crate::error::{DqlError, DqlResult};
use crate::store::eval::compare_values;
use crate::store::memory::sum_numbers;
use crate::store::{AggregateField, RawDocument, StoreOrder};

/// How fetched documents become the query result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Return the documents
    Documents,
    /// One server-side aggregation call; `skip` is subtracted from counts
    Native(AggregateField),
    /// Fold the fetched documents
    Client {
        kind: AggregateKind,
        path: Option<String>,
        nullable: bool,
    },
}

impl Reduction {
    /// Client-side equivalent of a native aggregation
    pub(crate) fn into_client(self) -> Reduction {
        match self {
            Reduction::Native(AggregateField::Count) => Reduction::Client {
                kind: AggregateKind::Count,
                path: None,
                nullable: false,
            },
            Reduction::Native(AggregateField::Sum(path)) => Reduction::Client {
                kind: AggregateKind::Sum,
                path: Some(path),
                nullable: false,
            },
            Reduction::Native(AggregateField::Average(path)) => Reduction::Client {
                kind: AggregateKind::Average,
                path: Some(path),
                nullable: false,
            },
            other => other,
        }
    }
}

/// Rewrite filters, ordering and window for an aggregation and pick its
/// reduction.
pub(crate) fn prepare(
    aggregation: &Aggregation,
    filters: &mut Vec<ResolvedFilter>,
    order_by: &mut Vec<StoreOrder>,
    window: &mut Window,
) -> DqlResult<Reduction> {
    let field = aggregation.field.as_ref();
    let path = field.map(|f| f.path.clone());
    let client = |kind| Reduction::Client {
        kind,
        path: path.clone(),
        nullable: aggregation.nullable,
    };

    match aggregation.kind {
        AggregateKind::Count => {
            if window.limit_to_last.is_some() || window.last_only {
                Ok(client(AggregateKind::Count))
            } else {
                Ok(Reduction::Native(AggregateField::Count))
            }
        }
        AggregateKind::Any => {
            window.limit = Some(window.limit.map_or(1, |l| l.min(1)));
            Ok(client(AggregateKind::Any))
        }
        AggregateKind::Sum | AggregateKind::Average => {
            let path = required_path(aggregation)?;
            if window.skip > 0 {
                return Err(QueryError::UnsupportedQuery(format!(
                    "{:?} cannot be combined with Skip",
                    aggregation.kind
                ))
                .into());
            }
            if window.limit_to_last.is_some() {
                return Ok(client(aggregation.kind));
            }
            Ok(Reduction::Native(match aggregation.kind {
                AggregateKind::Sum => AggregateField::Sum(path),
                _ => AggregateField::Average(path),
            }))
        }
        AggregateKind::Min | AggregateKind::Max => {
            let Some(field) = field else {
                return Err(DqlError::materialization(format!("{:?} without a selector", aggregation.kind)));
            };
            let inequality = inequality_path(filters);
            let conflicting = inequality.as_deref().is_some_and(|p| p != field.path);
            if window.is_unbounded() && !conflicting {
                let direction = if aggregation.kind == AggregateKind::Min {
                    Direction::Ascending
                } else {
                    Direction::Descending
                };
                *order_by = vec![StoreOrder {
                    path: field.path.clone(),
                    direction,
                }];
                window.limit = Some(1);
                // stored nulls sort first; keep them out of an ascending scan
                if field.persist_null && inequality.is_none() {
                    filters.push(not_null(field));
                }
            }
            Ok(client(aggregation.kind))
        }
    }
}

fn required_path(aggregation: &Aggregation) -> DqlResult<String> {
    aggregation
        .field
        .as_ref()
        .map(|f| f.path.clone())
        .ok_or_else(|| DqlError::materialization(format!("{:?} without a selector", aggregation.kind)))
}

fn inequality_path(filters: &[ResolvedFilter]) -> Option<String> {
    let mut found = None;
    for filter in filters {
        filter.for_each_field(&mut |field, op, _| {
            if op.is_inequality() && found.is_none() {
                found = Some(field.path.clone());
            }
        });
    }
    found
}

fn not_null(field: &FieldRef) -> ResolvedFilter {
    ResolvedFilter::Field {
        field: field.clone(),
        op: FilterOperator::NotEqualTo,
        value: Value::Null,
    }
}

/// Interpret a native aggregation result
pub(crate) fn finish_native(field: &AggregateField, value: Value, skip: usize) -> DqlResult<Value> {
    match field {
        AggregateField::Count => {
            let count = value.as_u64().unwrap_or(0) as usize;
            Ok(Value::from(count.saturating_sub(skip)))
        }
        AggregateField::Sum(_) => Ok(if value.is_null() { Value::from(0) } else { value }),
        AggregateField::Average(_) => {
            if value.is_null() {
                Err(DqlError::EmptySequence)
            } else {
                Ok(value)
            }
        }
    }
}

/// Fold fetched documents into an aggregate value
pub(crate) fn reduce(kind: AggregateKind, path: Option<&str>, nullable: bool, docs: &[RawDocument]) -> DqlResult<Value> {
    let values = || -> Vec<Value> {
        path.map(|p| {
            docs.iter()
                .filter_map(|d| d.field(p))
                .filter(|v| !v.is_null())
                .collect()
        })
        .unwrap_or_default()
    };
    let numbers = || -> Vec<Number> {
        values()
            .into_iter()
            .filter_map(|v| match v {
                Value::Number(n) => Some(n),
                _ => None,
            })
            .collect()
    };

    match kind {
        AggregateKind::Count => Ok(Value::from(docs.len())),
        AggregateKind::Any => Ok(Value::Bool(!docs.is_empty())),
        AggregateKind::Sum => Ok(sum_numbers(&numbers())),
        AggregateKind::Average => {
            let numbers = numbers();
            if numbers.is_empty() {
                return Err(DqlError::EmptySequence);
            }
            let total: f64 = numbers.iter().filter_map(Number::as_f64).sum();
            Ok(Number::from_f64(total / numbers.len() as f64).map_or(Value::Null, Value::Number))
        }
        AggregateKind::Min | AggregateKind::Max => {
            let values = values();
            let best = if kind == AggregateKind::Min {
                values.into_iter().min_by(compare_values)
            } else {
                values.into_iter().max_by(compare_values)
            };
            match best {
                Some(value) => Ok(value),
                None if nullable => Ok(Value::Null),
                None => Err(DqlError::EmptySequence),
            }
        }
    }
}
