//! Store query limits and the pre-flight check that enforces them.
//!
//! Violations are reported before any wire call is made, for the root query
//! and every include sub-plan alike.

use serde::{Deserialize, Serialize};

use crate::ast::{FilterOperator, OrderClause};
use crate::error::{QueryError, QueryResult};
use crate::resolver::{IncludePlan, ResolvedFilter, ResolvedQuery};

/// Hard limits of the store's query model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreLimits {
    /// Values accepted by `In` and `ArrayContainsAny`
    pub max_in_values: usize,
    /// Values accepted by `NotIn`
    pub max_not_in_values: usize,
    /// Disjuncts one query may expand into
    pub max_disjunctions: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_in_values: 30,
            max_not_in_values: 10,
            max_disjunctions: 30,
        }
    }
}

impl StoreLimits {
    /// Check a resolved query against the store's limits.
    pub fn check(&self, query: &ResolvedQuery) -> QueryResult<()> {
        self.check_filters(query.filters(), &query.order_by)?;
        if query.limit_to_last.is_some() && query.order_by.is_empty() {
            return Err(QueryError::unsupported(
                "limit-to-last requires at least one ordering clause",
            ));
        }
        query.includes.iter().try_for_each(|plan| self.check_include(plan))
    }

    fn check_include(&self, plan: &IncludePlan) -> QueryResult<()> {
        self.check_filters(&plan.filters, &plan.order_by)?;
        plan.children.iter().try_for_each(|child| self.check_include(child))
    }

    /// Cardinality and inequality rules for one filter list and its ordering.
    ///
    /// The inequality field, when there is one, must lead the ordering.
    pub fn check_filters(&self, filters: &[ResolvedFilter], order_by: &[OrderClause]) -> QueryResult<()> {
        let mut inequality_field: Option<&str> = None;
        let mut result = Ok(());

        for filter in filters {
            filter.for_each_field(&mut |field, op, value| {
                if result.is_err() {
                    return;
                }
                let limit = match op {
                    FilterOperator::In | FilterOperator::ArrayContainsAny => Some(self.max_in_values),
                    FilterOperator::NotIn => Some(self.max_not_in_values),
                    _ => None,
                };
                if let (Some(limit), Some(values)) = (limit, value.as_array()) {
                    if values.len() > limit {
                        result = Err(QueryError::CardinalityExceeded {
                            field: field.property.clone(),
                            operator: op,
                            count: values.len(),
                            limit,
                        });
                        return;
                    }
                }
                if op.is_inequality() {
                    match inequality_field {
                        Some(existing) if existing != field.path => {
                            result = Err(QueryError::unsupported(format!(
                                "inequality filters on more than one field ('{}' and '{}')",
                                existing, field.path
                            )));
                        }
                        _ => inequality_field = Some(&field.path),
                    }
                }
            });
        }
        result?;

        match (inequality_field, order_by.first()) {
            (Some(field), Some(first)) if first.field.path != field => Err(QueryError::unsupported(format!(
                "inequality filter on '{}' requires it to be the first ordering, found '{}'",
                field, first.field.path
            ))),
            _ => Ok(()),
        }
    }
}
