//! Query executor.
//!
//! Turns a `ResolvedQuery` into wire calls under the store's constraints:
//! - pre-flight limit checks before any call (root query and includes)
//! - single-document fast path
//! - native OR, or DNF emulation with a client-side merge
//! - offset emulation: the server limit covers `skip + limit` and the first
//!   `skip` documents are dropped client-side
//! - aggregation strategies, see [`aggregation`]

pub mod aggregation;
mod disjunction;

use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use serde_json::Value;

use docql_core::{
    Access, IncludePlan, OrderClause, ResolvedFilter, ResolvedQuery, ResultCardinality, StoreLimits,
};

use crate::cancel::{CancelExt, CancellationToken};
use crate::config::ExecutionConfig;
use crate::error::DqlResult;
use crate::store::{eval, DocumentStore, RawDocument, StoreOrder, StructuredQuery};

pub use aggregation::Reduction;

/// Raw execution result
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Documents(Vec<RawDocument>),
    Value(Value),
}

/// Where documents come from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Identity lookup
    Lookup { collection_path: String, id: String },
    Query(StructuredQuery),
    /// One query per disjunct, merged client-side
    Disjunction(Vec<StructuredQuery>),
}

impl Source {
    /// Number of wire calls this source makes
    pub fn call_count(&self) -> usize {
        match self {
            Source::Lookup { .. } | Source::Query(_) => 1,
            Source::Disjunction(queries) => queries.len(),
        }
    }
}

/// Client-side pagination applied after fetching
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Window {
    pub skip: usize,
    pub limit: Option<usize>,
    pub limit_to_last: Option<usize>,
    /// Keep only the final document of the window
    pub last_only: bool,
}

impl Window {
    pub(crate) fn new(skip: Option<usize>, limit: Option<usize>, limit_to_last: Option<usize>) -> Self {
        Self {
            skip: skip.unwrap_or(0),
            limit,
            limit_to_last,
            last_only: false,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.skip == 0 && self.limit.is_none() && self.limit_to_last.is_none() && !self.last_only
    }

    /// Limit sent to the server: the store has no offset
    pub fn server_limit(&self) -> Option<usize> {
        self.limit.map(|limit| limit.saturating_add(self.skip))
    }

    fn apply_cardinality(&mut self, cardinality: ResultCardinality) {
        match cardinality {
            ResultCardinality::Sequence => {}
            ResultCardinality::First { .. } => self.limit = Some(self.limit.map_or(1, |l| l.min(1))),
            ResultCardinality::Single { .. } => self.limit = Some(self.limit.map_or(2, |l| l.min(2))),
            ResultCardinality::Last { .. } => {
                if self.limit.is_none() && self.skip == 0 {
                    self.limit_to_last = Some(self.limit_to_last.map_or(1, |n| n.min(1)));
                } else {
                    self.last_only = true;
                }
            }
        }
    }

    pub fn apply(&self, mut docs: Vec<RawDocument>) -> Vec<RawDocument> {
        if let Some(n) = self.limit_to_last {
            let start = docs.len().saturating_sub(n);
            docs.drain(..start);
        }
        if self.skip > 0 {
            docs.drain(..self.skip.min(docs.len()));
        }
        if let Some(n) = self.limit {
            docs.truncate(n);
        }
        if self.last_only && docs.len() > 1 {
            let start = docs.len() - 1;
            docs.drain(..start);
        }
        docs
    }
}

/// Everything needed to run a query, decided before the first wire call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub source: Source,
    /// Ordering used to merge emulated disjunctions
    pub order_by: Vec<StoreOrder>,
    pub window: Window,
    pub reduction: Reduction,
}

pub struct QueryExecutor {
    store: Arc<dyn DocumentStore>,
    limits: StoreLimits,
    parallel_disjunctions: bool,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn DocumentStore>, limits: &StoreLimits, config: &ExecutionConfig) -> Self {
        Self {
            store,
            limits: *limits,
            parallel_disjunctions: config.parallel_disjunctions,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Validate a resolved query and decide how to run it.
    pub fn plan(&self, query: &ResolvedQuery) -> DqlResult<ExecutionPlan> {
        self.limits.check(query)?;
        self.check_include_disjunctions(&query.includes)?;

        let mut window = Window::new(query.skip, query.limit, query.limit_to_last);
        window.apply_cardinality(query.cardinality);

        let mut order_by = store_order(&query.order_by);
        let mut filters = query.filters().to_vec();
        let reduction = match &query.aggregation {
            None => Reduction::Documents,
            Some(aggregation) => aggregation::prepare(aggregation, &mut filters, &mut order_by, &mut window)?,
        };

        let source = match &query.access {
            Access::Document(id) => Source::Lookup {
                collection_path: query.collection.clone(),
                id: id.clone(),
            },
            Access::Collection { .. } => self.source(&query.collection, &filters, &order_by, &window)?,
        };

        let reduction = match &source {
            Source::Query(_) => reduction,
            _ => reduction.into_client(),
        };

        tracing::debug!(
            "[EXECUTOR] Planned {} on '{}' ({} wire call(s), window {:?})",
            query.entity_type,
            query.collection,
            source.call_count(),
            window
        );

        Ok(ExecutionPlan {
            source,
            order_by,
            window,
            reduction,
        })
    }

    /// Build the wire queries for one collection
    pub(crate) fn source(
        &self,
        collection_path: &str,
        filters: &[ResolvedFilter],
        order_by: &[StoreOrder],
        window: &Window,
    ) -> DqlResult<Source> {
        disjunction::check_size(filters, self.limits.max_disjunctions)?;

        let base = StructuredQuery {
            collection_path: collection_path.to_string(),
            filter: None,
            order_by: order_by.to_vec(),
            limit: window.server_limit(),
            limit_to_last: window.limit_to_last,
        };

        let has_or = filters.iter().any(ResolvedFilter::has_or);
        if !has_or || self.store.capabilities().native_or {
            return Ok(Source::Query(StructuredQuery {
                filter: disjunction::fold(filters),
                ..base
            }));
        }

        let queries: Vec<StructuredQuery> = disjunction::expand(filters)
            .into_iter()
            .map(|clauses| StructuredQuery {
                filter: disjunction::conjunction(clauses),
                ..base.clone()
            })
            .collect();
        tracing::debug!(
            "[EXECUTOR] Emulating OR on '{}' with {} queries",
            collection_path,
            queries.len()
        );
        Ok(Source::Disjunction(queries))
    }

    fn check_include_disjunctions(&self, includes: &[IncludePlan]) -> DqlResult<()> {
        for plan in includes {
            disjunction::check_size(&plan.filters, self.limits.max_disjunctions)?;
            self.check_include_disjunctions(&plan.children)?;
        }
        Ok(())
    }

    pub async fn execute(&self, query: &ResolvedQuery, cancel: &CancellationToken) -> DqlResult<Fetched> {
        let plan = self.plan(query)?;
        self.run(&plan, cancel).await
    }

    pub async fn run(&self, plan: &ExecutionPlan, cancel: &CancellationToken) -> DqlResult<Fetched> {
        if let (Reduction::Native(field), Source::Query(query)) = (&plan.reduction, &plan.source) {
            let value = cancel
                .guard(self.store.run_aggregation(query, field, cancel))
                .await?;
            return Ok(Fetched::Value(aggregation::finish_native(field, value, plan.window.skip)?));
        }

        let docs = self.fetch(&plan.source, &plan.order_by, &plan.window, cancel).await?;
        match &plan.reduction {
            Reduction::Client { kind, path, nullable } => Ok(Fetched::Value(aggregation::reduce(
                *kind,
                path.as_deref(),
                *nullable,
                &docs,
            )?)),
            _ => Ok(Fetched::Documents(docs)),
        }
    }

    /// Fetch a source and apply the client-side window
    pub(crate) async fn fetch(
        &self,
        source: &Source,
        order_by: &[StoreOrder],
        window: &Window,
        cancel: &CancellationToken,
    ) -> DqlResult<Vec<RawDocument>> {
        let docs = match source {
            Source::Lookup { collection_path, id } => cancel
                .guard(self.store.get_document(collection_path, id, cancel))
                .await?
                .into_iter()
                .collect(),
            Source::Query(query) => cancel.guard(self.store.run_query(query, cancel)).await?,
            Source::Disjunction(queries) => {
                let results = if self.parallel_disjunctions {
                    try_join_all(
                        queries
                            .iter()
                            .map(|query| cancel.guard(self.store.run_query(query, cancel))),
                    )
                    .await?
                } else {
                    let mut results = Vec::with_capacity(queries.len());
                    for query in queries {
                        results.push(cancel.guard(self.store.run_query(query, cancel)).await?);
                    }
                    results
                };
                disjunction::merge(results, order_by)
            }
        };
        tracing::trace!("[EXECUTOR] Fetched {} document(s)", docs.len());
        Ok(window.apply(docs))
    }
}

/// Evaluate filters, ordering and window over documents fetched one by one
pub(crate) fn apply_locally(
    docs: Vec<RawDocument>,
    filters: &[ResolvedFilter],
    order_by: &[StoreOrder],
    window: &Window,
) -> Vec<RawDocument> {
    let filter = disjunction::fold(filters);
    let mut docs: Vec<RawDocument> = docs
        .into_iter()
        .filter(|doc| filter.as_ref().map_or(true, |f| eval::matches(doc, f)))
        .collect();
    if !order_by.is_empty() {
        docs.retain(|doc| eval::has_order_fields(doc, order_by));
        docs.sort_by(|a, b| eval::compare_documents(a, b, order_by));
    }
    window.apply(docs)
}

pub(crate) fn store_order(order_by: &[OrderClause]) -> Vec<StoreOrder> {
    order_by
        .iter()
        .map(|clause| StoreOrder {
            path: clause.field.path.clone(),
            direction: clause.direction,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs(n: usize) -> Vec<RawDocument> {
        (0..n)
            .map(|i| RawDocument::new(format!("items/{}", i), json!({ "n": i })))
            .collect()
    }

    fn ids(docs: &[RawDocument]) -> Vec<&str> {
        docs.iter().map(|d| d.id()).collect()
    }

    #[test]
    fn test_window_skip_limit() {
        let window = Window::new(Some(1), Some(2), None);
        assert_eq!(window.server_limit(), Some(3));
        assert_eq!(ids(&window.apply(docs(5))), vec!["1", "2"]);

        let window = Window::new(Some(10), None, None);
        assert!(window.apply(docs(5)).is_empty());
    }

    #[test]
    fn test_cardinality_windows() {
        let mut first = Window::default();
        first.apply_cardinality(ResultCardinality::First { or_default: false });
        assert_eq!(first.limit, Some(1));

        let mut single = Window::new(None, Some(10), None);
        single.apply_cardinality(ResultCardinality::Single { or_default: false });
        assert_eq!(single.limit, Some(2));

        let mut last = Window::default();
        last.apply_cardinality(ResultCardinality::Last { or_default: false });
        assert_eq!(last.limit_to_last, Some(1));

        let mut paged_last = Window::new(Some(1), Some(3), None);
        paged_last.apply_cardinality(ResultCardinality::Last { or_default: false });
        assert!(paged_last.last_only);
        assert_eq!(ids(&paged_last.apply(docs(10))), vec!["3"]);
    }

    #[test]
    fn test_apply_locally() {
        use docql_core::metadata::DeclaredType;
        use docql_core::{Direction, FieldRef, FilterOperator};

        let field = FieldRef {
            path: "n".to_string(),
            property: "N".to_string(),
            declared: DeclaredType::int(),
            persist_null: false,
            enum_hint: None,
        };
        let filters = vec![ResolvedFilter::Field {
            field,
            op: FilterOperator::GreaterThan,
            value: json!(1),
        }];
        let order_by = vec![StoreOrder {
            path: "n".to_string(),
            direction: Direction::Descending,
        }];
        let window = Window::new(Some(1), Some(2), None);

        let result = apply_locally(docs(6), &filters, &order_by, &window);
        assert_eq!(ids(&result), vec!["4", "3"]);
    }
}
