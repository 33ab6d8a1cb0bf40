//! Query engine: the pipeline entry point.
//!
//! `compile` translates an upstream query once into an immutable template.
//! `execute` resolves it against parameters, runs it through the executor,
//! shapes and materializes the documents, loads includes and applies the
//! result cardinality.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use docql_core::expr::QueryExpr;
use docql_core::metadata::{Model, ScalarType};
use docql_core::{
    Access, AggregateKind, Aggregation, Parameters, Projection, QueryError, QueryNode, QueryResult, ResolvedQuery,
    ResultCardinality, Resolver, Translator,
};

use crate::cancel::{CancelExt, CancellationToken};
use crate::config::DqlConfig;
use crate::error::{DqlError, DqlResult};
use crate::executor::{ExecutionPlan, Fetched, QueryExecutor};
use crate::include::IncludeLoader;
use crate::materializer::{convert, CacheStats, IdentityMap, MaterializedValue, Materializer, PlanCache};
use crate::shaper::Shaper;
use crate::store::{DocumentStore, RawDocument};

/// Translated query template, shared between executions
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    node: Arc<QueryNode>,
}

impl CompiledQuery {
    pub fn node(&self) -> &QueryNode {
        &self.node
    }
}

/// Result of one execution
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Sequence(Vec<MaterializedValue>),
    /// First / Single / Last, null for an empty `*OrDefault`
    Single(MaterializedValue),
    /// Aggregation result
    Scalar(MaterializedValue),
}

impl QueryOutput {
    pub fn into_sequence(self) -> Option<Vec<MaterializedValue>> {
        match self {
            QueryOutput::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<MaterializedValue> {
        match self {
            QueryOutput::Single(value) | QueryOutput::Scalar(value) => Some(value),
            QueryOutput::Sequence(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            QueryOutput::Sequence(items) => Value::Array(items.iter().map(MaterializedValue::to_json).collect()),
            QueryOutput::Single(value) | QueryOutput::Scalar(value) => value.to_json(),
        }
    }
}

/// Everything decided before the first wire call
#[derive(Debug, Clone, Serialize)]
pub struct QueryExplain {
    pub node: QueryNode,
    pub resolved: ResolvedQuery,
    pub plan: ExecutionPlan,
}

pub struct QueryEngine {
    executor: QueryExecutor,
    model: Arc<Model>,
    config: DqlConfig,
    plans: Arc<PlanCache>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn DocumentStore>, model: Arc<Model>, config: DqlConfig) -> Self {
        let plans = Arc::new(PlanCache::new(config.execution.plan_cache_capacity));
        Self::with_plan_cache(store, model, config, plans)
    }

    /// Share a plan cache between engines over the same model
    pub fn with_plan_cache(
        store: Arc<dyn DocumentStore>,
        model: Arc<Model>,
        config: DqlConfig,
        plans: Arc<PlanCache>,
    ) -> Self {
        let executor = QueryExecutor::new(store, &config.limits, &config.execution);
        Self {
            executor,
            model,
            config,
            plans,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn config(&self) -> &DqlConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        self.executor.store()
    }

    pub fn plan_cache_stats(&self) -> CacheStats {
        self.plans.stats()
    }

    /// Translate a query once; the template is reused across executions.
    pub fn compile(&self, query: &QueryExpr) -> QueryResult<CompiledQuery> {
        let node = Translator::new(&self.model).translate(query)?;
        if !node.includes.is_empty() && !matches!(node.projection, Projection::Entity) {
            return Err(QueryError::UnsupportedQuery(
                "Include cannot be combined with a projection of the result".to_string(),
            ));
        }
        tracing::debug!(
            "[ENGINE] Compiled query on {} ({} filter(s), {} include(s))",
            node.entity_type,
            node.filters.len(),
            node.includes.len()
        );
        Ok(CompiledQuery { node: Arc::new(node) })
    }

    pub fn resolve(&self, compiled: &CompiledQuery, parameters: &Parameters) -> QueryResult<ResolvedQuery> {
        Resolver::new(&self.model).resolve(&compiled.node, parameters)
    }

    /// Describe how a query would run, without touching the store.
    pub fn explain(&self, compiled: &CompiledQuery, parameters: &Parameters) -> DqlResult<QueryExplain> {
        let resolved = self.resolve(compiled, parameters)?;
        let plan = self.executor.plan(&resolved)?;
        Ok(QueryExplain {
            node: compiled.node().clone(),
            resolved,
            plan,
        })
    }

    pub async fn execute(
        &self,
        compiled: &CompiledQuery,
        parameters: &Parameters,
        cancel: &CancellationToken,
    ) -> DqlResult<QueryOutput> {
        let resolved = self.resolve(compiled, parameters)?;
        let plan = self.executor.plan(&resolved)?;

        let docs = match self.executor.run(&plan, cancel).await? {
            Fetched::Value(value) => {
                let aggregation = resolved
                    .aggregation
                    .as_ref()
                    .ok_or_else(|| DqlError::materialization("aggregate value without an aggregation"))?;
                return Ok(QueryOutput::Scalar(self.aggregate_value(aggregation, &value)?));
            }
            Fetched::Documents(docs) => docs,
        };

        if matches!(resolved.cardinality, ResultCardinality::Single { .. }) && docs.len() > 1 {
            return Err(DqlError::MoreThanOneElement);
        }

        let values = self.materialize_all(&resolved, &docs, cancel).await?;
        cancel.check()?;
        tracing::debug!(
            "[ENGINE] {} on {} returned {} item(s)",
            resolved.entity_type,
            resolved.collection,
            values.len()
        );
        let stats = self.plans.stats();
        tracing::trace!(
            "[ENGINE] Plan cache: {}/{} entries, {} hits, {} misses, {} evictions",
            stats.entries,
            stats.max_size,
            stats.hits,
            stats.misses,
            stats.evictions
        );
        finish(values, &resolved)
    }

    async fn materialize_all(
        &self,
        resolved: &ResolvedQuery,
        docs: &[RawDocument],
        cancel: &CancellationToken,
    ) -> DqlResult<Vec<MaterializedValue>> {
        let identities = IdentityMap::new();
        let shaper = Shaper::new(&self.model);
        let loader = IncludeLoader::new(
            &self.executor,
            &self.model,
            &self.plans,
            &identities,
            self.config.execution.parallel_includes,
        );

        let mut values = Vec::with_capacity(docs.len());
        for doc in docs {
            let value = {
                let item = shaper.shape(doc, &resolved.projection, &resolved.entity_type)?;
                Materializer::new(&self.model, &self.plans, &identities).materialize_result(
                    &item,
                    &resolved.projection,
                    &resolved.entity_type,
                )?
            };
            if let Some(instance) = value.as_object().filter(|_| !resolved.includes.is_empty()) {
                loader.load(instance, doc, &resolved.includes, cancel).await?;
            }
            values.push(value);
        }
        Ok(values)
    }

    fn aggregate_value(&self, aggregation: &Aggregation, value: &Value) -> DqlResult<MaterializedValue> {
        let scalar = match aggregation.kind {
            AggregateKind::Count => ScalarType::Int,
            AggregateKind::Any => ScalarType::Bool,
            AggregateKind::Average => ScalarType::Float,
            AggregateKind::Sum | AggregateKind::Min | AggregateKind::Max => aggregation
                .field
                .as_ref()
                .and_then(|field| field.declared.as_scalar())
                .cloned()
                .ok_or_else(|| {
                    DqlError::materialization(format!("{:?} needs a scalar selector", aggregation.kind))
                })?,
        };
        convert::convert_scalar(&self.model, &scalar, value)
    }
}

/// Apply the result cardinality to the materialized values
fn finish(mut values: Vec<MaterializedValue>, resolved: &ResolvedQuery) -> DqlResult<QueryOutput> {
    let (or_default, picked) = match resolved.cardinality {
        ResultCardinality::Sequence => return Ok(QueryOutput::Sequence(values)),
        ResultCardinality::First { or_default } | ResultCardinality::Single { or_default } => {
            (or_default, (!values.is_empty()).then(|| values.swap_remove(0)))
        }
        ResultCardinality::Last { or_default } => (or_default, values.pop()),
    };

    match picked {
        Some(value) => Ok(QueryOutput::Single(value)),
        None if or_default => Ok(QueryOutput::Single(MaterializedValue::Null)),
        None => Err(match &resolved.access {
            Access::Document(id) => DqlError::NotFound(format!("{}/{}", resolved.collection, id)),
            Access::Collection { .. } => DqlError::EmptySequence,
        }),
    }
}
