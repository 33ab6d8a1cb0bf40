//! Include loader.
//!
//! Loads navigations for materialized parents after the root query: child
//! collections nested under the parent path, and references stored as
//! document paths on the parent record. Loaded targets resolve through the
//! execution's identity map and are attached as the declared collection kind.
//! An instance shared between include trees is loaded once per distinct
//! include plan.

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;

use docql_core::metadata::{Model, Multiplicity, NavigationStorage};
use docql_core::IncludePlan;

use crate::cancel::{CancelExt, CancellationToken};
use crate::error::DqlResult;
use crate::executor::{self, QueryExecutor, Window};
use crate::materializer::{Collection, IdentityMap, InstanceRef, MaterializedValue, Materializer, PlanCache};
use crate::shaper::Shaper;
use crate::store::RawDocument;

pub struct IncludeLoader<'a> {
    executor: &'a QueryExecutor,
    model: &'a Model,
    plans: &'a PlanCache,
    identities: &'a IdentityMap,
    parallel: bool,
}

impl<'a> IncludeLoader<'a> {
    pub fn new(
        executor: &'a QueryExecutor,
        model: &'a Model,
        plans: &'a PlanCache,
        identities: &'a IdentityMap,
        parallel: bool,
    ) -> Self {
        Self {
            executor,
            model,
            plans,
            identities,
            parallel,
        }
    }

    /// Load every include of `parent`, whose stored record is `raw`.
    pub fn load<'b>(
        &'b self,
        parent: &'b InstanceRef,
        raw: &'b RawDocument,
        includes: &'b [IncludePlan],
        cancel: &'b CancellationToken,
    ) -> BoxFuture<'b, DqlResult<()>> {
        async move {
            if self.parallel && includes.len() > 1 {
                try_join_all(includes.iter().map(|plan| self.load_one(parent, raw, plan, cancel))).await?;
            } else {
                for plan in includes {
                    self.load_one(parent, raw, plan, cancel).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn load_one(
        &self,
        parent: &InstanceRef,
        raw: &RawDocument,
        plan: &IncludePlan,
        cancel: &CancellationToken,
    ) -> DqlResult<()> {
        let navigation = &plan.navigation;
        let plan_key = serde_json::to_string(plan)?;
        if !parent.mark_loaded(&navigation.name, &plan_key) {
            tracing::trace!(
                "[INCLUDE] {} already loaded on {}/{}",
                navigation.name,
                parent.type_name(),
                parent.key().unwrap_or("")
            );
            return Ok(());
        }
        cancel.check()?;

        let docs = match &navigation.storage {
            NavigationStorage::ChildCollection { subcollection } => {
                self.fetch_children(raw, subcollection, plan, cancel).await?
            }
            NavigationStorage::Reference { field } => self.fetch_references(raw, field, plan, cancel).await?,
        };
        tracing::debug!(
            "[INCLUDE] {} on {} loaded {} document(s)",
            navigation.name,
            raw.path,
            docs.len()
        );

        let mut targets = Vec::with_capacity(docs.len());
        for doc in &docs {
            let target = self.materialize(doc, &plan.target_type)?;
            if !plan.children.is_empty() {
                self.load(&target, doc, &plan.children, cancel).await?;
            }
            targets.push(MaterializedValue::Object(target));
        }

        let value = match navigation.multiplicity {
            Multiplicity::Singular => targets.into_iter().next().unwrap_or(MaterializedValue::Null),
            Multiplicity::Collection(kind) => MaterializedValue::Collection(Collection::build(kind, targets)),
        };
        parent.set(navigation.name.clone(), value);
        Ok(())
    }

    async fn fetch_children(
        &self,
        raw: &RawDocument,
        subcollection: &str,
        plan: &IncludePlan,
        cancel: &CancellationToken,
    ) -> DqlResult<Vec<RawDocument>> {
        let collection_path = format!("{}/{}", raw.path, subcollection);
        let order_by = executor::store_order(&plan.order_by);
        let mut window = Window::new(plan.skip, plan.limit, None);
        if plan.navigation.is_singular() {
            window.limit = Some(window.limit.map_or(1, |l| l.min(1)));
        }
        let source = self
            .executor
            .source(&collection_path, &plan.filters, &order_by, &window)?;
        self.executor.fetch(&source, &order_by, &window, cancel).await
    }

    async fn fetch_references(
        &self,
        raw: &RawDocument,
        field: &str,
        plan: &IncludePlan,
        cancel: &CancellationToken,
    ) -> DqlResult<Vec<RawDocument>> {
        let paths: Vec<String> = match raw.field(field) {
            Some(Value::String(path)) => vec![path],
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(path) => Some(path),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        let store = self.executor.store();
        let mut docs = Vec::with_capacity(paths.len());
        for path in &paths {
            match cancel.guard(store.get_by_path(path, cancel)).await? {
                Some(doc) => docs.push(doc),
                None => tracing::debug!("[INCLUDE] Reference {} from {} is missing", path, raw.path),
            }
        }

        let order_by = executor::store_order(&plan.order_by);
        let window = Window::new(plan.skip, plan.limit, None);
        Ok(executor::apply_locally(docs, &plan.filters, &order_by, &window))
    }

    fn materialize(&self, doc: &RawDocument, type_name: &str) -> DqlResult<InstanceRef> {
        let item = Shaper::new(self.model).shape_entity(doc, type_name)?;
        Materializer::new(self.model, self.plans, self.identities).materialize(&item, type_name)
    }
}

