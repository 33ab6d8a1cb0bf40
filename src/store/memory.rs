//! In-memory document store.
//!
//! Implements the wire semantics the executor relies on: documents lacking a
//! filtered or ordered field are excluded, comparisons are type-ordered, and
//! `limit_to_last` returns the trailing window in query order. Every call is
//! counted so tests can assert how many round trips an execution made.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Number, Value};

use super::eval::{compare_documents, has_order_fields, matches};
use super::{
    split_document_path, AggregateField, DocumentStore, RawDocument, StoreCapabilities, StoreError,
    StructuredQuery,
};
use crate::cancel::CancellationToken;
use crate::error::{DqlError, DqlResult};

/// Snapshot of per-operation call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub get_document: usize,
    pub run_query: usize,
    pub get_by_path: usize,
    pub run_aggregation: usize,
}

impl StoreCalls {
    pub fn total(&self) -> usize {
        self.get_document + self.run_query + self.get_by_path + self.run_aggregation
    }
}

#[derive(Default)]
struct Counters {
    get_document: AtomicUsize,
    run_query: AtomicUsize,
    get_by_path: AtomicUsize,
    run_aggregation: AtomicUsize,
}

/// In-memory store keyed by collection path, then document id
pub struct InMemoryStore {
    collections: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
    native_or: bool,
    counters: Counters,
    /// Every structured query received, in order
    queries: Mutex<Vec<StructuredQuery>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            native_or: true,
            counters: Counters::default(),
            queries: Mutex::new(Vec::new()),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject `Or` filters, like stores without native disjunctions
    pub fn without_native_or(mut self) -> Self {
        self.native_or = false;
        self
    }

    /// Insert or replace a document
    pub fn insert(&self, collection_path: &str, id: &str, doc: Value) {
        self.collections
            .write()
            .entry(collection_path.to_string())
            .or_default()
            .insert(id.to_string(), doc);
    }

    /// Load fixtures shaped as `{ "collection/path": { "id": { ... } } }`.
    pub fn load_fixtures(&self, fixtures: &Value) -> DqlResult<usize> {
        let Some(collections) = fixtures.as_object() else {
            return Err(DqlError::Config("fixtures must be a JSON object of collections".to_string()));
        };
        let mut count = 0;
        for (collection, docs) in collections {
            let Some(docs) = docs.as_object() else {
                return Err(DqlError::Config(format!(
                    "fixture collection '{}' must map ids to documents",
                    collection
                )));
            };
            for (id, doc) in docs {
                self.insert(collection, id, doc.clone());
                count += 1;
            }
        }
        tracing::debug!("[STORE] Loaded {} fixture documents", count);
        Ok(count)
    }

    /// Read fixtures from a JSON file
    pub fn from_fixture_file(path: &Path) -> DqlResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let fixtures: Value = serde_json::from_str(&content)?;
        let store = Self::new();
        store.load_fixtures(&fixtures)?;
        Ok(store)
    }

    pub fn calls(&self) -> StoreCalls {
        StoreCalls {
            get_document: self.counters.get_document.load(Ordering::Relaxed),
            run_query: self.counters.run_query.load(Ordering::Relaxed),
            get_by_path: self.counters.get_by_path.load(Ordering::Relaxed),
            run_aggregation: self.counters.run_aggregation.load(Ordering::Relaxed),
        }
    }

    /// Structured queries received so far
    pub fn queries(&self) -> Vec<StructuredQuery> {
        self.queries.lock().clone()
    }

    pub fn reset_calls(&self) {
        self.counters.get_document.store(0, Ordering::Relaxed);
        self.counters.run_query.store(0, Ordering::Relaxed);
        self.counters.get_by_path.store(0, Ordering::Relaxed);
        self.counters.run_aggregation.store(0, Ordering::Relaxed);
        self.queries.lock().clear();
    }

    fn lookup(&self, collection_path: &str, id: &str) -> Option<RawDocument> {
        self.collections
            .read()
            .get(collection_path)
            .and_then(|docs| docs.get(id))
            .map(|doc| RawDocument::new(format!("{}/{}", collection_path, id), doc.clone()))
    }

    fn evaluate(&self, query: &StructuredQuery) -> Result<Vec<RawDocument>, StoreError> {
        if !self.native_or && query.filter.as_ref().is_some_and(|f| f.has_or()) {
            return Err(StoreError::Rejected("OR filters are not supported".to_string()));
        }
        if query.limit_to_last.is_some() && query.order_by.is_empty() {
            return Err(StoreError::Rejected("limit_to_last requires an order".to_string()));
        }

        let mut docs: Vec<RawDocument> = {
            let collections = self.collections.read();
            collections
                .get(&query.collection_path)
                .map(|docs| {
                    docs.iter()
                        .map(|(id, doc)| RawDocument::new(format!("{}/{}", query.collection_path, id), doc.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        docs.retain(|doc| {
            query.filter.as_ref().map_or(true, |f| matches(doc, f)) && has_order_fields(doc, &query.order_by)
        });
        docs.sort_by(|a, b| compare_documents(a, b, &query.order_by));

        if let Some(n) = query.limit_to_last {
            let start = docs.len().saturating_sub(n);
            docs.drain(..start);
        }
        if let Some(n) = query.limit {
            docs.truncate(n);
        }
        Ok(docs)
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            native_or: self.native_or,
        }
    }

    async fn get_document(
        &self,
        collection_path: &str,
        id: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<RawDocument>, StoreError> {
        self.counters.get_document.fetch_add(1, Ordering::Relaxed);
        Ok(self.lookup(collection_path, id))
    }

    async fn run_query(
        &self,
        query: &StructuredQuery,
        _cancel: &CancellationToken,
    ) -> Result<Vec<RawDocument>, StoreError> {
        self.counters.run_query.fetch_add(1, Ordering::Relaxed);
        self.queries.lock().push(query.clone());
        self.evaluate(query)
    }

    async fn get_by_path(&self, path: &str, _cancel: &CancellationToken) -> Result<Option<RawDocument>, StoreError> {
        self.counters.get_by_path.fetch_add(1, Ordering::Relaxed);
        let (collection, id) = split_document_path(path)?;
        Ok(self.lookup(collection, id))
    }

    async fn run_aggregation(
        &self,
        query: &StructuredQuery,
        field: &AggregateField,
        _cancel: &CancellationToken,
    ) -> Result<Value, StoreError> {
        self.counters.run_aggregation.fetch_add(1, Ordering::Relaxed);
        self.queries.lock().push(query.clone());
        let docs = self.evaluate(query)?;

        let numbers = |path: &str| -> Vec<Number> {
            docs.iter()
                .filter_map(|d| d.field(path))
                .filter_map(|v| match v {
                    Value::Number(n) => Some(n),
                    _ => None,
                })
                .collect()
        };

        Ok(match field {
            AggregateField::Count => Value::from(docs.len()),
            AggregateField::Sum(path) => sum_numbers(&numbers(path)),
            AggregateField::Average(path) => {
                let values = numbers(path);
                if values.is_empty() {
                    Value::Null
                } else {
                    let total: f64 = values.iter().filter_map(Number::as_f64).sum();
                    Number::from_f64(total / values.len() as f64).map_or(Value::Null, Value::Number)
                }
            }
        })
    }
}

/// Integer sum when every input is an integer, float sum otherwise
pub(crate) fn sum_numbers(values: &[Number]) -> Value {
    let integral: Option<i64> = values
        .iter()
        .try_fold(0i64, |acc, n| n.as_i64().and_then(|v| acc.checked_add(v)));
    match integral {
        Some(total) => Value::from(total),
        None => {
            let total: f64 = values.iter().filter_map(Number::as_f64).sum();
            Number::from_f64(total).map_or(Value::Null, Value::Number)
        }
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let collections = self.collections.read();
        let sizes: Map<String, Value> = collections
            .iter()
            .map(|(name, docs)| (name.clone(), Value::from(docs.len())))
            .collect();
        f.debug_struct("InMemoryStore")
            .field("collections", &sizes)
            .field("native_or", &self.native_or)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StoreFilter, StoreOrder};
    use docql_core::{Direction, FilterOperator};
    use serde_json::json;

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        for (id, price, category) in [("p1", 10, "a"), ("p2", 20, "b"), ("p3", 30, "a"), ("p4", 40, "a")] {
            store.insert("products", id, json!({"price": price, "category": category}));
        }
        store.insert("products", "p5", json!({"category": "a"}));
        store
    }

    fn by_price(direction: Direction) -> Vec<StoreOrder> {
        vec![StoreOrder {
            path: "price".to_string(),
            direction,
        }]
    }

    #[tokio::test]
    async fn test_query_filter_order_limit() {
        let store = seeded();
        let mut query = StructuredQuery::collection("products");
        query.filter = Some(StoreFilter::Field {
            path: "category".to_string(),
            op: FilterOperator::EqualTo,
            value: json!("a"),
        });
        query.order_by = by_price(Direction::Descending);
        query.limit = Some(2);

        let docs = store.run_query(&query, &CancellationToken::new()).await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["p4", "p3"]);
        assert_eq!(store.calls().run_query, 1);
        assert_eq!(store.queries()[0].limit, Some(2));
    }

    #[tokio::test]
    async fn test_limit_to_last_keeps_query_order() {
        let store = seeded();
        let mut query = StructuredQuery::collection("products");
        query.order_by = by_price(Direction::Ascending);
        query.limit_to_last = Some(2);
        let docs = store.run_query(&query, &CancellationToken::new()).await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["p3", "p4"]);
    }

    #[tokio::test]
    async fn test_or_rejected_without_native_support() {
        let store = seeded().without_native_or();
        let mut query = StructuredQuery::collection("products");
        query.filter = Some(StoreFilter::Or(vec![]));
        assert!(matches!(
            store.run_query(&query, &CancellationToken::new()).await,
            Err(StoreError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_aggregations() {
        let store = seeded();
        let cancel = CancellationToken::new();
        let query = StructuredQuery::collection("products");
        assert_eq!(
            store.run_aggregation(&query, &AggregateField::Count, &cancel).await.unwrap(),
            json!(5)
        );
        assert_eq!(
            store
                .run_aggregation(&query, &AggregateField::Sum("price".to_string()), &cancel)
                .await
                .unwrap(),
            json!(100)
        );
        assert_eq!(
            store
                .run_aggregation(&query, &AggregateField::Average("missing".to_string()), &cancel)
                .await
                .unwrap(),
            Value::Null
        );
    }

    #[tokio::test]
    async fn test_fixtures_and_paths() {
        let store = InMemoryStore::new();
        let count = store
            .load_fixtures(&json!({
                "customers": {"c1": {"name": "Ada"}},
                "customers/c1/orders": {"o1": {"status": "new"}}
            }))
            .unwrap();
        assert_eq!(count, 2);

        let cancel = CancellationToken::new();
        let order = store.get_by_path("customers/c1/orders/o1", &cancel).await.unwrap().unwrap();
        assert_eq!(order.collection_path(), "customers/c1/orders");
        assert!(store.get_by_path("customers/c9", &cancel).await.unwrap().is_none());
        assert!(store.get_by_path("customers", &cancel).await.is_err());
        assert_eq!(store.calls().get_by_path, 3);
    }
}
