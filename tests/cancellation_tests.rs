//! Cancellation tests
//!
//! A store wrapper stalls include fetches so the token fires while the
//! object graph is half loaded.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use common::*;
use docql::docql_core::expr::{lambda, param, QueryExpr};
use docql::store::{AggregateField, StoreCapabilities};
use docql::{
    CancellationToken, DocumentStore, DqlConfig, DqlError, InMemoryStore, Parameters, QueryEngine, RawDocument,
    StoreError, StructuredQuery,
};

/// Delays subcollection queries and reference lookups
struct StallingStore {
    inner: Arc<InMemoryStore>,
    delay: Duration,
}

impl StallingStore {
    fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            delay: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl DocumentStore for StallingStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.inner.capabilities()
    }

    async fn get_document(
        &self,
        collection_path: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<RawDocument>, StoreError> {
        self.inner.get_document(collection_path, id, cancel).await
    }

    async fn run_query(
        &self,
        query: &StructuredQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawDocument>, StoreError> {
        if query.collection_path.contains('/') {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.run_query(query, cancel).await
    }

    async fn get_by_path(&self, path: &str, cancel: &CancellationToken) -> Result<Option<RawDocument>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_by_path(path, cancel).await
    }

    async fn run_aggregation(
        &self,
        query: &StructuredQuery,
        field: &AggregateField,
        cancel: &CancellationToken,
    ) -> Result<Value, StoreError> {
        self.inner.run_aggregation(query, field, cancel).await
    }
}

fn stalling_engine(inner: Arc<InMemoryStore>, parallel_includes: bool) -> QueryEngine {
    let mut config = DqlConfig::default();
    config.execution.parallel_includes = parallel_includes;
    let store: Arc<dyn DocumentStore> = Arc::new(StallingStore::new(inner));
    QueryEngine::new(store, Arc::new(shop_model()), config)
}

fn customer_with(key: &str, navigations: &[&str]) -> QueryExpr {
    navigations.iter().fold(
        QueryExpr::from("Customer").filter(lambda("c", param("c").member("Id").equal_const(key))),
        |query, navigation| query.include(lambda("c", param("c").member(navigation))),
    )
}

/// Cancel shortly after `execute` starts; the execution must stop promptly.
async fn execute_and_cancel(engine: &QueryEngine, query: QueryExpr) -> Result<(), DqlError> {
    let compiled = engine.compile(&query)?;
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let output = tokio::time::timeout(
        Duration::from_secs(5),
        engine.execute(&compiled, &Parameters::new(), &cancel),
    )
    .await
    .expect("cancellation did not interrupt the include load")?;
    panic!("expected a cancelled execution, got {:?}", output);
}

#[tokio::test]
async fn test_cancel_during_child_include() {
    let inner = seeded_store();
    let engine = stalling_engine(inner.clone(), false);

    let err = execute_and_cancel(&engine, customer_with("c1", &["Orders"])).await.unwrap_err();
    assert!(err.is_cancelled());

    // the root lookup ran, the stalled subcollection query never completed
    let calls = inner.calls();
    assert_eq!(calls.get_document, 1);
    assert_eq!(calls.run_query, 0);
}

#[tokio::test]
async fn test_cancel_during_reference_include() {
    let inner = seeded_store();
    let engine = stalling_engine(inner.clone(), false);

    let err = execute_and_cancel(&engine, customer_with("c2", &["Favorites"])).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(inner.calls().get_by_path, 0);
}

#[tokio::test]
async fn test_cancel_during_parallel_includes() {
    let inner = seeded_store();
    let engine = stalling_engine(inner.clone(), true);

    let err = execute_and_cancel(&engine, customer_with("c2", &["Orders", "Favorites"]))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    let calls = inner.calls();
    assert_eq!(calls.run_query, 0);
    assert_eq!(calls.get_by_path, 0);
}

#[tokio::test]
async fn test_cancelled_graph_is_not_reused() {
    let inner = seeded_store();
    let stalling = stalling_engine(inner.clone(), false);
    let err = execute_and_cancel(&stalling, customer_with("c1", &["Orders"])).await.unwrap_err();
    assert!(err.is_cancelled());

    // a fresh execution over the same data builds the complete graph
    let engine = create_engine(inner);
    let c1 = run(&engine, customer_with("c1", &["Orders"]).first())
        .await
        .unwrap()
        .into_value()
        .unwrap();
    let orders = field(&c1, "Orders");
    assert_eq!(orders.as_collection().map(|c| c.len()), Some(8));
}
