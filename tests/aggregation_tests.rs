//! Aggregation tests

mod common;

use common::*;

use docql::docql_core::expr::{lambda, param, QueryExpr};
use docql::{DqlError, MaterializedValue, QueryError};

fn category(name: &str) -> QueryExpr {
    QueryExpr::from("Product").filter(lambda("p", param("p").member("Category").equal_const(name)))
}

fn price() -> docql::docql_core::expr::Lambda {
    lambda("p", param("p").member("Price"))
}

async fn scalar(query: QueryExpr) -> Result<MaterializedValue, DqlError> {
    let engine = create_engine(seeded_store());
    Ok(run(&engine, query).await?.into_value().expect("expected a scalar result"))
}

#[tokio::test]
async fn test_count_runs_natively() {
    let store = seeded_store();
    let engine = create_engine(store.clone());

    let output = run(&engine, category("Electronics").count()).await.unwrap();
    assert_eq!(output.into_value(), Some(MaterializedValue::Int(5)));

    let calls = store.calls();
    assert_eq!(calls.run_aggregation, 1);
    assert_eq!(calls.run_query, 0);
}

#[tokio::test]
async fn test_count_after_skip() {
    let value = scalar(category("Electronics").skip_const(2).count()).await.unwrap();
    assert_eq!(value, MaterializedValue::Int(3));
}

#[tokio::test]
async fn test_sum_and_average_take_the_declared_type() {
    assert_eq!(
        scalar(category("Electronics").sum(price())).await.unwrap(),
        MaterializedValue::Float(150.0)
    );
    assert_eq!(
        scalar(category("Electronics").average(price())).await.unwrap(),
        MaterializedValue::Float(30.0)
    );
    assert_eq!(
        scalar(category("Toys").sum(price())).await.unwrap(),
        MaterializedValue::Float(0.0)
    );
}

#[tokio::test]
async fn test_sum_with_skip_is_rejected() {
    let err = scalar(category("Electronics").skip_const(1).sum(price())).await.unwrap_err();
    assert!(matches!(err, DqlError::Query(QueryError::UnsupportedQuery(_))));
}

#[tokio::test]
async fn test_min_max_use_an_ordered_query() {
    let store = seeded_store();
    let engine = create_engine(store.clone());

    let min = run(&engine, category("Electronics").min(price())).await.unwrap();
    assert_eq!(min.into_value(), Some(MaterializedValue::Float(10.0)));

    let queries = store.queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].limit, Some(1));
    assert_eq!(queries[0].order_by[0].path, "price");

    let max = run(&engine, category("Books").max(price())).await.unwrap();
    assert_eq!(max.into_value(), Some(MaterializedValue::Float(25.0)));
}

#[tokio::test]
async fn test_empty_aggregations() {
    assert!(matches!(
        scalar(category("Toys").average(price())).await,
        Err(DqlError::EmptySequence)
    ));
    assert!(matches!(
        scalar(category("Toys").min(price())).await,
        Err(DqlError::EmptySequence)
    ));
    assert_eq!(
        scalar(category("Toys").count()).await.unwrap(),
        MaterializedValue::Int(0)
    );
}

#[tokio::test]
async fn test_any() {
    assert_eq!(scalar(category("Books").any()).await.unwrap(), MaterializedValue::Bool(true));
    assert_eq!(scalar(category("Toys").any()).await.unwrap(), MaterializedValue::Bool(false));
}

#[tokio::test]
async fn test_aggregation_over_a_window_folds_client_side() {
    let store = seeded_store();
    let engine = create_engine(store.clone());

    let query = category("Electronics")
        .order_by(price())
        .take_const(3)
        .max(price());
    let output = run(&engine, query).await.unwrap();
    assert_eq!(output.into_value(), Some(MaterializedValue::Float(30.0)));
    assert_eq!(store.calls().run_aggregation, 0);
}
