//! Store limit tests
//!
//! Every rejection here must happen before the first wire call.

mod common;

use common::*;
use serde_json::{json, Value};

use docql::docql_core::expr::{constant, lambda, not, param, variable, QueryExpr};
use docql::{DqlConfig, DqlError, QueryError};

fn categories(n: usize) -> Value {
    let mut values: Vec<Value> = (0..n).map(|i| json!(format!("cat-{}", i))).collect();
    values[0] = json!("Books");
    Value::Array(values)
}

fn in_query() -> QueryExpr {
    QueryExpr::from("Product").filter(lambda(
        "p",
        variable("categories").contains(param("p").member("Category")),
    ))
}

fn not_in_query() -> QueryExpr {
    QueryExpr::from("Product").filter(lambda(
        "p",
        not(variable("categories").contains(param("p").member("Category"))),
    ))
}

#[tokio::test]
async fn test_in_accepts_thirty_values() {
    let store = seeded_store();
    let engine = create_engine(store.clone());
    let output = run_with(&engine, in_query(), params(&[("categories", categories(30))]))
        .await
        .unwrap();
    assert_eq!(keys(output), vec!["p6", "p7"]);
}

#[tokio::test]
async fn test_in_rejects_thirty_one_values_before_any_call() {
    let store = seeded_store();
    let engine = create_engine(store.clone());
    let err = run_with(&engine, in_query(), params(&[("categories", categories(31))]))
        .await
        .unwrap_err();

    match err {
        DqlError::Query(QueryError::CardinalityExceeded { count, limit, .. }) => {
            assert_eq!(count, 31);
            assert_eq!(limit, 30);
        }
        other => panic!("expected CardinalityExceeded, got {:?}", other),
    }
    assert_eq!(store.calls().total(), 0);
}

#[tokio::test]
async fn test_constant_list_is_checked_too() {
    let store = seeded_store();
    let engine = create_engine(store.clone());
    let query = QueryExpr::from("Product").filter(lambda(
        "p",
        constant(categories(31)).contains(param("p").member("Category")),
    ));
    assert!(matches!(
        run(&engine, query).await,
        Err(DqlError::Query(QueryError::CardinalityExceeded { .. }))
    ));
    assert_eq!(store.calls().total(), 0);
}

#[tokio::test]
async fn test_not_in_limits() {
    let store = seeded_store();
    let engine = create_engine(store.clone());

    let output = run_with(&engine, not_in_query(), params(&[("categories", categories(10))]))
        .await
        .unwrap();
    assert_eq!(keys(output).len(), 5);

    store.reset_calls();
    let err = run_with(&engine, not_in_query(), params(&[("categories", categories(11))]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DqlError::Query(QueryError::CardinalityExceeded { count: 11, limit: 10, .. })
    ));
    assert_eq!(store.calls().total(), 0);
}

#[tokio::test]
async fn test_array_contains_any_limits() {
    let store = seeded_store();
    let engine = create_engine(store.clone());
    let query = || {
        QueryExpr::from("Product").filter(lambda(
            "p",
            param("p")
                .member("Tags")
                .any(lambda("t", variable("tags").contains(param("t")))),
        ))
    };

    let mut tags: Vec<Value> = (0..29).map(|i| json!(format!("tag-{}", i))).collect();
    tags.push(json!("sale"));
    let output = run_with(&engine, query(), params(&[("tags", Value::Array(tags.clone()))]))
        .await
        .unwrap();
    assert_eq!(keys(output), vec!["p1"]);

    store.reset_calls();
    tags.push(json!("extra"));
    assert!(run_with(&engine, query(), params(&[("tags", Value::Array(tags))]))
        .await
        .is_err());
    assert_eq!(store.calls().total(), 0);
}

#[tokio::test]
async fn test_configured_limits() {
    let store = seeded_store();
    let mut config = DqlConfig::default();
    config.limits.max_in_values = 5;
    let engine = create_engine_with_config(store.clone(), config);

    assert!(run_with(&engine, in_query(), params(&[("categories", categories(6))]))
        .await
        .is_err());
    assert!(run_with(&engine, in_query(), params(&[("categories", categories(5))]))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_null_filter_without_null_persistence() {
    let store = seeded_store();
    let engine = create_engine(store.clone());

    let query = QueryExpr::from("Product").filter(lambda(
        "p",
        param("p").member("Description").equal(constant(Value::Null)),
    ));
    match run(&engine, query).await {
        Err(DqlError::Query(QueryError::NullFilterUnsupported(property))) => {
            assert_eq!(property, "Description")
        }
        other => panic!("expected NullFilterUnsupported, got {:?}", other),
    }
    assert_eq!(store.calls().total(), 0);
}

#[tokio::test]
async fn test_null_filter_on_persisted_nulls() {
    let engine = create_engine(seeded_store());
    let query = QueryExpr::from("Product").filter(lambda(
        "p",
        param("p").member("Notes").equal(constant(Value::Null)),
    ));
    assert_eq!(keys(run(&engine, query).await.unwrap()), vec!["p1"]);
}

#[tokio::test]
async fn test_single_inequality_field() {
    let store = seeded_store();
    let engine = create_engine(store.clone());
    let query = QueryExpr::from("Product").filter(lambda(
        "p",
        param("p")
            .member("Price")
            .greater_than(constant(10))
            .and(param("p").member("Stock").less_than(constant(5))),
    ));
    assert!(matches!(
        run(&engine, query).await,
        Err(DqlError::Query(QueryError::UnsupportedQuery(_)))
    ));
    assert_eq!(store.calls().total(), 0);
}

#[tokio::test]
async fn test_inequality_field_must_lead_the_ordering() {
    let store = seeded_store();
    let engine = create_engine(store.clone());
    let above_ten = || {
        QueryExpr::from("Product").filter(lambda("p", param("p").member("Price").greater_than(constant(10))))
    };

    let by_name = above_ten().order_by(lambda("p", param("p").member("Name")));
    assert!(matches!(
        run(&engine, by_name).await,
        Err(DqlError::Query(QueryError::UnsupportedQuery(_)))
    ));
    assert_eq!(store.calls().total(), 0);

    let by_price_then_name = above_ten()
        .order_by_descending(lambda("p", param("p").member("Price")))
        .then_by(lambda("p", param("p").member("Name")))
        .take_const(2);
    assert_eq!(keys(run(&engine, by_price_then_name).await.unwrap()), vec!["p5", "p4"]);
}

#[tokio::test]
async fn test_include_filters_are_checked_before_the_root_query() {
    let store = seeded_store();
    let engine = create_engine(store.clone());
    let query = QueryExpr::from("Customer").include(lambda(
        "c",
        param("c")
            .member("Orders")
            .where_(lambda("o", variable("priorities").contains(param("o").member("Priority")))),
    ));
    let priorities: Vec<Value> = (0..31).map(|i| json!(i)).collect();
    assert!(run_with(&engine, query, params(&[("priorities", Value::Array(priorities))]))
        .await
        .is_err());
    assert_eq!(store.calls().total(), 0);
}
