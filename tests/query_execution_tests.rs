//! Query execution tests
//!
//! End-to-end pipeline tests over the in-memory store:
//! - identity fast path and explain
//! - ordering with offset emulation
//! - result cardinality
//! - projections and parameters
//! - OR emulation and cancellation

mod common;

use common::*;
use serde_json::json;

use docql::docql_core::expr::{constant, lambda, new_object, not, param, variable, QueryExpr};
use docql::executor::Source;
use docql::store::StoreFilter;
use docql::{CancellationToken, DqlError, InMemoryStore, MaterializedValue, Parameters, QueryError};

fn electronics() -> QueryExpr {
    QueryExpr::from("Product").filter(lambda("p", param("p").member("Category").equal_const("Electronics")))
}

#[tokio::test]
async fn test_primary_key_fast_path() {
    let store = seeded_store();
    let engine = create_engine(store.clone());

    let query = QueryExpr::from("Product").filter(lambda("p", param("p").member("Id").equal(variable("id"))));
    let compiled = engine.compile(&query).unwrap();
    assert!(compiled.node().is_fast_path());
    assert!(!compiled.node().has_or_groups());

    let output = engine
        .execute(&compiled, &params(&[("id", json!("p2"))]), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(keys(output), vec!["p2"]);

    let calls = store.calls();
    assert_eq!(calls.get_document, 1);
    assert_eq!(calls.run_query, 0);
}

#[tokio::test]
async fn test_key_equality_with_other_filters_is_a_query() {
    let store = seeded_store();
    let engine = create_engine(store.clone());

    let query = QueryExpr::from("Product").filter(lambda(
        "p",
        param("p")
            .member("Id")
            .equal_const("p2")
            .and(param("p").member("Category").equal_const("Books")),
    ));
    let output = run(&engine, query).await.unwrap();
    assert!(keys(output).is_empty());
    assert_eq!(store.calls().run_query, 1);
    assert_eq!(store.calls().get_document, 0);
}

#[tokio::test]
async fn test_order_skip_take_emulates_offset() {
    let store = seeded_store();
    let engine = create_engine(store.clone());

    let query = electronics()
        .order_by_descending(lambda("p", param("p").member("Price")))
        .skip_const(1)
        .take_const(2);
    let items = sequence(run(&engine, query).await.unwrap());

    let prices: Vec<_> = items.iter().map(|item| field(item, "Price")).collect();
    assert_eq!(prices, vec![MaterializedValue::Float(40.0), MaterializedValue::Float(30.0)]);

    let queries = store.queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].limit, Some(3));
}

#[tokio::test]
async fn test_documents_missing_an_ordered_field_are_excluded() {
    let store = seeded_store();
    let engine = create_engine(store.clone());

    let query = QueryExpr::from("Product").order_by(lambda("p", param("p").member("Description")));
    assert_eq!(keys(run(&engine, query).await.unwrap()), vec!["p2"]);
}

#[tokio::test]
async fn test_element_operators() {
    let store = seeded_store();
    let engine = create_engine(store.clone());

    let first = run(&engine, electronics().order_by(lambda("p", param("p").member("Price"))).first())
        .await
        .unwrap();
    let first = first.into_value().unwrap();
    assert_eq!(first.as_object().unwrap().key(), Some("p1"));

    store.reset_calls();
    let last = run(&engine, electronics().order_by(lambda("p", param("p").member("Price"))).last())
        .await
        .unwrap();
    assert_eq!(last.into_value().unwrap().as_object().unwrap().key(), Some("p5"));
    assert_eq!(store.queries()[0].limit_to_last, Some(1));

    let books = QueryExpr::from("Product").filter(lambda("p", param("p").member("Category").equal_const("Books")));
    assert!(matches!(
        run(&engine, books.single()).await,
        Err(DqlError::MoreThanOneElement)
    ));
}

#[tokio::test]
async fn test_empty_element_results() {
    let engine = create_engine(seeded_store());
    let toys = || QueryExpr::from("Product").filter(lambda("p", param("p").member("Category").equal_const("Toys")));

    assert!(matches!(run(&engine, toys().first()).await, Err(DqlError::EmptySequence)));
    assert_eq!(
        run(&engine, toys().single_or_default()).await.unwrap().into_value(),
        Some(MaterializedValue::Null)
    );

    let missing = QueryExpr::from("Product")
        .filter(lambda("p", param("p").member("Id").equal_const("nope")))
        .first();
    match run(&engine, missing).await {
        Err(DqlError::NotFound(path)) => assert_eq!(path, "products/nope"),
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_parameters_bound_per_execution() {
    let engine = create_engine(seeded_store());
    let query = QueryExpr::from("Product")
        .filter(lambda("p", param("p").member("Category").equal(variable("category"))))
        .order_by(lambda("p", param("p").member("Price")));
    let compiled = engine.compile(&query).unwrap();
    let cancel = CancellationToken::new();

    let books = engine
        .execute(&compiled, &params(&[("category", json!("Books"))]), &cancel)
        .await
        .unwrap();
    assert_eq!(keys(books), vec!["p6", "p7"]);

    let electronics = engine
        .execute(&compiled, &params(&[("category", json!("Electronics"))]), &cancel)
        .await
        .unwrap();
    assert_eq!(keys(electronics).len(), 5);

    assert!(matches!(
        engine.execute(&compiled, &Parameters::new(), &cancel).await,
        Err(DqlError::Query(QueryError::MissingParameter(_)))
    ));
}

#[tokio::test]
async fn test_member_projection() {
    let engine = create_engine(seeded_store());
    let query = QueryExpr::from("Customer")
        .filter(lambda("c", param("c").member("Id").equal_const("c1")))
        .select(lambda(
            "c",
            new_object(
                "CustomerCard",
                vec![
                    ("Name", param("c").member("Name")),
                    ("", param("c").member("Address").member("City")),
                ],
            ),
        ));
    let items = sequence(run(&engine, query).await.unwrap());
    assert_eq!(items.len(), 1);

    let card = items[0].as_object().unwrap();
    assert_eq!(card.type_name(), "CustomerCard");
    assert_eq!(card.key(), None);
    assert_eq!(card.get("Name"), Some(MaterializedValue::String("Ada".to_string())));
    assert_eq!(card.get("address.city"), Some(MaterializedValue::String("London".to_string())));
}

#[tokio::test]
async fn test_single_field_projection() {
    let engine = create_engine(seeded_store());
    let query = QueryExpr::from("Product")
        .filter(lambda("p", param("p").member("Category").equal_const("Books")))
        .order_by(lambda("p", param("p").member("Price")))
        .select(lambda("p", param("p").member("Price")));
    let items = sequence(run(&engine, query).await.unwrap());
    assert_eq!(items, vec![MaterializedValue::Float(15.5), MaterializedValue::Float(25.0)]);
}

#[tokio::test]
async fn test_or_emulated_without_native_support() {
    let store = InMemoryStore::new().without_native_or();
    store.load_fixtures(&shop_fixtures()).unwrap();
    let store = std::sync::Arc::new(store);
    let engine = create_engine(store.clone());

    let query = QueryExpr::from("Product").filter(lambda(
        "p",
        param("p")
            .member("Category")
            .equal_const("Books")
            .or(param("p").member("Price").greater_than(constant(45))),
    ));
    assert_eq!(keys(run(&engine, query).await.unwrap()), vec!["p5", "p6", "p7"]);

    let queries = store.queries();
    assert_eq!(queries.len(), 2);
    assert!(queries.iter().all(|q| !q.filter.as_ref().is_some_and(StoreFilter::has_or)));
}

#[tokio::test]
async fn test_native_or_is_one_query() {
    let store = seeded_store();
    let engine = create_engine(store.clone());

    let query = QueryExpr::from("Product").filter(lambda(
        "p",
        param("p")
            .member("Category")
            .equal_const("Books")
            .or(param("p").member("Price").greater_than(constant(45))),
    ));
    assert_eq!(keys(run(&engine, query).await.unwrap()), vec!["p5", "p6", "p7"]);
    assert_eq!(store.calls().run_query, 1);
}

#[tokio::test]
async fn test_negated_membership() {
    let engine = create_engine(seeded_store());
    let query = QueryExpr::from("Product").filter(lambda(
        "p",
        not(variable("categories").contains(param("p").member("Category"))),
    ));
    let output = run_with(&engine, query, params(&[("categories", json!(["Electronics"]))]))
        .await
        .unwrap();
    assert_eq!(keys(output), vec!["p6", "p7"]);
}

#[tokio::test]
async fn test_cancelled_execution() {
    let store = seeded_store();
    let engine = create_engine(store.clone());
    let compiled = engine.compile(&electronics()).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine.execute(&compiled, &Parameters::new(), &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(store.calls().total(), 0);
}

#[tokio::test]
async fn test_explain_makes_no_wire_calls() {
    let store = seeded_store();
    let engine = create_engine(store.clone());

    let query = QueryExpr::from("Product").filter(lambda("p", param("p").member("Id").equal_const("p1")));
    let explain = engine.explain(&engine.compile(&query).unwrap(), &Parameters::new()).unwrap();
    assert!(matches!(explain.plan.source, Source::Lookup { ref id, .. } if id == "p1"));

    let explain = engine
        .explain(
            &engine
                .compile(&electronics().order_by(lambda("p", param("p").member("Price"))).take_const(2))
                .unwrap(),
            &Parameters::new(),
        )
        .unwrap();
    match &explain.plan.source {
        Source::Query(query) => {
            assert_eq!(query.collection_path, "products");
            assert_eq!(query.limit, Some(2));
        }
        other => panic!("unexpected source {:?}", other),
    }
    let json = serde_json::to_value(&explain).unwrap();
    assert_eq!(json["resolved"]["collection"], json!("products"));

    assert_eq!(store.calls().total(), 0);
}
