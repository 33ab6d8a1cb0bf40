//! Common test utilities for docql integration tests
//!
//! Provides shared helpers for:
//! - Building the shop model (products, customers, orders)
//! - Seeding an in-memory store with fixture documents
//! - Executing query pipelines and reading results

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use docql::docql_core::expr::QueryExpr;
use docql::docql_core::metadata::{
    CollectionKind, DeclaredType, EnumDescriptor, Model, NavigationDescriptor, PropertyDescriptor, TypeDescriptor,
};
use docql::{
    CancellationToken, DocumentStore, DqlConfig, DqlResult, InMemoryStore, MaterializedValue, Parameters,
    QueryEngine, QueryOutput,
};

pub fn shop_model() -> Model {
    Model::new()
        .with_enum(EnumDescriptor::new("OrderStatus", &["Pending", "Confirmed", "Shipped"]))
        .with_type(
            TypeDescriptor::entity("Product", "products", "Id")
                .with_property(PropertyDescriptor::new("Id", DeclaredType::string()))
                .with_property(PropertyDescriptor::new("Name", DeclaredType::string()).stored_as("name"))
                .with_property(PropertyDescriptor::new("Category", DeclaredType::string()).stored_as("category"))
                .with_property(PropertyDescriptor::new("Price", DeclaredType::float()).stored_as("price"))
                .with_property(PropertyDescriptor::new("Stock", DeclaredType::int()).stored_as("stock"))
                .with_property(
                    PropertyDescriptor::new("Description", DeclaredType::string())
                        .stored_as("description")
                        .nullable(),
                )
                .with_property(
                    PropertyDescriptor::new("Notes", DeclaredType::string())
                        .stored_as("notes")
                        .persisting_null(),
                )
                .with_property(
                    PropertyDescriptor::new("Tags", DeclaredType::collection(CollectionKind::Set, DeclaredType::string()))
                        .stored_as("tags"),
                )
                .with_navigation(NavigationDescriptor::reference("Supplier", "Supplier", "supplierRef")),
        )
        .with_type(
            TypeDescriptor::entity("Supplier", "suppliers", "Id")
                .with_property(PropertyDescriptor::new("Id", DeclaredType::string()))
                .with_property(PropertyDescriptor::new("Name", DeclaredType::string()).stored_as("name")),
        )
        .with_type(
            TypeDescriptor::entity("Customer", "customers", "Id")
                .with_property(PropertyDescriptor::new("Id", DeclaredType::string()))
                .with_property(PropertyDescriptor::new("Name", DeclaredType::string()).stored_as("name"))
                .with_property(PropertyDescriptor::new("Address", DeclaredType::complex("Address")).stored_as("address"))
                .with_navigation(NavigationDescriptor::child_collection(
                    "Orders",
                    "Order",
                    CollectionKind::List,
                    "orders",
                ))
                .with_navigation(NavigationDescriptor::child_collection(
                    "OrderHistory",
                    "Order",
                    CollectionKind::Sequence,
                    "orders",
                ))
                .with_navigation(NavigationDescriptor::reference_list(
                    "Favorites",
                    "Product",
                    CollectionKind::Set,
                    "favorites",
                )),
        )
        .with_type(
            TypeDescriptor::complex("Address")
                .with_property(PropertyDescriptor::new("Street", DeclaredType::string()).stored_as("street"))
                .with_property(PropertyDescriptor::new("City", DeclaredType::string()).stored_as("city")),
        )
        .with_type(
            TypeDescriptor::entity("Order", "orders", "Id")
                .with_property(PropertyDescriptor::new("Id", DeclaredType::string()))
                .with_property(
                    PropertyDescriptor::new("Status", DeclaredType::enumeration("OrderStatus")).stored_as("status"),
                )
                .with_property(PropertyDescriptor::new("Priority", DeclaredType::int()).stored_as("priority"))
                .with_navigation(NavigationDescriptor::reference("Product", "Product", "productRef")),
        )
}

pub fn shop_fixtures() -> Value {
    let mut orders = serde_json::Map::new();
    for priority in 1..=5 {
        orders.insert(
            format!("o{}", priority),
            json!({
                "status": "Confirmed",
                "priority": priority,
                "productRef": if priority % 2 == 0 { "products/p2" } else { "products/p1" }
            }),
        );
    }
    for (i, priority) in [10, 9, 8].iter().enumerate() {
        orders.insert(
            format!("x{}", i),
            json!({"status": "Pending", "priority": priority, "productRef": "products/p3"}),
        );
    }

    json!({
        "products": {
            "p1": {"name": "Phone", "category": "Electronics", "price": 10, "stock": 4, "tags": ["new", "sale"], "notes": null, "supplierRef": "suppliers/s1"},
            "p2": {"name": "Tablet", "category": "Electronics", "price": 20, "stock": 2, "description": "10 inch"},
            "p3": {"name": "Laptop", "category": "Electronics", "price": 30, "stock": 1},
            "p4": {"name": "Monitor", "category": "Electronics", "price": 40, "stock": 7},
            "p5": {"name": "Camera", "category": "Electronics", "price": 50, "stock": 0},
            "p6": {"name": "Novel", "category": "Books", "price": 15.5, "stock": 12},
            "p7": {"name": "Atlas", "category": "Books", "price": 25, "stock": 3}
        },
        "suppliers": {
            "s1": {"name": "Acme"}
        },
        "customers": {
            "c1": {"name": "Ada", "address": {"street": "1 Loop Rd", "city": "London"}},
            "c2": {"name": "Grace", "favorites": ["products/p2", "products/p1", "products/missing", "products/p2"]}
        },
        "customers/c1/orders": Value::Object(orders)
    })
}

pub fn seeded_store() -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    store.load_fixtures(&shop_fixtures()).unwrap();
    Arc::new(store)
}

pub fn create_engine(store: Arc<InMemoryStore>) -> QueryEngine {
    create_engine_with_config(store, DqlConfig::default())
}

pub fn create_engine_with_config(store: Arc<InMemoryStore>, config: DqlConfig) -> QueryEngine {
    let store: Arc<dyn DocumentStore> = store;
    QueryEngine::new(store, Arc::new(shop_model()), config)
}

pub async fn run(engine: &QueryEngine, query: QueryExpr) -> DqlResult<QueryOutput> {
    run_with(engine, query, Parameters::new()).await
}

pub async fn run_with(engine: &QueryEngine, query: QueryExpr, params: Parameters) -> DqlResult<QueryOutput> {
    let compiled = engine.compile(&query)?;
    engine.execute(&compiled, &params, &CancellationToken::new()).await
}

pub fn params(pairs: &[(&str, Value)]) -> Parameters {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// Items of a sequence result
pub fn sequence(output: QueryOutput) -> Vec<MaterializedValue> {
    output.into_sequence().expect("expected a sequence result")
}

/// Keys of a sequence of entity instances
pub fn keys(output: QueryOutput) -> Vec<String> {
    sequence(output)
        .iter()
        .map(|v| v.as_object().and_then(|o| o.key()).unwrap_or_default().to_string())
        .collect()
}

pub fn field(value: &MaterializedValue, name: &str) -> MaterializedValue {
    value
        .as_object()
        .and_then(|o| o.get(name))
        .unwrap_or(MaterializedValue::Null)
}
