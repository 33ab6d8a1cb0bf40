//! docql core - storage-independent query translation for document stores.
//!
//! This crate turns a typed upstream query pipeline into a store-native
//! query description without touching any storage. It is used by the
//! `docql` executor and by tools that only need to inspect query plans.
//!
//! # Main Components
//!
//! - **Metadata**: entity, complex and enum type descriptions
//! - **Expr**: the upstream query expression tree
//! - **Translator**: `QueryExpr` → `QueryNode`
//! - **Resolver**: `QueryNode` + parameters → `ResolvedQuery`
//! - **Limits**: store cardinality rules, checked before any wire call
//!
//! # Example
//!
//! ```rust
//! use docql_core::expr::{lambda, param, variable, QueryExpr};
//! use docql_core::metadata::{DeclaredType, Model, PropertyDescriptor, TypeDescriptor};
//! use docql_core::{Access, Parameters, Resolver, Translator};
//! use serde_json::json;
//!
//! let model = Model::new().with_type(
//!     TypeDescriptor::entity("Product", "products", "Id")
//!         .with_property(PropertyDescriptor::new("Id", DeclaredType::string()))
//!         .with_property(PropertyDescriptor::new("Price", DeclaredType::float())),
//! );
//!
//! let query = QueryExpr::from("Product").filter(lambda("p", param("p").member("Id").equal(variable("id"))));
//! let node = Translator::new(&model).translate(&query).unwrap();
//!
//! let params = Parameters::from([("id".to_string(), json!("p-1"))]);
//! let resolved = Resolver::new(&model).resolve(&node, &params).unwrap();
//! assert_eq!(resolved.access, Access::Document("p-1".to_string()));
//! ```

pub mod ast;
pub mod error;
pub mod expr;
pub mod limits;
pub mod metadata;
pub mod resolver;
pub mod translator;

// Re-export main types for convenience
pub use ast::{
    AggregateKind, Aggregation, Direction, FieldRef, FilterNode, FilterOperator, IncludeInfo,
    OrFilterGroup, OrderClause, ProjectedType, Projection, ProjectionMember, QueryNode,
    QueryTarget, ResultCardinality, ValueExpr, WhereClause,
};
pub use error::{QueryError, QueryResult};
pub use limits::StoreLimits;
pub use metadata::{Model, DOCUMENT_ID_FIELD};
pub use resolver::{Access, IncludePlan, Parameters, ResolvedFilter, ResolvedQuery, Resolver};
pub use translator::Translator;
