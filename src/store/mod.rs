//! Wire client surface of the document store.
//!
//! The executor only talks to the store through [`DocumentStore`]; the
//! in-memory implementation backs the tests and the CLI.

pub mod eval;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use docql_core::{Direction, FilterOperator, DOCUMENT_ID_FIELD};

use crate::cancel::CancellationToken;
use crate::error::StoreError;

pub use memory::{InMemoryStore, StoreCalls};

/// A document as returned by the wire client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    /// Full document path, `customers/c1/orders/o1`
    pub path: String,
    pub data: Value,
}

impl RawDocument {
    pub fn new(path: impl Into<String>, data: Value) -> Self {
        Self {
            path: path.into(),
            data,
        }
    }

    /// Last path segment
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Path of the collection holding this document
    pub fn collection_path(&self) -> &str {
        self.path.rsplit_once('/').map(|(c, _)| c).unwrap_or("")
    }

    /// Stored value at a dot-separated path; `__name__` is the document id.
    pub fn field(&self, path: &str) -> Option<Value> {
        if path == DOCUMENT_ID_FIELD {
            return Some(Value::String(self.id().to_string()));
        }
        eval::field_value(&self.data, path).cloned()
    }
}

/// Split a document path into collection path and id
pub fn split_document_path(path: &str) -> Result<(&str, &str), StoreError> {
    let segments = path.split('/').count();
    match path.rsplit_once('/') {
        Some((collection, id)) if segments % 2 == 0 && !collection.is_empty() && !id.is_empty() => {
            Ok((collection, id))
        }
        _ => Err(StoreError::InvalidPath(path.to_string())),
    }
}

/// Store-native filter tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFilter {
    Field {
        path: String,
        op: FilterOperator,
        value: Value,
    },
    And(Vec<StoreFilter>),
    Or(Vec<StoreFilter>),
}

impl StoreFilter {
    pub fn has_or(&self) -> bool {
        match self {
            StoreFilter::Field { .. } => false,
            StoreFilter::Or(_) => true,
            StoreFilter::And(members) => members.iter().any(StoreFilter::has_or),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreOrder {
    pub path: String,
    pub direction: Direction,
}

/// One query against one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub collection_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<StoreFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<StoreOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_to_last: Option<usize>,
}

impl StructuredQuery {
    pub fn collection(collection_path: impl Into<String>) -> Self {
        Self {
            collection_path: collection_path.into(),
            filter: None,
            order_by: Vec::new(),
            limit: None,
            limit_to_last: None,
        }
    }
}

/// Server-side aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateField {
    Count,
    Sum(String),
    Average(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCapabilities {
    /// Whether `StoreFilter::Or` is accepted
    pub native_or: bool,
}

impl Default for StoreCapabilities {
    fn default() -> Self {
        Self { native_or: true }
    }
}

/// Wire client of the document store.
///
/// Implementations observe `cancel` where they can; the executor also races
/// every call against it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn capabilities(&self) -> StoreCapabilities;

    /// Fetch one document of a collection by id.
    async fn get_document(
        &self,
        collection_path: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<RawDocument>, StoreError>;

    async fn run_query(
        &self,
        query: &StructuredQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawDocument>, StoreError>;

    /// Fetch a document by its full path.
    async fn get_by_path(&self, path: &str, cancel: &CancellationToken) -> Result<Option<RawDocument>, StoreError>;

    /// Run a server-side aggregation; `Average` over nothing is null.
    async fn run_aggregation(
        &self,
        query: &StructuredQuery,
        field: &AggregateField,
        cancel: &CancellationToken,
    ) -> Result<Value, StoreError>;
}
