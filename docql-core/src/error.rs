//! Error types for docql-core.
//!
//! Translation and resolution errors only; no storage or I/O failures live here.

use thiserror::Error;

use crate::ast::FilterOperator;

/// Query compilation error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error(
        "Operator {operator} on '{field}' accepts at most {limit} values, got {count}"
    )]
    CardinalityExceeded {
        field: String,
        operator: FilterOperator,
        count: usize,
        limit: usize,
    },

    #[error(
        "Cannot filter '{0}' against null: the property does not persist null values"
    )]
    NullFilterUnsupported(String),

    #[error("Missing query parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Invalid include '{path}': {reason}")]
    InvalidInclude { path: String, reason: String },
}

/// Result type for query compilation
pub type QueryResult<T> = Result<T, QueryError>;

impl QueryError {
    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        QueryError::UnsupportedQuery(message.into())
    }
}

impl serde::Serialize for QueryError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
