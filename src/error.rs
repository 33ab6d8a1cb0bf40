use docql_core::QueryError;
use thiserror::Error;

/// Failure reported by the wire client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query rejected by store: {0}")]
    Rejected(String),

    #[error("Invalid document path: {0}")]
    InvalidPath(String),
}

#[derive(Error, Debug)]
pub enum DqlError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Sequence contains no elements")]
    EmptySequence,

    #[error("Sequence contains more than one element")]
    MoreThanOneElement,

    #[error("Document '{0}' not found")]
    NotFound(String),

    #[error("Materialization error: {0}")]
    Materialization(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Query execution cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DqlResult<T> = Result<T, DqlError>;

impl DqlError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DqlError::Cancelled)
    }

    pub(crate) fn materialization(message: impl Into<String>) -> Self {
        DqlError::Materialization(message.into())
    }
}

impl serde::Serialize for DqlError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
