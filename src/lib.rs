pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod include;
pub mod materializer;
pub mod shaper;
pub mod store;

pub use cancel::{CancelExt, CancellationToken};
pub use config::{DqlConfig, ExecutionConfig};
pub use engine::{CompiledQuery, QueryEngine, QueryExplain, QueryOutput};
pub use error::{DqlError, DqlResult, StoreError};
pub use executor::{ExecutionPlan, Fetched, QueryExecutor};
pub use include::IncludeLoader;
pub use materializer::{Collection, IdentityMap, Instance, InstanceRef, MaterializedValue, Materializer, PlanCache};
pub use shaper::{ShapedContent, ShapedItem, ShapedValue, Shaper};
pub use store::{DocumentStore, InMemoryStore, RawDocument, StructuredQuery};

pub use docql_core;
pub use docql_core::{Parameters, QueryError, QueryResult};
