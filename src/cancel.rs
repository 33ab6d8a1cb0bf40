//! Cooperative cancellation for query executions.
//!
//! One `CancellationToken` is shared by every wire call of an execution;
//! `CancelExt` adds the fail-fast check and the call guard on top of it.

use std::future::Future;

use crate::error::{DqlError, DqlResult, StoreError};

pub use tokio_util::sync::CancellationToken;

pub trait CancelExt {
    /// Fail fast when already cancelled
    fn check(&self) -> DqlResult<()>;

    /// Run a wire call, abandoning it when the token fires.
    fn guard<T, F>(&self, call: F) -> impl Future<Output = DqlResult<T>> + Send
    where
        F: Future<Output = Result<T, StoreError>> + Send,
        T: Send;
}

impl CancelExt for CancellationToken {
    fn check(&self) -> DqlResult<()> {
        if self.is_cancelled() {
            Err(DqlError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn guard<T, F>(&self, call: F) -> impl Future<Output = DqlResult<T>> + Send
    where
        F: Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        async move {
            self.check()?;
            tokio::select! {
                biased;
                _ = self.cancelled() => Err(DqlError::Cancelled),
                result = call => result.map_err(DqlError::from),
            }
        }
    }
}
