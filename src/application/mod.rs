//! Application layer: the broker client, the transaction processor and the worker
//! pool that ties them together. Every dependency is handed in explicitly, so
//! several isolated ledgers can run side by side.

pub mod broker;
pub mod processor;
pub mod worker;

use crate::error::{LedgerError, Result};
use std::future::Future;
use std::time::Duration;

/// Bounds an I/O call so that a hung store or queue surfaces as a transient error.
pub(crate) async fn with_timeout<T, F>(
    limit: Duration,
    operation: &'static str,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| LedgerError::Timeout(operation))?
}
