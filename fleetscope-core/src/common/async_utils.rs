//! Reusable async helpers for the collection pipeline.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::{FleetError, FleetResult};

/// Async timeout wrapper with a named operation in the error.
pub async fn with_timeout<F, T>(
    future: F,
    duration: Duration,
    operation_name: &str,
) -> FleetResult<T>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| FleetError::Timeout {
            operation: operation_name.to_string(),
            duration,
        })
}

/// Process a collection concurrently with bounded parallelism.
///
/// Results are returned in completion order, not input order.
pub async fn concurrent_map<T, F, R, Fut>(items: Vec<T>, max_concurrent: usize, f: F) -> Vec<R>
where
    F: Fn(T) -> Fut + Clone,
    Fut: Future<Output = R>,
{
    use futures::stream::{self, StreamExt};

    stream::iter(items)
        .map(f)
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await
}
