//! Error types for [`JwtSource`](crate::JwtSource).

use crate::workload_api::error::WorkloadApiError;
use thiserror::Error;

/// Errors produced by [`JwtSource`](crate::JwtSource).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JwtSourceError {
    /// The source is closed or its cancellation token was cancelled.
    #[error("jwt source is closed")]
    Closed,

    /// The Workload API stream ended before delivering a snapshot.
    #[error("workload API stream ended")]
    StreamEnded,

    /// An update exceeded the configured bundle-count limit and was
    /// rejected.
    #[error("too many JWT bundles in update: limit {limit}, actual {actual}")]
    TooManyBundles {
        /// Configured limit value.
        limit: usize,
        /// Observed value.
        actual: usize,
    },

    /// Graceful shutdown did not finish within the configured timeout.
    #[error("shutdown timed out; supervisor task aborted")]
    ShutdownTimeout,

    /// An error from the underlying Workload API client.
    #[error(transparent)]
    Source(#[from] WorkloadApiError),
}
