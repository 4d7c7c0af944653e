//! Error types for [`X509Source`](crate::X509Source).

use crate::workload_api::error::WorkloadApiError;
use thiserror::Error;

/// Which resource limit an update exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    /// Too many SVIDs in a context.
    MaxSvids,
    /// Too many bundles in a bundle set.
    MaxBundles,
    /// A bundle's total DER size is too large.
    MaxBundleDerBytes,
}

/// Errors produced by [`X509Source`](crate::X509Source).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum X509SourceError {
    /// The source is closed or its cancellation token was cancelled; no
    /// further material will be served.
    #[error("x509 source is closed")]
    Closed,

    /// No SVID in the current context satisfies the selection rule.
    #[error("no suitable X.509 SVID available")]
    NoSuitableSvid,

    /// The Workload API stream ended before delivering a snapshot.
    #[error("workload API stream ended")]
    StreamEnded,

    /// An update exceeded a configured resource limit and was rejected.
    #[error("resource limit exceeded ({kind:?}): limit {limit}, actual {actual}")]
    ResourceLimitExceeded {
        /// The limit that was exceeded.
        kind: LimitKind,
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
