//! Transport error types.

use thiserror::Error;

/// Errors produced by the gRPC transport layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The endpoint transport is not supported on this platform.
    #[error("endpoint transport {scheme:?} is not supported on this platform")]
    UnsupportedEndpointTransport {
        /// URI scheme of the unsupported transport.
        scheme: &'static str,
    },

    /// Error returned by the gRPC transport library.
    #[error(transparent)]
    Tonic(#[from] tonic::transport::Error),

    /// A gRPC status returned while establishing or using a stream.
    #[error(transparent)]
    Status(#[from] tonic::Status),
}
