//! X.509-SVID and JWT-SVID types.

use std::error::Error;
use std::sync::Arc;

pub mod jwt;
pub mod x509;

/// A source of SVIDs.
///
/// Returns `Arc`s so implementations can cache and rotate material without
/// cloning it per read or exposing borrow lifetimes.
pub trait SvidSource {
    /// The type of the SVIDs provided by the source.
    type Item: Send + Sync + 'static;

    /// The error type returned by the source.
    type Error: Error + Send + Sync + 'static;

    /// Returns the current SVID.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` if no SVID is currently available.
    fn svid(&self) -> Result<Arc<Self::Item>, Self::Error>;
}
