//! Trust bundle types: X.509 anchors, JWT authorities, and the combined
//! SPIFFE bundle document.

use crate::spiffe_id::TrustDomain;
use std::error::Error;
use std::sync::Arc;

pub mod document;
pub mod jwt;
pub mod x509;

/// A source of bundles queryable by [`TrustDomain`].
pub trait BundleSource {
    /// The bundle type provided by the source.
    type Item: Send + Sync + 'static;

    /// The error type returned by the source.
    type Error: Error + Send + Sync + 'static;

    /// Returns the bundle associated with the given [`TrustDomain`], or
    /// `Ok(None)` if the source holds no bundle for it.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` if the source itself is unavailable.
    fn bundle_for_trust_domain(
        &self,
        trust_domain: &TrustDomain,
    ) -> Result<Option<Arc<Self::Item>>, Self::Error>;
}
