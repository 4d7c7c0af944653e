#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! SPIFFE identity plane for Rust workloads.
//!
//! This crate lets a workload fetch and continuously refresh its
//! cryptographic identity (X.509-SVIDs and JWT-SVIDs) and the trust bundles
//! it needs to authenticate peers, via the
//! [SPIFFE Workload API](https://github.com/spiffe/spiffe/blob/main/standards/SPIFFE_Workload_API.md).
//!
//! For X.509-based workloads the primary entry point is [`X509Source`]
//! (requires the `workload-api` feature): it keeps a cached, always-current
//! view of the workload's SVIDs and bundles and notifies subscribers on
//! rotation.
//!
//! ## X.509 (recommended)
//!
//! ```no_run
//! # #[cfg(feature = "workload-api")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! use svidkit::{TrustDomain, X509Source};
//! use svidkit::bundle::BundleSource;
//!
//! // Connect to the Workload API using SPIFFE_ENDPOINT_SOCKET.
//! let source = X509Source::new().await?;
//!
//! // Current default SVID.
//! let svid = source.svid()?;
//! let _chain = svid.cert_chain();
//! let _key = svid.private_key();
//!
//! // Trust bundle by trust domain.
//! let td = TrustDomain::new("example.org")?;
//! let _bundle = source
//!     .bundle_for_trust_domain(&td)?
//!     .ok_or("missing bundle")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## JWT SVIDs
//!
//! ```no_run
//! # #[cfg(feature = "workload-api")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! use svidkit::JwtSource;
//!
//! let source = JwtSource::new().await?;
//! let jwt_svid = source.jwt_svid(["service-a"], None).await?;
//! let _claims = jwt_svid.claims();
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod cert;
pub mod constants;
pub mod endpoint;
pub mod spiffe_id;
pub mod svid;

mod observability;
mod prelude;

#[cfg(test)]
pub(crate) mod test_fixtures;

#[cfg(feature = "transport")]
pub mod transport;

#[cfg(feature = "workload-api")]
pub mod jwt_source;
#[cfg(feature = "workload-api")]
pub mod workload_api;
#[cfg(feature = "workload-api")]
pub mod x509_source;

// Core identifiers
pub use crate::spiffe_id::{SpiffeId, SpiffeIdError, TrustDomain};

// SVIDs
pub use crate::svid::jwt::{JwtSvid, JwtSvidError};
pub use crate::svid::x509::{X509Svid, X509SvidError};
pub use crate::svid::SvidSource;

// Bundles
pub use crate::bundle::document::{BundleDocument, BundleDocumentError};
pub use crate::bundle::jwt::{JwtBundle, JwtBundleError, JwtBundleSet};
pub use crate::bundle::x509::{X509Bundle, X509BundleError, X509BundleSet};
pub use crate::bundle::BundleSource;

// Workload API high-level surfaces
#[cfg(feature = "workload-api")]
pub use crate::jwt_source::{JwtSource, JwtSourceBuilder, JwtSourceError, JwtSourceUpdates};
#[cfg(feature = "workload-api")]
pub use crate::workload_api::{WorkloadApiClient, WorkloadApiError, X509Context};
#[cfg(feature = "workload-api")]
pub use crate::x509_source::{
    ReconnectConfig, ResourceLimits, X509Source, X509SourceBuilder, X509SourceError,
    X509SourceUpdates,
};

pub use crate::endpoint::{Endpoint, EndpointError};
