#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # svidkit-rustls
//!
//! SPIFFE mTLS for [`rustls`], backed by [`svidkit`] sources.
//!
//! The crate produces `rustls::ClientConfig` / `rustls::ServerConfig` values
//! whose certificate resolution and peer verification are wired to SPIFFE
//! semantics: the workload's current X.509-SVID is presented per handshake
//! (rotation is picked up automatically), and peers are verified against
//! per-trust-domain bundles and authorized by SPIFFE ID instead of DNS name.
//!
//! Start from the presets in [`config`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use svidkit::X509Source;
//! use svidkit_rustls::{authorizer, mtls_client_config, Trace};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Arc::new(X509Source::new().await?);
//!
//! let config = mtls_client_config(
//!     source.clone(),
//!     source,
//!     authorizer::authorize_member_of("example.org".try_into()?),
//!     Trace::default(),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! Exactly **one** rustls crypto provider must be enabled:
//!
//! * `ring` (default)
//! * `aws-lc-rs`
//!
//! `federation` enables HTTPS bundle fetching from federated trust domains.

#[cfg(all(feature = "ring", feature = "aws-lc-rs"))]
compile_error!("Enable only one crypto provider feature: `ring` or `aws-lc-rs`.");

#[cfg(not(any(feature = "ring", feature = "aws-lc-rs")))]
compile_error!("Enable one crypto provider feature: `ring` (default) or `aws-lc-rs`.");

pub mod authorizer;
pub mod config;
pub mod verify;

#[cfg(feature = "federation")]
pub mod federation;

mod crypto;
mod error;
mod material;
mod observability;
mod prelude;
mod resolve;
mod trace;
mod verifier;

#[cfg(test)]
pub(crate) mod test_support;

pub use authorizer::{Authorizer, AuthorizerError};
pub use config::{
    hook_mtls_client_config, hook_mtls_server_config, hook_mtls_web_client_config,
    hook_mtls_web_server_config, hook_tls_client_config, hook_tls_server_config,
    mtls_client_config, mtls_server_config, mtls_web_client_config, mtls_web_server_config,
    tls_client_config, tls_server_config,
};
pub use error::{Error, Result};
pub use trace::{GetCertificateInfo, GotCertificateInfo, Trace, TraceValue};
pub use verify::{verify_peer_chain, BundleLookupError, PeerRole, VerifiedPeer, VerifyError};

pub use svidkit::{SpiffeId, TrustDomain};
