//! Object-safe source adapters and rustls material construction.

use crate::error::{Error, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::sync::Arc;
use svidkit::{BundleSource, SvidSource, TrustDomain, X509Bundle, X509Svid};

/// Object-safe view over any [`SvidSource`] yielding X.509 SVIDs.
///
/// Erases the source's associated error type so rustls plumbing can hold a
/// `dyn` reference.
pub(crate) trait DynSvidSource: Send + Sync {
    fn current_svid(&self) -> Result<Arc<X509Svid>>;
}

impl<S> DynSvidSource for S
where
    S: SvidSource<Item = X509Svid> + Send + Sync,
{
    fn current_svid(&self) -> Result<Arc<X509Svid>> {
        self.svid().map_err(|e| Error::NoSvid(e.to_string()))
    }
}

/// Object-safe view over any [`BundleSource`] yielding X.509 bundles.
pub(crate) trait DynBundleSource: Send + Sync {
    fn bundle_for(&self, trust_domain: &TrustDomain) -> Result<Option<Arc<X509Bundle>>>;
}

impl<B> DynBundleSource for B
where
    B: BundleSource<Item = X509Bundle> + Send + Sync,
{
    fn bundle_for(&self, trust_domain: &TrustDomain) -> Result<Option<Arc<X509Bundle>>> {
        self.bundle_for_trust_domain(trust_domain)
            .map_err(|e| Error::Internal(format!("bundle source: {e}")))
    }
}

/// Builds a rustls `CertifiedKey` from an SVID's chain and PKCS#8 key.
pub(crate) fn certified_key_from_svid(svid: &X509Svid) -> Result<Arc<rustls::sign::CertifiedKey>> {
    let cert_chain = chain_from_svid(svid);

    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        svid.private_key().as_bytes().to_vec(),
    ));

    let provider =
        rustls::crypto::CryptoProvider::get_default().ok_or(Error::NoCryptoProvider)?;

    let signing_key = provider
        .key_provider
        .load_private_key(key_der)
        .map_err(|e| Error::CertifiedKey(format!("{e:?}")))?;

    Ok(Arc::new(rustls::sign::CertifiedKey::new(
        cert_chain,
        signing_key,
    )))
}

/// Returns the SVID chain as owned rustls certificates, leaf first.
pub(crate) fn chain_from_svid(svid: &X509Svid) -> Vec<CertificateDer<'static>> {
    svid.cert_chain()
        .iter()
        .map(|c| CertificateDer::from(c.as_bytes().to_vec()))
        .collect()
}

/// The verified-chain view handed to authorizers: the presented chain in
/// crate-level certificate types.
pub(crate) fn presented_chain(
    leaf: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
) -> Vec<svidkit::cert::Certificate> {
    std::iter::once(leaf.as_ref())
        .chain(intermediates.iter().map(|c| c.as_ref()))
        .filter_map(|der: &[u8]| svidkit::cert::Certificate::try_from(der).ok())
        .collect()
}
