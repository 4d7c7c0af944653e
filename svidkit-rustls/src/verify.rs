//! SPIFFE X.509 chain verification.
//!
//! This differs from stock Web PKI verification: trust anchors come from the
//! bundle of the *peer's* trust domain (derived from the leaf's URI SAN),
//! no DNS name matching is performed, and an [`Authorizer`] runs after the
//! chain validates.

use crate::authorizer::{Authorizer, AuthorizerError};
use crate::material::DynBundleSource;
use rustls::pki_types::{CertificateDer, UnixTime};
use std::time::Duration;
use svidkit::cert::Certificate;
use svidkit::{SpiffeId, TrustDomain};
use webpki::KeyUsage;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Failure looking up the peer's trust bundle.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BundleLookupError {
    /// The bundle source holds no bundle for the peer's trust domain.
    #[error("no X.509 bundle found for trust domain: {0:?}")]
    NotFound(String),

    /// The bundle source itself failed.
    #[error("bundle source error: {0}")]
    Source(String),
}

/// Errors produced by [`verify_chain`]. Each variant is a distinguishable
/// failure class; the message prefix is stable.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum VerifyError {
    /// The presented chain could not be parsed or carries no usable SPIFFE
    /// ID.
    #[error("could not parse certificate chain: {0}")]
    Parse(String),

    /// The peer's trust bundle could not be retrieved.
    #[error("could not get X509 bundle: {0}")]
    Bundle(#[from] BundleLookupError),

    /// No chain validated against the bundle's authorities.
    #[error("could not verify leaf certificate: {0}")]
    Chain(String),

    /// The authorizer rejected the peer; carries the authorizer's message
    /// verbatim.
    #[error(transparent)]
    Unauthorized(#[from] AuthorizerError),
}

/// Outcome of a successful verification: the peer's SPIFFE ID and the
/// verified chains.
#[derive(Debug)]
pub struct VerifiedPeer {
    /// SPIFFE ID from the leaf's URI SAN.
    pub spiffe_id: SpiffeId,
    /// Chains that validated, outer-first.
    pub chains: Vec<Vec<Certificate>>,
}

/// Which TLS role the peer played; selects the extended key usage accepted
/// on the leaf (absent EKU always passes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// The peer is a TLS client.
    Client,
    /// The peer is a TLS server.
    Server,
}

impl PeerRole {
    fn key_usage(self) -> KeyUsage {
        match self {
            Self::Client => KeyUsage::client_auth(),
            Self::Server => KeyUsage::server_auth(),
        }
    }
}

/// Verifies a raw DER chain (leaf first, as received from a handshake)
/// under SPIFFE rules and runs `authorizer` on the result.
///
/// When `time` is `None` the leaf's `NotBefore` is used as the verification
/// time.
///
/// # Errors
///
/// Returns a [`VerifyError`] naming the failure class: parse failure, bundle
/// lookup failure, chain validation failure, or authorizer rejection.
pub fn verify_peer_chain<B, D>(
    raw_chain: &[D],
    bundles: &B,
    authorizer: &dyn Authorizer,
    time: Option<UnixTime>,
    role: PeerRole,
) -> Result<VerifiedPeer, VerifyError>
where
    B: svidkit::BundleSource<Item = svidkit::X509Bundle> + Send + Sync,
    D: AsRef<[u8]>,
{
    let Some((leaf, intermediates)) = raw_chain.split_first() else {
        return Err(VerifyError::Parse("empty certificate chain".into()));
    };

    let leaf = CertificateDer::from(leaf.as_ref().to_vec());
    let intermediates: Vec<CertificateDer<'_>> = intermediates
        .iter()
        .map(|der| CertificateDer::from(der.as_ref().to_vec()))
        .collect();

    verify_chain(
        &leaf,
        &intermediates,
        bundles,
        authorizer,
        time,
        role.key_usage(),
    )
}

/// Verifies a raw DER chain under SPIFFE rules against `bundles`, then runs
/// `authorizer` on the result.
///
/// When `time` is `None` the leaf's `NotBefore` is used as the verification
/// time.
///
/// # Errors
///
/// Returns a [`VerifyError`] naming the failure class: parse failure, bundle
/// lookup failure, chain validation failure, or authorizer rejection.
pub(crate) fn verify_chain(
    leaf: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
    bundles: &dyn DynBundleSource,
    authorizer: &dyn Authorizer,
    time: Option<UnixTime>,
    usage: KeyUsage,
) -> Result<VerifiedPeer, VerifyError> {
    let spiffe_id = svidkit::cert::spiffe_id_from_der(leaf.as_ref())
        .map_err(|e| VerifyError::Parse(e.to_string()))?;

    let bundle = lookup_bundle(bundles, spiffe_id.trust_domain())?;

    let authority_ders: Vec<CertificateDer<'static>> = bundle
        .authorities()
        .iter()
        .map(|c| CertificateDer::from(c.as_bytes().to_vec()))
        .collect();

    let anchors: Vec<rustls::pki_types::TrustAnchor<'_>> = authority_ders
        .iter()
        .filter_map(|der| webpki::anchor_from_trusted_cert(der).ok())
        .collect();
    if anchors.is_empty() {
        return Err(VerifyError::Chain(
            "trust bundle contains no usable authorities".into(),
        ));
    }

    let end_entity = webpki::EndEntityCert::try_from(leaf)
        .map_err(|e| VerifyError::Parse(e.to_string()))?;

    let time = match time {
        Some(t) => t,
        None => leaf_not_before(leaf)?,
    };

    let algorithms = rustls::crypto::CryptoProvider::get_default()
        .ok_or_else(|| VerifyError::Chain("no process-default crypto provider".into()))?
        .signature_verification_algorithms;

    end_entity
        .verify_for_usage(
            algorithms.all,
            &anchors,
            intermediates,
            time,
            usage,
            None,
            None,
        )
        .map_err(|e| VerifyError::Chain(e.to_string()))?;

    let chains = vec![crate::material::presented_chain(leaf, intermediates)];
    authorizer.authorize(&spiffe_id, &chains)?;

    Ok(VerifiedPeer { spiffe_id, chains })
}

fn lookup_bundle(
    bundles: &dyn DynBundleSource,
    trust_domain: &TrustDomain,
) -> Result<std::sync::Arc<svidkit::X509Bundle>, BundleLookupError> {
    bundles
        .bundle_for(trust_domain)
        .map_err(|e| BundleLookupError::Source(e.to_string()))?
        .ok_or_else(|| BundleLookupError::NotFound(trust_domain.to_string()))
}

/// Reads the leaf's `NotBefore` as the default verification time.
fn leaf_not_before(leaf: &CertificateDer<'_>) -> Result<UnixTime, VerifyError> {
    let (_, cert) = X509Certificate::from_der(leaf.as_ref())
        .map_err(|e| VerifyError::Parse(format!("{e:?}")))?;
    let not_before = cert.validity().not_before.timestamp();
    let not_before = u64::try_from(not_before)
        .map_err(|_| VerifyError::Parse("leaf NotBefore predates the epoch".into()))?;
    Ok(UnixTime::since_unix_epoch(Duration::from_secs(not_before)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorizer::{authorize_any, authorize_member_of};
    use crate::test_support::TestCa;
    use svidkit::{TrustDomain, X509Bundle, X509BundleSet};

    fn ensure_provider() {
        crate::crypto::ensure_crypto_provider_installed();
    }

    fn bundle_set_for(ca: &TestCa, trust_domain: &str) -> X509BundleSet {
        let td = TrustDomain::new(trust_domain).unwrap();
        let bundle = X509Bundle::parse_from_der(td, &ca.ca_der()).unwrap();
        let mut set = X509BundleSet::new();
        set.add_bundle(bundle);
        set
    }

    #[test]
    fn verify_accepts_chain_anchored_in_bundle() {
        ensure_provider();

        let ca = TestCa::new("domain1.test");
        let (leaf_der, _) = ca.issue_svid("spiffe://domain1.test/host");
        let set = bundle_set_for(&ca, "domain1.test");

        let leaf = CertificateDer::from(leaf_der);
        let peer = verify_chain(
            &leaf,
            &[],
            &set,
            &authorize_any(),
            None,
            KeyUsage::server_auth(),
        )
        .unwrap();

        assert_eq!(peer.spiffe_id.to_string(), "spiffe://domain1.test/host");
        assert_eq!(peer.chains.len(), 1);
    }

    #[test]
    fn verify_fails_without_bundle_for_peer_trust_domain() {
        ensure_provider();

        let ca1 = TestCa::new("domain1.test");
        let ca2 = TestCa::new("domain2.test");
        let (leaf_der, _) = ca1.issue_svid("spiffe://domain1.test/host");
        // Bundle set only covers domain2.test.
        let set = bundle_set_for(&ca2, "domain2.test");

        let leaf = CertificateDer::from(leaf_der);
        let err = verify_chain(
            &leaf,
            &[],
            &set,
            &authorize_any(),
            None,
            KeyUsage::server_auth(),
        )
        .unwrap_err();

        assert!(matches!(err, VerifyError::Bundle(_)));
        assert_eq!(
            err.to_string(),
            "could not get X509 bundle: no X.509 bundle found for trust domain: \"domain1.test\""
        );
    }

    #[test]
    fn verify_fails_for_unknown_authority() {
        ensure_provider();

        let ca = TestCa::new("domain1.test");
        let other_ca = TestCa::new("domain1.test");
        let (leaf_der, _) = ca.issue_svid("spiffe://domain1.test/host");
        // Same trust domain name, different CA key.
        let set = bundle_set_for(&other_ca, "domain1.test");

        let leaf = CertificateDer::from(leaf_der);
        let err = verify_chain(
            &leaf,
            &[],
            &set,
            &authorize_any(),
            None,
            KeyUsage::server_auth(),
        )
        .unwrap_err();

        assert!(matches!(err, VerifyError::Chain(_)));
        assert!(err
            .to_string()
            .starts_with("could not verify leaf certificate: "));
    }

    #[test]
    fn verify_surfaces_authorizer_rejection_verbatim() {
        ensure_provider();

        let ca = TestCa::new("domain1.test");
        let (leaf_der, _) = ca.issue_svid("spiffe://domain1.test/host");
        let set = bundle_set_for(&ca, "domain1.test");

        let leaf = CertificateDer::from(leaf_der);
        let err = verify_chain(
            &leaf,
            &[],
            &set,
            &authorize_member_of(TrustDomain::new("domain2.test").unwrap()),
            None,
            KeyUsage::server_auth(),
        )
        .unwrap_err();

        assert_eq!(err.to_string(), "unexpected trust domain \"domain1.test\"");
    }

    #[test]
    fn verify_uses_leaf_not_before_when_no_time_supplied() {
        ensure_provider();

        // The fixture leaf is valid from "now"; verification with no
        // explicit time must anchor at NotBefore and therefore succeed even
        // if the clock were skewed.
        let ca = TestCa::new("domain1.test");
        let (leaf_der, _) = ca.issue_svid("spiffe://domain1.test/host");
        let set = bundle_set_for(&ca, "domain1.test");

        let leaf = CertificateDer::from(leaf_der);
        assert!(verify_chain(
            &leaf,
            &[],
            &set,
            &authorize_any(),
            None,
            KeyUsage::client_auth(),
        )
        .is_ok());
    }

    #[test]
    fn verify_rejects_leaf_without_spiffe_id() {
        ensure_provider();

        let ca = TestCa::new("domain1.test");
        let leaf = CertificateDer::from(ca.issue_plain_cert("example.org"));
        let set = bundle_set_for(&ca, "domain1.test");

        let err = verify_chain(
            &leaf,
            &[],
            &set,
            &authorize_any(),
            None,
            KeyUsage::server_auth(),
        )
        .unwrap_err();

        assert!(matches!(err, VerifyError::Parse(_)));
    }
}
