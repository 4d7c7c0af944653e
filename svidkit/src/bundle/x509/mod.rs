//! X.509 bundle types.

use crate::cert::error::CertificateError;
use crate::cert::parsing::split_certificates_unbounded;
use crate::cert::Certificate;
use crate::spiffe_id::TrustDomain;
use crate::BundleSource;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A collection of trusted X.509 authorities for a [`TrustDomain`].
///
/// Mutations take an internal writer lock; readers receive a snapshot that
/// stays valid across later mutations.
#[derive(Debug)]
pub struct X509Bundle {
    trust_domain: TrustDomain,
    authorities: RwLock<Vec<Certificate>>,
}

/// A set of [`X509Bundle`], keyed by [`TrustDomain`].
///
/// The set itself is a plain value; exclusive access for mutation comes from
/// `&mut`. Sources publish whole sets atomically behind an `Arc` swap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct X509BundleSet {
    bundles: HashMap<TrustDomain, Arc<X509Bundle>>,
}

/// An error that can arise parsing an [`X509Bundle`] from DER bytes.
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum X509BundleError {
    /// Error processing or validating the X.509 certificates in the bundle.
    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

impl X509Bundle {
    /// Creates an empty bundle for the given [`TrustDomain`].
    pub fn new(trust_domain: TrustDomain) -> Self {
        Self {
            trust_domain,
            authorities: RwLock::new(Vec::new()),
        }
    }

    /// Creates a bundle from a list of DER-encoded X.509 authorities.
    ///
    /// # Errors
    ///
    /// Returns an [`X509BundleError`] if any input is not a parseable
    /// DER-encoded certificate.
    pub fn from_x509_authorities(
        trust_domain: TrustDomain,
        authorities: &[&[u8]],
    ) -> Result<Self, X509BundleError> {
        let authorities = authorities
            .iter()
            .map(|der| Certificate::try_from(*der))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            trust_domain,
            authorities: RwLock::new(authorities),
        })
    }

    /// Parses a bundle from a concatenated list of DER-encoded certificates.
    ///
    /// # Errors
    ///
    /// Returns an [`X509BundleError`] if the input cannot be parsed.
    pub fn parse_from_der(
        trust_domain: TrustDomain,
        bundle_der: &[u8],
    ) -> Result<Self, X509BundleError> {
        let authorities = split_certificates_unbounded(bundle_der)?;

        Ok(Self {
            trust_domain,
            authorities: RwLock::new(authorities),
        })
    }

    /// Adds a DER-encoded X.509 authority to the bundle.
    ///
    /// Adding an authority that is already present (by DER equality) is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an [`X509BundleError`] if the bytes are not a parseable
    /// DER-encoded certificate.
    pub fn add_authority(&self, authority_der: &[u8]) -> Result<(), X509BundleError> {
        let certificate = Certificate::try_from(authority_der)?;
        let mut authorities = self.write_authorities();
        if !authorities.contains(&certificate) {
            authorities.push(certificate);
        }
        Ok(())
    }

    /// Removes the authority with the given DER encoding, if present.
    ///
    /// Removing an absent authority is a no-op.
    pub fn remove_authority(&self, authority_der: &[u8]) {
        self.write_authorities()
            .retain(|c| c.as_bytes() != authority_der);
    }

    /// Returns `true` if an authority with the given DER encoding is present.
    pub fn has_authority(&self, authority_der: &[u8]) -> bool {
        self.read_authorities()
            .iter()
            .any(|c| c.as_bytes() == authority_der)
    }

    /// Returns a snapshot of the X.509 authorities in the bundle.
    ///
    /// The snapshot is not affected by later mutations.
    pub fn authorities(&self) -> Vec<Certificate> {
        self.read_authorities().clone()
    }

    /// Returns the [`TrustDomain`] associated with the bundle.
    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    fn read_authorities(&self) -> RwLockReadGuard<'_, Vec<Certificate>> {
        self.authorities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_authorities(&self) -> RwLockWriteGuard<'_, Vec<Certificate>> {
        self.authorities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for X509Bundle {
    fn clone(&self) -> Self {
        Self {
            trust_domain: self.trust_domain.clone(),
            authorities: RwLock::new(self.authorities()),
        }
    }
}

impl PartialEq for X509Bundle {
    fn eq(&self, other: &Self) -> bool {
        self.trust_domain == other.trust_domain && *self.read_authorities() == other.authorities()
    }
}

impl Eq for X509Bundle {}

impl X509BundleSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a bundle, replacing any existing bundle for its trust domain.
    pub fn add_bundle(&mut self, bundle: X509Bundle) {
        let trust_domain = bundle.trust_domain().clone();
        self.bundles.insert(trust_domain, Arc::new(bundle));
    }

    /// Returns the bundle for the given trust domain, if any.
    pub fn get(&self, trust_domain: &TrustDomain) -> Option<Arc<X509Bundle>> {
        self.bundles.get(trust_domain).cloned()
    }

    /// Returns the number of bundles in the set.
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Returns `true` if the set holds no bundles.
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Iterates over the bundles in the set.
    pub fn iter(&self) -> impl Iterator<Item = (&TrustDomain, &Arc<X509Bundle>)> {
        self.bundles.iter()
    }
}

impl BundleSource for X509BundleSet {
    type Item = X509Bundle;
    type Error = Infallible;

    fn bundle_for_trust_domain(
        &self,
        trust_domain: &TrustDomain,
    ) -> Result<Option<Arc<Self::Item>>, Self::Error> {
        Ok(self.bundles.get(trust_domain).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cert_der() -> Vec<u8> {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(Vec::new())
            .unwrap()
            .self_signed(&key)
            .unwrap();
        cert.der().to_vec()
    }

    #[test]
    fn add_authority_is_idempotent() {
        let bundle = X509Bundle::new(TrustDomain::new("example.org").unwrap());
        let der = test_cert_der();

        bundle.add_authority(&der).unwrap();
        bundle.add_authority(&der).unwrap();

        assert_eq!(bundle.authorities().len(), 1);
        assert!(bundle.has_authority(&der));
    }

    #[test]
    fn remove_authority_is_idempotent() {
        let bundle = X509Bundle::new(TrustDomain::new("example.org").unwrap());
        let der = test_cert_der();

        bundle.add_authority(&der).unwrap();
        bundle.remove_authority(&der);
        bundle.remove_authority(&der);

        assert!(bundle.authorities().is_empty());
        assert!(!bundle.has_authority(&der));
    }

    #[test]
    fn snapshot_survives_mutation() {
        let bundle = X509Bundle::new(TrustDomain::new("example.org").unwrap());
        let der = test_cert_der();
        bundle.add_authority(&der).unwrap();

        let snapshot = bundle.authorities();
        bundle.remove_authority(&der);

        assert_eq!(snapshot.len(), 1);
        assert!(bundle.authorities().is_empty());
    }

    #[test]
    fn add_rejects_garbage() {
        let bundle = X509Bundle::new(TrustDomain::new("example.org").unwrap());
        assert!(bundle.add_authority(b"not a certificate").is_err());
    }

    #[test]
    fn set_replaces_bundle_for_same_trust_domain() {
        let td = TrustDomain::new("example.org").unwrap();
        let der = test_cert_der();

        let first = X509Bundle::new(td.clone());
        let second = X509Bundle::from_x509_authorities(td.clone(), &[&der]).unwrap();

        let mut set = X509BundleSet::new();
        set.add_bundle(first);
        set.add_bundle(second);

        assert_eq!(set.len(), 1);
        assert_eq!(set.get(&td).unwrap().authorities().len(), 1);
    }

    #[test]
    fn bundle_source_returns_none_for_unknown_domain() {
        let set = X509BundleSet::new();
        let td = TrustDomain::new("missing.test").unwrap();
        assert!(set.bundle_for_trust_domain(&td).unwrap().is_none());
    }
}
