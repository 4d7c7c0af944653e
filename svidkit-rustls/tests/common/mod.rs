//! Shared test helpers: a throwaway SPIFFE CA and static sources.

#![allow(dead_code, clippy::unwrap_used)]

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use std::convert::Infallible;
use std::sync::Arc;
use svidkit::{BundleSource, SvidSource, TrustDomain, X509Bundle, X509BundleSet, X509Svid};

/// A throwaway certificate authority for one trust domain.
pub struct TestCa {
    trust_domain: String,
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl TestCa {
    pub fn new(trust_domain: &str) -> Self {
        let key = KeyPair::generate().unwrap();

        let mut params = CertificateParams::new(Vec::new()).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, format!("test CA - {trust_domain}"));
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params.subject_alt_names = vec![SanType::URI(
            rcgen::string::Ia5String::try_from(format!("spiffe://{trust_domain}")).unwrap(),
        )];

        let cert = params.self_signed(&key).unwrap();
        Self {
            trust_domain: trust_domain.to_owned(),
            cert,
            key,
        }
    }

    pub fn ca_der(&self) -> Vec<u8> {
        self.cert.der().to_vec()
    }

    /// The CA's bundle set, holding its own trust domain only.
    pub fn bundle_set(&self) -> X509BundleSet {
        let td = TrustDomain::new(&self.trust_domain).unwrap();
        let bundle = X509Bundle::parse_from_der(td, &self.ca_der()).unwrap();
        let mut set = X509BundleSet::new();
        set.add_bundle(bundle);
        set
    }

    /// Issues an X.509-SVID for `spiffe_id`.
    pub fn issue_svid(&self, spiffe_id: &str) -> X509Svid {
        let leaf_key = KeyPair::generate().unwrap();

        let mut params = CertificateParams::new(Vec::new()).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, spiffe_id.to_owned());
        params.distinguished_name = dn;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.subject_alt_names = vec![SanType::URI(
            rcgen::string::Ia5String::try_from(spiffe_id.to_owned()).unwrap(),
        )];

        let cert = params.signed_by(&leaf_key, &self.cert, &self.key).unwrap();
        X509Svid::parse_from_der(cert.der(), &leaf_key.serialize_der()).unwrap()
    }

    /// Issues a plain web certificate (DNS SAN, no SPIFFE ID); returns
    /// (chain DER, PKCS#8 key DER).
    pub fn issue_web_cert(&self, dns_name: &str) -> (Vec<u8>, Vec<u8>) {
        let leaf_key = KeyPair::generate().unwrap();

        let mut params = CertificateParams::new(vec![dns_name.to_owned()]).unwrap();
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];

        let cert = params.signed_by(&leaf_key, &self.cert, &self.key).unwrap();
        (cert.der().to_vec(), leaf_key.serialize_der())
    }
}

/// An [`SvidSource`] serving one fixed SVID.
#[derive(Debug)]
pub struct StaticSvidSource(pub Arc<X509Svid>);

impl StaticSvidSource {
    pub fn new(svid: X509Svid) -> Arc<Self> {
        Arc::new(Self(Arc::new(svid)))
    }
}

impl SvidSource for StaticSvidSource {
    type Item = X509Svid;
    type Error = Infallible;

    fn svid(&self) -> Result<Arc<Self::Item>, Self::Error> {
        Ok(Arc::clone(&self.0))
    }
}

/// A [`BundleSource`] serving one fixed bundle set.
#[derive(Debug)]
pub struct StaticBundleSource(pub X509BundleSet);

impl StaticBundleSource {
    pub fn new(set: X509BundleSet) -> Arc<Self> {
        Arc::new(Self(set))
    }
}

impl BundleSource for StaticBundleSource {
    type Item = X509Bundle;
    type Error = Infallible;

    fn bundle_for_trust_domain(
        &self,
        trust_domain: &TrustDomain,
    ) -> Result<Option<Arc<Self::Item>>, Self::Error> {
        self.0.bundle_for_trust_domain(trust_domain)
    }
}
