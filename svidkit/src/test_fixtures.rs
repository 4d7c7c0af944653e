//! Test-only certificate fixtures minted with `rcgen`.

#![allow(clippy::unwrap_used)]

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, SanType,
};

/// A throwaway certificate authority for one trust domain.
pub(crate) struct TestCa {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl TestCa {
    pub(crate) fn new(trust_domain: &str) -> Self {
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
        Self { cert, key }
    }

    pub(crate) fn ca_der(&self) -> Vec<u8> {
        self.cert.der().to_vec()
    }

    /// Issues a leaf X.509-SVID for `spiffe_id`; returns (leaf DER, PKCS#8
    /// key DER).
    pub(crate) fn issue_svid(&self, spiffe_id: &str) -> (Vec<u8>, Vec<u8>) {
        let leaf_key = KeyPair::generate().unwrap();

        let mut params = CertificateParams::new(Vec::new()).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, spiffe_id.to_owned());
        params.distinguished_name = dn;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.subject_alt_names = vec![SanType::URI(
            rcgen::string::Ia5String::try_from(spiffe_id.to_owned()).unwrap(),
        )];

        let cert = params.signed_by(&leaf_key, &self.cert, &self.key).unwrap();
        (cert.der().to_vec(), leaf_key.serialize_der())
    }
}

/// Shortcut: a single-certificate SVID chain plus key for `spiffe_id`,
/// issued by a fresh CA.
pub(crate) fn svid_chain_and_key(spiffe_id: &str) -> (Vec<u8>, Vec<u8>) {
    let td = spiffe_id
        .strip_prefix("spiffe://")
        .and_then(|rest| rest.split('/').next())
        .unwrap();
    TestCa::new(td).issue_svid(spiffe_id)
}
