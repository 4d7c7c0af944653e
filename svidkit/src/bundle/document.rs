//! The SPIFFE bundle document: a JWKS-shaped JSON body carrying X.509
//! anchors (`use = "x509-svid"`, certificate in `x5c`) and JWT authorities
//! (`use = "jwt-svid"`), plus the optional `spiffe_sequence` and
//! `spiffe_refresh_hint` fields.
//!
//! This is the format served to federated peers and consumed by the
//! federation fetcher.

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use jsonwebtoken::jwk::Jwk;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use x509_parser::public_key::PublicKey;

use crate::bundle::jwt::JwtBundle;
use crate::bundle::x509::X509Bundle;
use crate::cert::error::CertificateError;
use crate::cert::parsing::parse_der_certificate;
use crate::cert::Certificate;
use crate::spiffe_id::TrustDomain;

const USE_X509_SVID: &str = "x509-svid";
const USE_JWT_SVID: &str = "jwt-svid";

/// A parsed SPIFFE bundle document for one trust domain.
///
/// `parse(serialize(doc))` reproduces the document: trust domain, sequence,
/// refresh hint, X.509 authorities (by DER) and JWT authorities (by key ID)
/// all round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleDocument {
    trust_domain: TrustDomain,
    sequence: Option<u64>,
    refresh_hint: Option<Duration>,
    x509_authorities: Vec<Certificate>,
    jwt_authorities: HashMap<String, Jwk>,
}

/// Errors arising from parsing or serializing a [`BundleDocument`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BundleDocumentError {
    /// The document is not valid JSON of the expected shape.
    #[error("cannot deserialize bundle document")]
    Json(#[source] serde_json::Error),

    /// A `jwt-svid` entry has no `kid`.
    #[error("missing key ID in jwt-svid entry")]
    MissingKeyId,

    /// An `x509-svid` entry must carry exactly one `x5c` certificate.
    #[error("x509-svid entry must have exactly one x5c certificate")]
    InvalidX5c,

    /// An `x5c` value is not valid base64.
    #[error("invalid base64 in x5c entry")]
    Base64(#[from] base64::DecodeError),

    /// An `x5c` certificate is not parseable DER.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// A key entry declares a `use` this library does not understand.
    #[error("unsupported key use: {0:?}")]
    UnsupportedKeyUse(String),

    /// A `jwt-svid` entry is not a usable JWK.
    #[error("invalid JWK in jwt-svid entry")]
    InvalidJwk(#[source] serde_json::Error),

    /// An X.509 authority's public key cannot be expressed as a JWK.
    #[error("unsupported public key type in X.509 authority: {0}")]
    UnsupportedKeyType(String),

    /// Serialization failed.
    #[error("cannot serialize bundle document")]
    Serialize(#[source] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct RawDocument {
    #[serde(default)]
    keys: Vec<Map<String, Value>>,
    #[serde(rename = "spiffe_sequence", skip_serializing_if = "Option::is_none")]
    sequence: Option<u64>,
    #[serde(rename = "spiffe_refresh_hint", skip_serializing_if = "Option::is_none")]
    refresh_hint: Option<u64>,
}

impl BundleDocument {
    /// Creates an empty document for the given trust domain.
    pub fn new(trust_domain: TrustDomain) -> Self {
        Self {
            trust_domain,
            sequence: None,
            refresh_hint: None,
            x509_authorities: Vec::new(),
            jwt_authorities: HashMap::new(),
        }
    }

    /// Parses a bundle document from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`BundleDocumentError`] if the JSON is malformed or a key
    /// entry is invalid for its declared `use`.
    pub fn parse(trust_domain: TrustDomain, bytes: &[u8]) -> Result<Self, BundleDocumentError> {
        let raw: RawDocument = serde_json::from_slice(bytes).map_err(BundleDocumentError::Json)?;

        let mut doc = Self::new(trust_domain);
        doc.sequence = raw.sequence;
        doc.refresh_hint = raw.refresh_hint.map(Duration::from_secs);

        for entry in raw.keys {
            let declared_use = entry.get("use").and_then(Value::as_str);
            let has_x5c = entry.contains_key("x5c");

            match declared_use {
                Some(USE_X509_SVID) => doc.push_x509_entry(&entry)?,
                Some(USE_JWT_SVID) => doc.push_jwt_entry(entry)?,
                // No use tag: fall back on the presence of certificate material.
                None if has_x5c => doc.push_x509_entry(&entry)?,
                None => doc.push_jwt_entry(entry)?,
                Some(other) => {
                    return Err(BundleDocumentError::UnsupportedKeyUse(other.to_owned()))
                }
            }
        }

        Ok(doc)
    }

    /// Serializes the document to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`BundleDocumentError`] if an X.509 authority carries a key
    /// type that cannot be expressed as a JWK, or JSON encoding fails.
    pub fn serialize(&self) -> Result<Vec<u8>, BundleDocumentError> {
        let mut keys = Vec::with_capacity(self.x509_authorities.len() + self.jwt_authorities.len());

        for cert in &self.x509_authorities {
            let mut entry = jwk_params_for_certificate(cert)?;
            entry.insert("use".into(), Value::String(USE_X509_SVID.into()));
            entry.insert(
                "x5c".into(),
                Value::Array(vec![Value::String(STANDARD.encode(cert.as_bytes()))]),
            );
            keys.push(entry);
        }

        // Deterministic output: order JWT authorities by key ID.
        let mut kids: Vec<&String> = self.jwt_authorities.keys().collect();
        kids.sort();
        for kid in kids {
            let jwk = &self.jwt_authorities[kid];
            let value = serde_json::to_value(jwk).map_err(BundleDocumentError::Serialize)?;
            let Value::Object(mut entry) = value else {
                return Err(BundleDocumentError::MissingKeyId);
            };
            entry.insert("use".into(), Value::String(USE_JWT_SVID.into()));
            keys.push(entry);
        }

        let raw = RawDocument {
            keys,
            sequence: self.sequence,
            refresh_hint: self.refresh_hint.map(|d| d.as_secs()),
        };

        serde_json::to_vec(&raw).map_err(BundleDocumentError::Serialize)
    }

    /// Returns the trust domain the document belongs to.
    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// Returns the `spiffe_sequence` value, if present.
    ///
    /// Sequence numbers are informational; non-monotonic values are accepted.
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// Sets the `spiffe_sequence` value.
    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = Some(sequence);
    }

    /// Returns the `spiffe_refresh_hint` value, if present.
    pub fn refresh_hint(&self) -> Option<Duration> {
        self.refresh_hint
    }

    /// Sets the `spiffe_refresh_hint` value. Sub-second precision is dropped
    /// by serialization.
    pub fn set_refresh_hint(&mut self, refresh_hint: Duration) {
        self.refresh_hint = Some(refresh_hint);
    }

    /// Returns the X.509 authorities carried by the document.
    pub fn x509_authorities(&self) -> &[Certificate] {
        &self.x509_authorities
    }

    /// Adds an X.509 authority. Idempotent on DER equality.
    pub fn add_x509_authority(&mut self, certificate: Certificate) {
        if !self.x509_authorities.contains(&certificate) {
            self.x509_authorities.push(certificate);
        }
    }

    /// Returns the JWT authorities carried by the document, keyed by key ID.
    pub fn jwt_authorities(&self) -> &HashMap<String, Jwk> {
        &self.jwt_authorities
    }

    /// Adds a JWT authority.
    ///
    /// # Errors
    ///
    /// Returns [`BundleDocumentError::MissingKeyId`] if the key carries no
    /// `kid`.
    pub fn add_jwt_authority(&mut self, jwk: Jwk) -> Result<(), BundleDocumentError> {
        let kid = jwk
            .common
            .key_id
            .clone()
            .ok_or(BundleDocumentError::MissingKeyId)?;
        self.jwt_authorities.insert(kid, jwk);
        Ok(())
    }

    /// Builds an [`X509Bundle`] view of the document's X.509 authorities.
    pub fn to_x509_bundle(&self) -> X509Bundle {
        let ders: Vec<&[u8]> = self.x509_authorities.iter().map(AsRef::as_ref).collect();
        // Authorities were validated at parse time.
        X509Bundle::from_x509_authorities(self.trust_domain.clone(), &ders)
            .unwrap_or_else(|_| X509Bundle::new(self.trust_domain.clone()))
    }

    /// Builds a [`JwtBundle`] view of the document's JWT authorities.
    pub fn to_jwt_bundle(&self) -> JwtBundle {
        let bundle = JwtBundle::new(self.trust_domain.clone());
        for jwk in self.jwt_authorities.values() {
            // Keys were validated to carry a kid when added.
            let _ = bundle.add_jwt_authority(jwk.clone());
        }
        bundle
    }

    fn push_x509_entry(&mut self, entry: &Map<String, Value>) -> Result<(), BundleDocumentError> {
        let x5c = entry
            .get("x5c")
            .and_then(Value::as_array)
            .ok_or(BundleDocumentError::InvalidX5c)?;

        let [cert] = x5c.as_slice() else {
            return Err(BundleDocumentError::InvalidX5c);
        };
        let encoded = cert.as_str().ok_or(BundleDocumentError::InvalidX5c)?;

        let der = STANDARD.decode(encoded)?;
        self.add_x509_authority(Certificate::try_from(der)?);
        Ok(())
    }

    fn push_jwt_entry(&mut self, mut entry: Map<String, Value>) -> Result<(), BundleDocumentError> {
        let kid = entry
            .get("kid")
            .and_then(Value::as_str)
            .ok_or(BundleDocumentError::MissingKeyId)?
            .to_owned();

        // Strip the SPIFFE use tag so the entry is a plain RFC 7517 key.
        entry.remove("use");

        let jwk: Jwk =
            serde_json::from_value(Value::Object(entry)).map_err(BundleDocumentError::InvalidJwk)?;
        self.jwt_authorities.insert(kid, jwk);
        Ok(())
    }
}

/// Derives the JWK `kty`/parameter fields for a certificate's public key.
fn jwk_params_for_certificate(
    cert: &Certificate,
) -> Result<Map<String, Value>, BundleDocumentError> {
    let x509 = parse_der_certificate(cert.as_bytes())?;
    let spki = x509.public_key();

    let mut entry = Map::new();
    match spki.parsed().map_err(CertificateError::from)? {
        PublicKey::EC(point) => {
            let curve_oid = spki
                .algorithm
                .parameters
                .as_ref()
                .and_then(|p| p.as_oid().ok())
                .map(|oid| oid.to_id_string())
                .unwrap_or_default();

            let curve = match curve_oid.as_str() {
                "1.2.840.10045.3.1.7" => "P-256",
                "1.3.132.0.34" => "P-384",
                "1.3.132.0.35" => "P-521",
                other => {
                    return Err(BundleDocumentError::UnsupportedKeyType(format!(
                        "EC curve {other}"
                    )))
                }
            };

            // Uncompressed SEC 1 point: 0x04 || x || y.
            let data = point.data();
            let Some((&0x04, coords)) = data.split_first() else {
                return Err(BundleDocumentError::UnsupportedKeyType(
                    "compressed EC point".into(),
                ));
            };
            let (x, y) = coords.split_at(coords.len() / 2);

            entry.insert("kty".into(), Value::String("EC".into()));
            entry.insert("crv".into(), Value::String(curve.into()));
            entry.insert("x".into(), Value::String(URL_SAFE_NO_PAD.encode(x)));
            entry.insert("y".into(), Value::String(URL_SAFE_NO_PAD.encode(y)));
        }
        PublicKey::RSA(rsa) => {
            let strip = |b: &[u8]| {
                let start = b.iter().position(|&v| v != 0).unwrap_or(b.len() - 1);
                b[start..].to_vec()
            };
            entry.insert("kty".into(), Value::String("RSA".into()));
            entry.insert(
                "n".into(),
                Value::String(URL_SAFE_NO_PAD.encode(strip(rsa.modulus))),
            );
            entry.insert(
                "e".into(),
                Value::String(URL_SAFE_NO_PAD.encode(strip(rsa.exponent))),
            );
        }
        other => {
            return Err(BundleDocumentError::UnsupportedKeyType(format!(
                "{other:?}"
            )))
        }
    }

    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ca_der() -> Vec<u8> {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::new()).unwrap();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.self_signed(&key).unwrap().der().to_vec()
    }

    const JWT_KEY: &str = r#"{
        "kty": "EC",
        "kid": "C6vs25welZOx6WksNYfbMfiw9l96pMnD",
        "crv": "P-256",
        "x": "ngLYQnlfF6GsojUwqtcEE3WgTNG2RUlsGhK73RNEl5k",
        "y": "tKbiDSUSsQ3F1P7wteeHNXIcU-cx6CgSbroeQrQHTLM"
    }"#;

    #[test]
    fn parse_document_with_both_uses() {
        let ca = test_ca_der();
        let body = format!(
            r#"{{
                "keys": [
                    {{
                        "kty": "EC",
                        "use": "x509-svid",
                        "crv": "P-256",
                        "x": "ngLYQnlfF6GsojUwqtcEE3WgTNG2RUlsGhK73RNEl5k",
                        "y": "tKbiDSUSsQ3F1P7wteeHNXIcU-cx6CgSbroeQrQHTLM",
                        "x5c": ["{}"]
                    }},
                    {{
                        "kty": "EC",
                        "use": "jwt-svid",
                        "kid": "kid-1",
                        "crv": "P-256",
                        "x": "ngLYQnlfF6GsojUwqtcEE3WgTNG2RUlsGhK73RNEl5k",
                        "y": "tKbiDSUSsQ3F1P7wteeHNXIcU-cx6CgSbroeQrQHTLM"
                    }}
                ],
                "spiffe_sequence": 42,
                "spiffe_refresh_hint": 300
            }}"#,
            STANDARD.encode(&ca)
        );

        let td = TrustDomain::new("example.org").unwrap();
        let doc = BundleDocument::parse(td, body.as_bytes()).unwrap();

        assert_eq!(doc.sequence(), Some(42));
        assert_eq!(doc.refresh_hint(), Some(Duration::from_secs(300)));
        assert_eq!(doc.x509_authorities().len(), 1);
        assert_eq!(doc.x509_authorities()[0].as_bytes(), ca.as_slice());
        assert!(doc.jwt_authorities().contains_key("kid-1"));
    }

    #[test]
    fn serialize_parse_round_trip() {
        let td = TrustDomain::new("example.org").unwrap();
        let mut doc = BundleDocument::new(td.clone());
        doc.set_sequence(7);
        doc.set_refresh_hint(Duration::from_secs(600));
        doc.add_x509_authority(Certificate::try_from(test_ca_der()).unwrap());
        doc.add_jwt_authority(serde_json::from_str::<Jwk>(JWT_KEY).unwrap())
            .unwrap();

        let bytes = doc.serialize().unwrap();
        let parsed = BundleDocument::parse(td, &bytes).unwrap();

        assert_eq!(parsed, doc);
    }

    #[test]
    fn parse_rejects_unknown_use() {
        let body = br#"{"keys": [{"kty": "EC", "use": "tls-client"}]}"#;
        let td = TrustDomain::new("example.org").unwrap();
        assert!(matches!(
            BundleDocument::parse(td, body).unwrap_err(),
            BundleDocumentError::UnsupportedKeyUse(u) if u == "tls-client"
        ));
    }

    #[test]
    fn parse_rejects_x509_entry_with_two_certs() {
        let ca = STANDARD.encode(test_ca_der());
        let body = format!(
            r#"{{"keys": [{{"kty": "EC", "use": "x509-svid", "x5c": ["{ca}", "{ca}"]}}]}}"#
        );
        let td = TrustDomain::new("example.org").unwrap();
        assert!(matches!(
            BundleDocument::parse(td, body.as_bytes()).unwrap_err(),
            BundleDocumentError::InvalidX5c
        ));
    }

    #[test]
    fn parse_rejects_jwt_entry_without_kid() {
        let body = br#"{"keys": [{
            "kty": "EC",
            "use": "jwt-svid",
            "crv": "P-256",
            "x": "ngLYQnlfF6GsojUwqtcEE3WgTNG2RUlsGhK73RNEl5k",
            "y": "tKbiDSUSsQ3F1P7wteeHNXIcU-cx6CgSbroeQrQHTLM"
        }]}"#;
        let td = TrustDomain::new("example.org").unwrap();
        assert!(matches!(
            BundleDocument::parse(td, body).unwrap_err(),
            BundleDocumentError::MissingKeyId
        ));
    }

    #[test]
    fn non_monotonic_sequence_is_accepted() {
        let td = TrustDomain::new("example.org").unwrap();
        for seq in [5_u64, 3, 4] {
            let body = format!(r#"{{"keys": [], "spiffe_sequence": {seq}}}"#);
            let doc = BundleDocument::parse(td.clone(), body.as_bytes()).unwrap();
            assert_eq!(doc.sequence(), Some(seq));
        }
    }

    #[test]
    fn bundle_views() {
        let td = TrustDomain::new("example.org").unwrap();
        let mut doc = BundleDocument::new(td);
        doc.add_x509_authority(Certificate::try_from(test_ca_der()).unwrap());
        doc.add_jwt_authority(serde_json::from_str::<Jwk>(JWT_KEY).unwrap())
            .unwrap();

        assert_eq!(doc.to_x509_bundle().authorities().len(), 1);
        assert!(doc
            .to_jwt_bundle()
            .find_jwt_authority("C6vs25welZOx6WksNYfbMfiw9l96pMnD")
            .is_some());
    }
}
