//! `Certificate` and `PrivateKey` types.
//!
//! Both wrap DER-encoded bytes and validate them at construction time, so a
//! held value is always parseable.

use crate::cert::error::{CertificateError, PrivateKeyError};
use crate::cert::parsing::{parse_der_certificate, spiffe_ids_from_uri_san};
use crate::SpiffeId;
use pkcs8::PrivateKeyInfo;
use x509_parser::certificate::X509Certificate;
use zeroize::Zeroize;

pub mod error;
pub(crate) mod parsing;

/// A single DER-encoded X.509 certificate.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Certificate(Vec<u8>);

impl Certificate {
    /// Returns the DER bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Extracts the SPIFFE ID from the certificate's URI SAN.
    ///
    /// The certificate must carry **exactly one** SPIFFE ID.
    ///
    /// # Errors
    ///
    /// - [`CertificateError::MissingSpiffeId`] if none is present.
    /// - [`CertificateError::MultipleSpiffeIds`] if more than one is present.
    /// - [`CertificateError::ParseX509Certificate`] on parsing failures.
    pub fn spiffe_id(&self) -> Result<SpiffeId, CertificateError> {
        let x509 = parse_der_certificate(self.as_bytes())?;
        single_spiffe_id(&x509)
    }
}

impl AsRef<[u8]> for Certificate {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<X509Certificate<'_>> for Certificate {
    fn from(cert: X509Certificate<'_>) -> Self {
        Self(cert.as_raw().to_vec())
    }
}

impl TryFrom<&[u8]> for Certificate {
    type Error = CertificateError;

    fn try_from(der_bytes: &[u8]) -> Result<Self, Self::Error> {
        parse_der_certificate(der_bytes)?;
        Ok(Self(der_bytes.to_vec()))
    }
}

impl TryFrom<Vec<u8>> for Certificate {
    type Error = CertificateError;

    fn try_from(der_bytes: Vec<u8>) -> Result<Self, Self::Error> {
        parse_der_certificate(&der_bytes)?;
        Ok(Self(der_bytes))
    }
}

/// A DER-encoded PKCS#8 private key.
///
/// The key bytes are zeroized on drop.
#[derive(Clone, Eq, PartialEq, Zeroize)]
#[zeroize(drop)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for PrivateKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for PrivateKey {
    type Error = PrivateKeyError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        PrivateKeyInfo::try_from(bytes).map_err(PrivateKeyError::DecodePkcs8)?;
        Ok(Self(bytes.to_vec()))
    }
}

impl TryFrom<Vec<u8>> for PrivateKey {
    type Error = PrivateKeyError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        PrivateKeyInfo::try_from(bytes.as_slice()).map_err(PrivateKeyError::DecodePkcs8)?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("len", &self.0.len())
            .finish()
    }
}

/// Extracts the single SPIFFE ID from a DER-encoded certificate.
///
/// See [`Certificate::spiffe_id`].
///
/// # Errors
///
/// Same as [`Certificate::spiffe_id`].
pub fn spiffe_id_from_der(der: &[u8]) -> Result<SpiffeId, CertificateError> {
    let x509 = parse_der_certificate(der)?;
    single_spiffe_id(&x509)
}

pub(crate) fn single_spiffe_id(
    cert: &X509Certificate<'_>,
) -> Result<SpiffeId, CertificateError> {
    let mut ids = spiffe_ids_from_uri_san(cert)?.into_iter();

    let Some(first) = ids.next() else {
        return Err(CertificateError::MissingSpiffeId);
    };
    if ids.next().is_some() {
        return Err(CertificateError::MultipleSpiffeIds);
    }

    Ok(first)
}
