//! X.509-SVID types.

mod validations;

use crate::cert::error::{CertificateError, PrivateKeyError};
use crate::cert::parsing::split_certificate_chain;
use crate::cert::{Certificate, PrivateKey};
use crate::spiffe_id::SpiffeId;
use crate::svid::x509::validations::{validate_leaf_certificate, validate_signing_certificates};
use std::sync::Arc;

/// A SPIFFE X.509-SVID.
///
/// Holds the workload [`SpiffeId`], the DER certificate chain (leaf first),
/// the DER-encoded PKCS#8 private key, and an optional Workload API hint.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct X509Svid {
    spiffe_id: SpiffeId,
    cert_chain: Vec<Certificate>,
    private_key: PrivateKey,
    hint: Option<Arc<str>>,
}

/// Errors that may arise parsing an [`X509Svid`].
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum X509SvidError {
    /// The chain of certificates is empty.
    #[error("no certificates found in chain")]
    EmptyChain,

    /// The leaf certificate must not be a CA.
    #[error("leaf certificate must not have CA flag set to true")]
    LeafCertificateHasCaFlag,

    /// The leaf certificate must not carry `cRLSign`.
    #[error("leaf certificate must not have 'cRLSign' set as key usage")]
    LeafCertificateHasCrlSign,

    /// The leaf certificate must not carry `keyCertSign`.
    #[error("leaf certificate must not have 'keyCertSign' set as key usage")]
    LeafCertificateHasKeyCertSign,

    /// The leaf certificate must carry `digitalSignature`.
    #[error("leaf certificate must have 'digitalSignature' set as key usage")]
    LeafCertificateMissingDigitalSignature,

    /// A signing certificate must be a CA.
    #[error("signing certificate must have CA flag set to true")]
    SigningCertificateMissingCaFlag,

    /// A signing certificate must carry `keyCertSign`.
    #[error("signing certificate must have 'keyCertSign' set as key usage")]
    SigningCertificateMissingKeyCertSign,

    /// An extension is present but could not be parsed.
    #[error("{extension} extension is present but could not be parsed")]
    UnparseableExtension {
        /// The name of the extension that failed to parse.
        extension: &'static str,
    },

    /// Error processing or validating the X.509 certificates.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// Error processing the private key.
    #[error(transparent)]
    PrivateKey(#[from] PrivateKeyError),
}

impl X509Svid {
    /// Creates an `X509Svid` from DER-encoded chain and key material.
    ///
    /// # Arguments
    ///
    /// * `cert_chain_der` - Concatenated DER certificate chain, leaf first.
    /// * `private_key_der` - DER-encoded PKCS#8 private key.
    ///
    /// # Errors
    ///
    /// Returns an [`X509SvidError`] if parsing fails, the leaf violates the
    /// X.509-SVID leaf profile (exactly one SPIFFE ID URI SAN, CA=false,
    /// `digitalSignature` without `keyCertSign`/`cRLSign`), or an
    /// intermediate is not a valid signing certificate.
    pub fn parse_from_der(
        cert_chain_der: &[u8],
        private_key_der: &[u8],
    ) -> Result<Self, X509SvidError> {
        Self::parse_from_der_with_hint(cert_chain_der, private_key_der, None)
    }

    /// Like [`X509Svid::parse_from_der`], with an optional Workload API hint.
    ///
    /// The hint is operator-provided metadata used to pick between multiple
    /// SVIDs; it carries no security meaning.
    ///
    /// # Errors
    ///
    /// Same as [`X509Svid::parse_from_der`].
    pub fn parse_from_der_with_hint(
        cert_chain_der: &[u8],
        private_key_der: &[u8],
        hint: Option<Arc<str>>,
    ) -> Result<Self, X509SvidError> {
        let cert_chain = split_certificate_chain(cert_chain_der)?;

        let Some((leaf, intermediates)) = cert_chain.split_first() else {
            return Err(X509SvidError::EmptyChain);
        };

        let spiffe_id = validate_leaf_certificate(leaf)?;
        validate_signing_certificates(intermediates)?;
        let private_key = PrivateKey::try_from(private_key_der)?;

        Ok(Self {
            spiffe_id,
            cert_chain,
            private_key,
            hint,
        })
    }

    /// Returns the [`SpiffeId`].
    pub const fn spiffe_id(&self) -> &SpiffeId {
        &self.spiffe_id
    }

    /// Returns the certificate chain, leaf first.
    pub fn cert_chain(&self) -> &[Certificate] {
        &self.cert_chain
    }

    /// Returns the leaf certificate.
    pub fn leaf(&self) -> &Certificate {
        // The constructor rejects empty chains.
        &self.cert_chain[0]
    }

    /// Returns the ordered intermediates (everything after the leaf).
    pub fn intermediates(&self) -> &[Certificate] {
        &self.cert_chain[1..]
    }

    /// Returns the private key.
    pub const fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Returns the Workload API hint, if any.
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }
}
