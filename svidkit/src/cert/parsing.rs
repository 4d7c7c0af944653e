//! Internal parsing and validation helpers.

use crate::cert::error::CertificateError;
use crate::cert::Certificate;
use crate::SpiffeId;
use x509_parser::certificate::X509Certificate;
use x509_parser::der_parser::oid::Oid;
use x509_parser::error::X509Error;
use x509_parser::extensions::ParsedExtension;
use x509_parser::nom::Err;
use x509_parser::oid_registry;
use x509_parser::prelude::GeneralName;

const MAX_URI_SAN_ENTRIES: usize = 32;
const MAX_URI_LENGTH: usize = 2048;

/// Maximum number of certificates accepted in an SVID chain.
///
/// A real X.509-SVID chain carries a leaf plus at most a few intermediates.
/// The bound keeps adversarial inputs from forcing unbounded allocation.
const MAX_CERT_CHAIN_LENGTH: usize = 16;

/// Splits a concatenated run of DER-encoded certificates into a
/// `Vec<Certificate>`, enforcing [`MAX_CERT_CHAIN_LENGTH`].
///
/// Intended for SVID chains. Bundles may legitimately hold many anchors; use
/// [`split_certificates_unbounded`] for those.
pub(crate) fn split_certificate_chain(
    cert_chain_der: &[u8],
) -> Result<Vec<Certificate>, CertificateError> {
    split_certificates(cert_chain_der, Some(MAX_CERT_CHAIN_LENGTH))
}

/// Splits a concatenated run of DER-encoded certificates without a length
/// bound. Callers are responsible for any input-size limits.
pub(crate) fn split_certificates_unbounded(
    cert_list_der: &[u8],
) -> Result<Vec<Certificate>, CertificateError> {
    split_certificates(cert_list_der, None)
}

fn split_certificates(
    der: &[u8],
    max: Option<usize>,
) -> Result<Vec<Certificate>, CertificateError> {
    let mut rest = der;
    let mut certs = Vec::new();

    while !rest.is_empty() {
        if let Some(max) = max {
            if certs.len() >= max {
                return Err(CertificateError::TooManyCertificates { max });
            }
        }

        let (remaining, _) = x509_parser::parse_x509_certificate(rest).map_err(|e| match e {
            Err::Incomplete(_) => {
                CertificateError::ParseX509Certificate(X509Error::InvalidCertificate)
            }
            Err::Error(err) | Err::Failure(err) => CertificateError::ParseX509Certificate(err),
        })?;

        // The parsed certificate's length tells us where the original DER
        // bytes end; store those bytes verbatim.
        let consumed = rest.len() - remaining.len();
        certs.push(Certificate::try_from(&rest[..consumed])?);

        rest = remaining;
    }

    Ok(certs)
}

/// Parses DER bytes as a single X.509 certificate.
pub(crate) fn parse_der_certificate(
    der_bytes: &[u8],
) -> Result<X509Certificate<'_>, CertificateError> {
    match x509_parser::parse_x509_certificate(der_bytes) {
        Ok((_, cert)) => Ok(cert),
        Err(Err::Incomplete(_)) => Err(CertificateError::ParseX509Certificate(
            X509Error::InvalidCertificate,
        )),
        Err(Err::Error(e) | Err::Failure(e)) => Err(CertificateError::ParseX509Certificate(e)),
    }
}

/// Returns the parsed extension for `oid`, failing if it is absent.
pub(crate) fn get_x509_extension<'a>(
    cert: &'a X509Certificate<'_>,
    oid: &Oid<'static>,
) -> Result<&'a ParsedExtension<'a>, CertificateError> {
    match cert.tbs_certificate.get_extension_unique(oid)? {
        None => Err(CertificateError::MissingX509Extension(oid.clone())),
        Some(ext) => Ok(ext.parsed_extension()),
    }
}

/// Collects every `spiffe://` URI SAN of `cert` as a parsed [`SpiffeId`].
///
/// Non-SPIFFE URIs are skipped; a `spiffe://` URI that fails to parse is an
/// error. The URI SAN count is bounded to keep malformed inputs cheap.
pub(crate) fn spiffe_ids_from_uri_san(
    cert: &X509Certificate<'_>,
) -> Result<Vec<SpiffeId>, CertificateError> {
    let ext = get_x509_extension(cert, &oid_registry::OID_X509_EXT_SUBJECT_ALT_NAME)?;

    let san = match ext {
        ParsedExtension::SubjectAlternativeName(s) => s,
        other => return Err(CertificateError::UnexpectedExtension(format!("{other:?}"))),
    };

    let mut ids = Vec::new();
    let mut uri_count = 0usize;

    for name in &san.general_names {
        let uri = match name {
            GeneralName::URI(u) => *u,
            _ => continue,
        };

        uri_count += 1;
        if uri_count > MAX_URI_SAN_ENTRIES {
            return Err(CertificateError::TooManyUriSanEntries {
                max: MAX_URI_SAN_ENTRIES,
            });
        }

        if uri.len() > MAX_URI_LENGTH {
            continue;
        }

        if !uri.starts_with("spiffe://") {
            continue;
        }

        ids.push(SpiffeId::new(uri)?);
    }

    Ok(ids)
}
