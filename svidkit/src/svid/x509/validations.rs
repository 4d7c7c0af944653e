use crate::cert::parsing::{get_x509_extension, parse_der_certificate};
use crate::cert::{single_spiffe_id, Certificate};
use crate::spiffe_id::SpiffeId;
use crate::svid::x509::X509SvidError;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::ParsedExtension;
use x509_parser::oid_registry;

/// Validates `cert` as an X.509-SVID leaf and returns its [`SpiffeId`].
pub(crate) fn validate_leaf_certificate(cert: &Certificate) -> Result<SpiffeId, X509SvidError> {
    let x509 = parse_der_certificate(cert.as_bytes())?;
    validate_leaf_key_usage(&x509)?;
    validate_leaf_basic_constraints(&x509)?;
    Ok(single_spiffe_id(&x509)?)
}

/// Validates every certificate in `certs` as a signing certificate.
pub(crate) fn validate_signing_certificates(certs: &[Certificate]) -> Result<(), X509SvidError> {
    for cert in certs {
        let x509 = parse_der_certificate(cert.as_bytes())?;
        validate_signing_certificate(&x509)?;
    }
    Ok(())
}

fn validate_leaf_basic_constraints(cert: &X509Certificate<'_>) -> Result<(), X509SvidError> {
    let basic_constraints =
        get_x509_extension(cert, &oid_registry::OID_X509_EXT_BASIC_CONSTRAINTS)?;
    match basic_constraints {
        ParsedExtension::BasicConstraints(b) if b.ca => {
            Err(X509SvidError::LeafCertificateHasCaFlag)
        }
        ParsedExtension::BasicConstraints(_) => Ok(()),
        // Present but unparseable: reject rather than let a malformed
        // extension bypass validation.
        _ => Err(X509SvidError::UnparseableExtension {
            extension: "BasicConstraints",
        }),
    }
}

fn validate_leaf_key_usage(cert: &X509Certificate<'_>) -> Result<(), X509SvidError> {
    let key_usage = get_x509_extension(cert, &oid_registry::OID_X509_EXT_KEY_USAGE)?;
    match key_usage {
        ParsedExtension::KeyUsage(k) if !k.digital_signature() => {
            Err(X509SvidError::LeafCertificateMissingDigitalSignature)
        }
        ParsedExtension::KeyUsage(k) if k.crl_sign() => Err(X509SvidError::LeafCertificateHasCrlSign),
        ParsedExtension::KeyUsage(k) if k.key_cert_sign() => {
            Err(X509SvidError::LeafCertificateHasKeyCertSign)
        }
        ParsedExtension::KeyUsage(_) => Ok(()),
        _ => Err(X509SvidError::UnparseableExtension {
            extension: "KeyUsage",
        }),
    }
}

fn validate_signing_certificate(cert: &X509Certificate<'_>) -> Result<(), X509SvidError> {
    let basic_constraints =
        get_x509_extension(cert, &oid_registry::OID_X509_EXT_BASIC_CONSTRAINTS)?;
    match basic_constraints {
        ParsedExtension::BasicConstraints(b) if b.ca => {}
        ParsedExtension::BasicConstraints(_) => {
            return Err(X509SvidError::SigningCertificateMissingCaFlag);
        }
        _ => {
            return Err(X509SvidError::UnparseableExtension {
                extension: "BasicConstraints",
            });
        }
    }

    let key_usage = get_x509_extension(cert, &oid_registry::OID_X509_EXT_KEY_USAGE)?;
    match key_usage {
        ParsedExtension::KeyUsage(k) if k.key_cert_sign() => Ok(()),
        ParsedExtension::KeyUsage(_) => Err(X509SvidError::SigningCertificateMissingKeyCertSign),
        _ => Err(X509SvidError::UnparseableExtension {
            extension: "KeyUsage",
        }),
    }
}
