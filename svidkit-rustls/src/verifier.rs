//! rustls `danger` verifiers that replace stock Web PKI verification with
//! SPIFFE-rules chain verification and SPIFFE ID authorization.

use crate::authorizer::Authorizer;
use crate::material::DynBundleSource;
use crate::verify::verify_chain;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use std::fmt::{self, Debug};
use std::sync::Arc;
use webpki::KeyUsage;

fn other_err<E>(e: E) -> rustls::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rustls::Error::Other(rustls::OtherError(Arc::new(e)))
}

pub(crate) fn supported_algorithms() -> Result<WebPkiSupportedAlgorithms, crate::Error> {
    rustls::crypto::CryptoProvider::get_default()
        .map(|p| p.signature_verification_algorithms)
        .ok_or(crate::Error::NoCryptoProvider)
}

/// Client-side verifier for the server's certificate.
///
/// Replaces rustls' built-in verification entirely: no DNS name matching is
/// performed and trust anchors come from the bundle of the server's trust
/// domain.
pub(crate) struct SpiffeServerCertVerifier {
    bundles: Arc<dyn DynBundleSource>,
    authorizer: Arc<dyn Authorizer>,
    supported: WebPkiSupportedAlgorithms,
}

impl SpiffeServerCertVerifier {
    pub(crate) fn new(
        bundles: Arc<dyn DynBundleSource>,
        authorizer: Arc<dyn Authorizer>,
        supported: WebPkiSupportedAlgorithms,
    ) -> Self {
        Self {
            bundles,
            authorizer,
            supported,
        }
    }
}

impl Debug for SpiffeServerCertVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpiffeServerCertVerifier").finish()
    }
}

impl ServerCertVerifier for SpiffeServerCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        verify_chain(
            end_entity,
            intermediates,
            self.bundles.as_ref(),
            self.authorizer.as_ref(),
            None,
            KeyUsage::server_auth(),
        )
        .map_err(other_err)?;

        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.supported)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.supported)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported.supported_schemes()
    }
}

/// Server-side verifier for client certificates.
pub(crate) struct SpiffeClientCertVerifier {
    bundles: Arc<dyn DynBundleSource>,
    authorizer: Arc<dyn Authorizer>,
    supported: WebPkiSupportedAlgorithms,
}

impl SpiffeClientCertVerifier {
    pub(crate) fn new(
        bundles: Arc<dyn DynBundleSource>,
        authorizer: Arc<dyn Authorizer>,
        supported: WebPkiSupportedAlgorithms,
    ) -> Self {
        Self {
            bundles,
            authorizer,
            supported,
        }
    }
}

impl Debug for SpiffeClientCertVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpiffeClientCertVerifier").finish()
    }
}

impl ClientCertVerifier for SpiffeClientCertVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        // An empty hint list does not weaken verification; it only affects
        // which certificates the peer may offer.
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        verify_chain(
            end_entity,
            intermediates,
            self.bundles.as_ref(),
            self.authorizer.as_ref(),
            None,
            KeyUsage::client_auth(),
        )
        .map_err(other_err)?;

        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.supported)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.supported)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported.supported_schemes()
    }
}
