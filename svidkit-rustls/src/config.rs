//! TLS configuration presets.
//!
//! Six presets cover the SPIFFE authentication matrix; each has a `hook_*`
//! variant that rewires only the authentication parts of a caller-supplied
//! config, leaving every other setting as the caller had it.
//!
//! | Preset | Server auth | Client auth | Peer verify |
//! |---|---|---|---|
//! | [`tls_client_config`] | server SVID via SPIFFE | none | SPIFFE |
//! | [`mtls_client_config`] | server SVID via SPIFFE | client SVID via SPIFFE | SPIFFE |
//! | [`mtls_web_client_config`] | server via Web PKI roots | client SVID via SPIFFE | Web PKI |
//! | [`tls_server_config`] | server SVID via SPIFFE | none | — |
//! | [`mtls_server_config`] | server SVID via SPIFFE | required | SPIFFE |
//! | [`mtls_web_server_config`] | fixed Web PKI cert | required | SPIFFE |

use crate::authorizer::Authorizer;
use crate::error::{Error, Result};
use crate::material::{DynBundleSource, DynSvidSource};
use crate::resolve::{NoClientCert, SvidCertResolver, SvidClientCertResolver, SvidServerCertResolver};
use crate::trace::Trace;
use crate::verifier::{supported_algorithms, SpiffeClientCertVerifier, SpiffeServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::sync::Arc;
use svidkit::{BundleSource, SvidSource, X509Bundle, X509Svid};

/// TLS client authenticating the server by SPIFFE ID; presents no client
/// certificate.
///
/// # Errors
///
/// Returns an [`Error`] if no rustls crypto provider can be installed.
pub fn tls_client_config<B>(bundles: Arc<B>, authorizer: impl Authorizer) -> Result<ClientConfig>
where
    B: BundleSource<Item = X509Bundle> + Send + Sync + 'static,
{
    crate::crypto::ensure_crypto_provider_installed();

    let verifier = spiffe_server_verifier(bundles, authorizer)?;

    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();

    Ok(config)
}

/// mTLS client: authenticates the server by SPIFFE ID and presents the
/// current SVID as the client certificate.
///
/// # Errors
///
/// Returns an [`Error`] if no rustls crypto provider can be installed.
pub fn mtls_client_config<S, B>(
    svids: Arc<S>,
    bundles: Arc<B>,
    authorizer: impl Authorizer,
    trace: Trace,
) -> Result<ClientConfig>
where
    S: SvidSource<Item = X509Svid> + Send + Sync + 'static,
    B: BundleSource<Item = X509Bundle> + Send + Sync + 'static,
{
    crate::crypto::ensure_crypto_provider_installed();

    let verifier = spiffe_server_verifier(bundles, authorizer)?;
    let resolver = svid_client_resolver(svids, trace);

    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_cert_resolver(resolver);

    Ok(config)
}

/// mTLS client against a Web PKI server: stock verification against `roots`,
/// client SVID via SPIFFE.
///
/// # Errors
///
/// Returns an [`Error`] if no rustls crypto provider can be installed.
pub fn mtls_web_client_config<S>(
    svids: Arc<S>,
    roots: RootCertStore,
    trace: Trace,
) -> Result<ClientConfig>
where
    S: SvidSource<Item = X509Svid> + Send + Sync + 'static,
{
    crate::crypto::ensure_crypto_provider_installed();

    let resolver = svid_client_resolver(svids, trace);

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_cert_resolver(resolver);

    Ok(config)
}

/// TLS server presenting the current SVID; no client authentication.
///
/// # Errors
///
/// Returns an [`Error`] if no rustls crypto provider can be installed.
pub fn tls_server_config<S>(svids: Arc<S>, trace: Trace) -> Result<ServerConfig>
where
    S: SvidSource<Item = X509Svid> + Send + Sync + 'static,
{
    crate::crypto::ensure_crypto_provider_installed();

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(svid_server_resolver(svids, trace));

    Ok(config)
}

/// mTLS server: presents the current SVID and requires a client certificate
/// verified by SPIFFE rules.
///
/// # Errors
///
/// Returns an [`Error`] if no rustls crypto provider can be installed.
pub fn mtls_server_config<S, B>(
    svids: Arc<S>,
    bundles: Arc<B>,
    authorizer: impl Authorizer,
    trace: Trace,
) -> Result<ServerConfig>
where
    S: SvidSource<Item = X509Svid> + Send + Sync + 'static,
    B: BundleSource<Item = X509Bundle> + Send + Sync + 'static,
{
    crate::crypto::ensure_crypto_provider_installed();

    let verifier = spiffe_client_verifier(bundles, authorizer)?;

    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_cert_resolver(svid_server_resolver(svids, trace));

    Ok(config)
}

/// mTLS server with a fixed Web PKI certificate; clients are verified by
/// SPIFFE rules.
///
/// # Errors
///
/// Returns an [`Error`] if the certificate or key is unusable, or no rustls
/// crypto provider can be installed.
pub fn mtls_web_server_config<B>(
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    bundles: Arc<B>,
    authorizer: impl Authorizer,
) -> Result<ServerConfig>
where
    B: BundleSource<Item = X509Bundle> + Send + Sync + 'static,
{
    crate::crypto::ensure_crypto_provider_installed();

    let verifier = spiffe_client_verifier(bundles, authorizer)?;

    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(cert_chain, key)?;

    Ok(config)
}

/// Rewires `config` for SPIFFE server authentication without a client
/// certificate; all non-authentication settings are untouched.
///
/// # Errors
///
/// Returns an [`Error`] if no rustls crypto provider can be installed.
pub fn hook_tls_client_config<B>(
    config: &mut ClientConfig,
    bundles: Arc<B>,
    authorizer: impl Authorizer,
) -> Result<()>
where
    B: BundleSource<Item = X509Bundle> + Send + Sync + 'static,
{
    crate::crypto::ensure_crypto_provider_installed();

    let verifier = spiffe_server_verifier(bundles, authorizer)?;
    config.dangerous().set_certificate_verifier(verifier);
    config.client_auth_cert_resolver = Arc::new(NoClientCert);
    Ok(())
}

/// Rewires `config` for SPIFFE mutual authentication; all
/// non-authentication settings are untouched.
///
/// # Errors
///
/// Returns an [`Error`] if no rustls crypto provider can be installed.
pub fn hook_mtls_client_config<S, B>(
    config: &mut ClientConfig,
    svids: Arc<S>,
    bundles: Arc<B>,
    authorizer: impl Authorizer,
    trace: Trace,
) -> Result<()>
where
    S: SvidSource<Item = X509Svid> + Send + Sync + 'static,
    B: BundleSource<Item = X509Bundle> + Send + Sync + 'static,
{
    crate::crypto::ensure_crypto_provider_installed();

    let verifier = spiffe_server_verifier(bundles, authorizer)?;
    config.dangerous().set_certificate_verifier(verifier);
    config.client_auth_cert_resolver = svid_client_resolver(svids, trace);
    Ok(())
}

/// Rewires `config` for Web PKI server verification with a SPIFFE client
/// certificate; all non-authentication settings are untouched.
///
/// # Errors
///
/// Returns an [`Error`] if the Web PKI verifier cannot be built.
pub fn hook_mtls_web_client_config<S>(
    config: &mut ClientConfig,
    svids: Arc<S>,
    roots: RootCertStore,
    trace: Trace,
) -> Result<()>
where
    S: SvidSource<Item = X509Svid> + Send + Sync + 'static,
{
    crate::crypto::ensure_crypto_provider_installed();

    let verifier = rustls::client::WebPkiServerVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| Error::VerifierBuilder(format!("{e:?}")))?;
    config.dangerous().set_certificate_verifier(verifier);
    config.client_auth_cert_resolver = svid_client_resolver(svids, trace);
    Ok(())
}

/// Rewires `config` to present the current SVID with no client
/// authentication; every non-authentication setting is carried over from
/// the caller's config.
///
/// # Errors
///
/// Returns an [`Error`] if no rustls crypto provider can be installed.
pub fn hook_tls_server_config<S>(
    config: &mut ServerConfig,
    svids: Arc<S>,
    trace: Trace,
) -> Result<()>
where
    S: SvidSource<Item = X509Svid> + Send + Sync + 'static,
{
    let mut rebuilt = tls_server_config(svids, trace)?;
    preserve_server_fields(config, &mut rebuilt);
    *config = rebuilt;
    Ok(())
}

/// Rewires `config` for SPIFFE mutual authentication on the server side;
/// every non-authentication setting is carried over from the caller's
/// config.
///
/// # Errors
///
/// Returns an [`Error`] if no rustls crypto provider can be installed.
pub fn hook_mtls_server_config<S, B>(
    config: &mut ServerConfig,
    svids: Arc<S>,
    bundles: Arc<B>,
    authorizer: impl Authorizer,
    trace: Trace,
) -> Result<()>
where
    S: SvidSource<Item = X509Svid> + Send + Sync + 'static,
    B: BundleSource<Item = X509Bundle> + Send + Sync + 'static,
{
    let mut rebuilt = mtls_server_config(svids, bundles, authorizer, trace)?;
    preserve_server_fields(config, &mut rebuilt);
    *config = rebuilt;
    Ok(())
}

/// Rewires `config` to a fixed Web PKI certificate with SPIFFE client
/// verification; every non-authentication setting is carried over from the
/// caller's config.
///
/// # Errors
///
/// Returns an [`Error`] if the certificate or key is unusable.
pub fn hook_mtls_web_server_config<B>(
    config: &mut ServerConfig,
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    bundles: Arc<B>,
    authorizer: impl Authorizer,
) -> Result<()>
where
    B: BundleSource<Item = X509Bundle> + Send + Sync + 'static,
{
    let mut rebuilt = mtls_web_server_config(cert_chain, key, bundles, authorizer)?;
    preserve_server_fields(config, &mut rebuilt);
    *config = rebuilt;
    Ok(())
}

fn spiffe_server_verifier<B>(
    bundles: Arc<B>,
    authorizer: impl Authorizer,
) -> Result<Arc<SpiffeServerCertVerifier>>
where
    B: BundleSource<Item = X509Bundle> + Send + Sync + 'static,
{
    let bundles: Arc<dyn DynBundleSource> = bundles;
    Ok(Arc::new(SpiffeServerCertVerifier::new(
        bundles,
        Arc::new(authorizer),
        supported_algorithms()?,
    )))
}

fn spiffe_client_verifier<B>(
    bundles: Arc<B>,
    authorizer: impl Authorizer,
) -> Result<Arc<SpiffeClientCertVerifier>>
where
    B: BundleSource<Item = X509Bundle> + Send + Sync + 'static,
{
    let bundles: Arc<dyn DynBundleSource> = bundles;
    Ok(Arc::new(SpiffeClientCertVerifier::new(
        bundles,
        Arc::new(authorizer),
        supported_algorithms()?,
    )))
}

fn svid_server_resolver<S>(svids: Arc<S>, trace: Trace) -> Arc<SvidServerCertResolver>
where
    S: SvidSource<Item = X509Svid> + Send + Sync + 'static,
{
    let svids: Arc<dyn DynSvidSource> = svids;
    Arc::new(SvidServerCertResolver(SvidCertResolver::new(svids, trace)))
}

fn svid_client_resolver<S>(svids: Arc<S>, trace: Trace) -> Arc<SvidClientCertResolver>
where
    S: SvidSource<Item = X509Svid> + Send + Sync + 'static,
{
    let svids: Arc<dyn DynSvidSource> = svids;
    Arc::new(SvidClientCertResolver(SvidCertResolver::new(svids, trace)))
}

/// Carries every public non-authentication field of `base` onto `rebuilt`.
fn preserve_server_fields(base: &ServerConfig, rebuilt: &mut ServerConfig) {
    rebuilt.ignore_client_order = base.ignore_client_order;
    rebuilt.max_fragment_size = base.max_fragment_size;
    rebuilt.session_storage = Arc::clone(&base.session_storage);
    rebuilt.ticketer = Arc::clone(&base.ticketer);
    rebuilt.alpn_protocols = base.alpn_protocols.clone();
    rebuilt.key_log = Arc::clone(&base.key_log);
    rebuilt.enable_secret_extraction = base.enable_secret_extraction;
    rebuilt.max_early_data_size = base.max_early_data_size;
    rebuilt.send_half_rtt_data = base.send_half_rtt_data;
    rebuilt.send_tls13_tickets = base.send_tls13_tickets;
}
