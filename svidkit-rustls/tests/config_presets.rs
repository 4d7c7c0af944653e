//! Preset shape and `hook_*` field-preservation tests.

mod common;

use common::{StaticBundleSource, StaticSvidSource, TestCa};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use svidkit::TrustDomain;
use svidkit_rustls::authorizer::{authorize_any, authorize_member_of};
use svidkit_rustls::{
    hook_mtls_client_config, hook_mtls_server_config, hook_mtls_web_client_config,
    hook_mtls_web_server_config, hook_tls_client_config, hook_tls_server_config,
    mtls_client_config, mtls_server_config, mtls_web_client_config, mtls_web_server_config,
    tls_client_config, tls_server_config, Trace,
};

fn web_roots(ca: &TestCa) -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots
        .add(CertificateDer::from(ca.ca_der()))
        .expect("test CA must be a valid root");
    roots
}

fn web_cert(ca: &TestCa) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
    let (chain_der, key_der) = ca.issue_web_cert("server.test");
    (
        vec![CertificateDer::from(chain_der)],
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)),
    )
}

/// A caller-supplied client config with recognizable non-auth settings.
fn base_client_config(ca: &TestCa) -> ClientConfig {
    let mut config = ClientConfig::builder()
        .with_root_certificates(web_roots(ca))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"customproto".to_vec()];
    config.enable_sni = false;
    config.max_fragment_size = Some(4096);
    config
}

/// A caller-supplied server config with recognizable non-auth settings.
fn base_server_config(ca: &TestCa) -> ServerConfig {
    let (chain, key) = web_cert(ca);
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .expect("base server config must build");
    config.alpn_protocols = vec![b"customproto".to_vec()];
    config.ignore_client_order = true;
    config.max_fragment_size = Some(4096);
    config.max_early_data_size = 77;
    config.send_half_rtt_data = true;
    config.send_tls13_tickets = 9;
    config
}

fn assert_client_fields_preserved(config: &ClientConfig) {
    assert_eq!(config.alpn_protocols, vec![b"customproto".to_vec()]);
    assert!(!config.enable_sni);
    assert_eq!(config.max_fragment_size, Some(4096));
}

fn assert_server_fields_preserved(config: &ServerConfig) {
    assert_eq!(config.alpn_protocols, vec![b"customproto".to_vec()]);
    assert!(config.ignore_client_order);
    assert_eq!(config.max_fragment_size, Some(4096));
    assert_eq!(config.max_early_data_size, 77);
    assert!(config.send_half_rtt_data);
    assert_eq!(config.send_tls13_tickets, 9);
}

#[test]
fn tls_client_preset_presents_no_client_certificate() {
    let ca = TestCa::new("domain1.test");
    let config = tls_client_config(
        StaticBundleSource::new(ca.bundle_set()),
        authorize_any(),
    )
    .unwrap();

    assert!(!config.client_auth_cert_resolver.has_certs());
}

#[test]
fn mtls_client_preset_presents_a_client_certificate() {
    let ca = TestCa::new("domain1.test");
    let svid = ca.issue_svid("spiffe://domain1.test/client");

    let config = mtls_client_config(
        StaticSvidSource::new(svid),
        StaticBundleSource::new(ca.bundle_set()),
        authorize_any(),
        Trace::default(),
    )
    .unwrap();

    assert!(config.client_auth_cert_resolver.has_certs());
}

#[test]
fn mtls_web_client_preset_presents_a_client_certificate() {
    let ca = TestCa::new("domain1.test");
    let svid = ca.issue_svid("spiffe://domain1.test/client");

    let config =
        mtls_web_client_config(StaticSvidSource::new(svid), web_roots(&ca), Trace::default())
            .unwrap();

    assert!(config.client_auth_cert_resolver.has_certs());
}

#[test]
fn server_presets_build() {
    let ca = TestCa::new("domain1.test");
    let svid = ca.issue_svid("spiffe://domain1.test/server");

    tls_server_config(StaticSvidSource::new(svid.clone()), Trace::default()).unwrap();

    mtls_server_config(
        StaticSvidSource::new(svid),
        StaticBundleSource::new(ca.bundle_set()),
        authorize_member_of(TrustDomain::new("domain1.test").unwrap()),
        Trace::default(),
    )
    .unwrap();

    let (chain, key) = web_cert(&ca);
    mtls_web_server_config(
        chain,
        key,
        StaticBundleSource::new(ca.bundle_set()),
        authorize_any(),
    )
    .unwrap();
}

#[test]
fn hook_tls_client_config_preserves_unrelated_fields() {
    let ca = TestCa::new("domain1.test");
    let mut config = base_client_config(&ca);

    hook_tls_client_config(
        &mut config,
        StaticBundleSource::new(ca.bundle_set()),
        authorize_any(),
    )
    .unwrap();

    assert_client_fields_preserved(&config);
    assert!(!config.client_auth_cert_resolver.has_certs());
}

#[test]
fn hook_mtls_client_config_preserves_unrelated_fields() {
    let ca = TestCa::new("domain1.test");
    let svid = ca.issue_svid("spiffe://domain1.test/client");
    let mut config = base_client_config(&ca);

    hook_mtls_client_config(
        &mut config,
        StaticSvidSource::new(svid),
        StaticBundleSource::new(ca.bundle_set()),
        authorize_any(),
        Trace::default(),
    )
    .unwrap();

    assert_client_fields_preserved(&config);
    assert!(config.client_auth_cert_resolver.has_certs());
}

#[test]
fn hook_mtls_web_client_config_preserves_unrelated_fields() {
    let ca = TestCa::new("domain1.test");
    let svid = ca.issue_svid("spiffe://domain1.test/client");
    let mut config = base_client_config(&ca);

    hook_mtls_web_client_config(
        &mut config,
        StaticSvidSource::new(svid),
        web_roots(&ca),
        Trace::default(),
    )
    .unwrap();

    assert_client_fields_preserved(&config);
    assert!(config.client_auth_cert_resolver.has_certs());
}

#[test]
fn hook_tls_server_config_preserves_unrelated_fields() {
    let ca = TestCa::new("domain1.test");
    let svid = ca.issue_svid("spiffe://domain1.test/server");
    let mut config = base_server_config(&ca);

    hook_tls_server_config(&mut config, StaticSvidSource::new(svid), Trace::default()).unwrap();

    assert_server_fields_preserved(&config);
}

#[test]
fn hook_mtls_server_config_preserves_unrelated_fields() {
    let ca = TestCa::new("domain1.test");
    let svid = ca.issue_svid("spiffe://domain1.test/server");
    let mut config = base_server_config(&ca);

    hook_mtls_server_config(
        &mut config,
        StaticSvidSource::new(svid),
        StaticBundleSource::new(ca.bundle_set()),
        authorize_any(),
        Trace::default(),
    )
    .unwrap();

    assert_server_fields_preserved(&config);
}

#[test]
fn hook_mtls_web_server_config_preserves_unrelated_fields() {
    let ca = TestCa::new("domain1.test");
    let mut config = base_server_config(&ca);

    let (chain, key) = web_cert(&ca);
    hook_mtls_web_server_config(
        &mut config,
        chain,
        key,
        StaticBundleSource::new(ca.bundle_set()),
        authorize_any(),
    )
    .unwrap();

    assert_server_fields_preserved(&config);
}
