//! End-to-end handshake tests over a loopback TCP connection.

mod common;

use common::{StaticBundleSource, StaticSvidSource, TestCa};
use rustls::pki_types::ServerName;
use std::sync::Arc;
use svidkit::TrustDomain;
use svidkit_rustls::authorizer::{authorize_any, authorize_member_of};
use svidkit_rustls::{
    mtls_client_config, mtls_server_config, tls_client_config, tls_server_config, Trace,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Runs one connection: the client writes 0x01, the server echoes 0x02.
///
/// Returns (client outcome, server outcome) where the outcome is the error
/// rendered as a string, or `None` on success.
async fn run_connection(
    server_config: rustls::ServerConfig,
    client_config: rustls::ClientConfig,
) -> (Option<String>, Option<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let acceptor = TlsAcceptor::from(Arc::new(server_config));
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut tls = match acceptor.accept(tcp).await {
            Ok(tls) => tls,
            Err(e) => return Some(format!("{e}")),
        };

        let mut buf = [0u8; 1];
        if let Err(e) = tls.read_exact(&mut buf).await {
            return Some(format!("{e}"));
        }
        assert_eq!(buf, [0x01]);

        if let Err(e) = tls.write_all(&[0x02]).await {
            return Some(format!("{e}"));
        }
        let _ = tls.shutdown().await;
        None
    });

    let connector = TlsConnector::from(Arc::new(client_config));
    let client_outcome = async {
        let tcp = TcpStream::connect(addr).await.unwrap();
        let server_name = ServerName::try_from("server.test").unwrap();
        let mut tls = match connector.connect(server_name, tcp).await {
            Ok(tls) => tls,
            Err(e) => return Some(format!("{e}")),
        };

        if let Err(e) = tls.write_all(&[0x01]).await {
            return Some(format!("{e}"));
        }
        let mut buf = [0u8; 1];
        if let Err(e) = tls.read_exact(&mut buf).await {
            return Some(format!("{e}"));
        }
        assert_eq!(buf, [0x02]);
        None
    }
    .await;

    let server_outcome = server.await.unwrap();
    (client_outcome, server_outcome)
}

#[tokio::test]
async fn mtls_happy_path_echoes_bytes() {
    let ca = TestCa::new("domain1.test");
    let server_svid = ca.issue_svid("spiffe://domain1.test/server");
    let client_svid = ca.issue_svid("spiffe://domain1.test/client");

    let server_config = mtls_server_config(
        StaticSvidSource::new(server_svid),
        StaticBundleSource::new(ca.bundle_set()),
        authorize_any(),
        Trace::default(),
    )
    .unwrap();

    let client_config = mtls_client_config(
        StaticSvidSource::new(client_svid),
        StaticBundleSource::new(ca.bundle_set()),
        authorize_any(),
        Trace::default(),
    )
    .unwrap();

    let (client_err, server_err) = run_connection(server_config, client_config).await;
    assert_eq!(client_err, None);
    assert_eq!(server_err, None);
}

#[tokio::test]
async fn tls_happy_path_without_client_auth() {
    let ca = TestCa::new("domain1.test");
    let server_svid = ca.issue_svid("spiffe://domain1.test/server");

    let server_config =
        tls_server_config(StaticSvidSource::new(server_svid), Trace::default()).unwrap();

    let client_config = tls_client_config(
        StaticBundleSource::new(ca.bundle_set()),
        authorize_member_of(TrustDomain::new("domain1.test").unwrap()),
    )
    .unwrap();

    let (client_err, server_err) = run_connection(server_config, client_config).await;
    assert_eq!(client_err, None);
    assert_eq!(server_err, None);
}

#[tokio::test]
async fn client_authorizer_rejection_fails_the_handshake() {
    let ca = TestCa::new("domain1.test");
    let server_svid = ca.issue_svid("spiffe://domain1.test/server");
    let client_svid = ca.issue_svid("spiffe://domain1.test/client");

    let server_config = mtls_server_config(
        StaticSvidSource::new(server_svid),
        StaticBundleSource::new(ca.bundle_set()),
        authorize_any(),
        Trace::default(),
    )
    .unwrap();

    // The client only authorizes servers from domain2.test.
    let client_config = mtls_client_config(
        StaticSvidSource::new(client_svid),
        StaticBundleSource::new(ca.bundle_set()),
        authorize_member_of(TrustDomain::new("domain2.test").unwrap()),
        Trace::default(),
    )
    .unwrap();

    let (client_err, server_err) = run_connection(server_config, client_config).await;

    let client_err = client_err.expect("client handshake must fail");
    assert!(
        client_err.contains("unexpected trust domain \"domain1.test\""),
        "unexpected client error: {client_err}"
    );
    assert!(server_err.is_some(), "server must observe the aborted handshake");
}

#[tokio::test]
async fn server_authorizer_rejection_fails_the_handshake() {
    let ca = TestCa::new("domain1.test");
    let server_svid = ca.issue_svid("spiffe://domain1.test/server");
    let client_svid = ca.issue_svid("spiffe://domain1.test/client");

    // The server only authorizes clients from domain2.test.
    let server_config = mtls_server_config(
        StaticSvidSource::new(server_svid),
        StaticBundleSource::new(ca.bundle_set()),
        authorize_member_of(TrustDomain::new("domain2.test").unwrap()),
        Trace::default(),
    )
    .unwrap();

    let client_config = mtls_client_config(
        StaticSvidSource::new(client_svid),
        StaticBundleSource::new(ca.bundle_set()),
        authorize_any(),
        Trace::default(),
    )
    .unwrap();

    let (client_err, server_err) = run_connection(server_config, client_config).await;

    let server_err = server_err.expect("server handshake must fail");
    assert!(
        server_err.contains("unexpected trust domain \"domain1.test\""),
        "unexpected server error: {server_err}"
    );
    assert!(client_err.is_some(), "client must observe the aborted handshake");
}

#[tokio::test]
async fn missing_bundle_for_peer_trust_domain_fails_the_handshake() {
    let ca1 = TestCa::new("domain1.test");
    let ca2 = TestCa::new("domain2.test");
    let server_svid = ca1.issue_svid("spiffe://domain1.test/server");
    let client_svid = ca1.issue_svid("spiffe://domain1.test/client");

    let server_config = mtls_server_config(
        StaticSvidSource::new(server_svid),
        StaticBundleSource::new(ca1.bundle_set()),
        authorize_any(),
        Trace::default(),
    )
    .unwrap();

    // The client's bundles cover a different trust domain entirely.
    let client_config = mtls_client_config(
        StaticSvidSource::new(client_svid),
        StaticBundleSource::new(ca2.bundle_set()),
        authorize_any(),
        Trace::default(),
    )
    .unwrap();

    let (client_err, server_err) = run_connection(server_config, client_config).await;

    let client_err = client_err.expect("client handshake must fail");
    assert!(
        client_err
            .contains("could not get X509 bundle: no X.509 bundle found for trust domain: \"domain1.test\""),
        "unexpected client error: {client_err}"
    );
    assert!(server_err.is_some(), "server must observe the aborted handshake");
}

#[tokio::test]
async fn unknown_authority_fails_the_handshake() {
    let ca = TestCa::new("domain1.test");
    // Same trust domain name, different CA key.
    let rogue_ca = TestCa::new("domain1.test");
    let server_svid = ca.issue_svid("spiffe://domain1.test/server");
    let client_svid = ca.issue_svid("spiffe://domain1.test/client");

    let server_config = mtls_server_config(
        StaticSvidSource::new(server_svid),
        StaticBundleSource::new(ca.bundle_set()),
        authorize_any(),
        Trace::default(),
    )
    .unwrap();

    let client_config = mtls_client_config(
        StaticSvidSource::new(client_svid),
        StaticBundleSource::new(rogue_ca.bundle_set()),
        authorize_any(),
        Trace::default(),
    )
    .unwrap();

    let (client_err, server_err) = run_connection(server_config, client_config).await;

    let client_err = client_err.expect("client handshake must fail");
    assert!(
        client_err.contains("could not verify leaf certificate"),
        "unexpected client error: {client_err}"
    );
    assert!(server_err.is_some(), "server must observe the aborted handshake");
}

#[tokio::test]
async fn mtls_web_handshake_mixes_web_pki_and_spiffe() {
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use svidkit_rustls::{mtls_web_client_config, mtls_web_server_config};

    let web_ca = TestCa::new("web-ca.test");
    let spiffe_ca = TestCa::new("domain1.test");

    // The server presents a fixed web certificate for "server.test".
    let (chain_der, key_der) = web_ca.issue_web_cert("server.test");
    let chain = vec![CertificateDer::from(chain_der)];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der));

    let server_config = mtls_web_server_config(
        chain,
        key,
        StaticBundleSource::new(spiffe_ca.bundle_set()),
        authorize_member_of(TrustDomain::new("domain1.test").unwrap()),
    )
    .unwrap();

    // The client trusts the web CA for the server and presents its SVID.
    let mut roots = rustls::RootCertStore::empty();
    roots.add(CertificateDer::from(web_ca.ca_der())).unwrap();

    let client_svid = spiffe_ca.issue_svid("spiffe://domain1.test/client");
    let client_config = mtls_web_client_config(
        StaticSvidSource::new(client_svid),
        roots,
        Trace::default(),
    )
    .unwrap();

    let (client_err, server_err) = run_connection(server_config, client_config).await;
    assert_eq!(client_err, None);
    assert_eq!(server_err, None);
}

#[tokio::test]
async fn trace_hooks_observe_one_fetch_per_handshake() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let ca = TestCa::new("domain1.test");
    let server_svid = ca.issue_svid("spiffe://domain1.test/server");

    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fetches);
    let trace = Trace {
        pre_get_certificate: Some(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        })),
        post_get_certificate: None,
    };

    let server_config = tls_server_config(StaticSvidSource::new(server_svid), trace).unwrap();
    let client_config = tls_client_config(
        StaticBundleSource::new(ca.bundle_set()),
        authorize_any(),
    )
    .unwrap();

    let (client_err, server_err) = run_connection(server_config, client_config).await;
    assert_eq!(client_err, None);
    assert_eq!(server_err, None);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}
