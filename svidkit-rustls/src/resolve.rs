//! Certificate resolvers backed by a live SVID source.
//!
//! Each handshake reads the *current* SVID from the source, so rotated
//! material is picked up without rebuilding the TLS config. A per-SVID cache
//! avoids re-deriving the `CertifiedKey` while the SVID is unchanged.

use crate::material::{certified_key_from_svid, DynSvidSource};
use crate::prelude::warn;
use crate::trace::{GetCertificateInfo, GotCertificateInfo, Trace};
use rustls::client::ResolvesClientCert;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use svidkit::X509Svid;

struct CachedKey {
    // Identity of the SVID the key was derived from.
    svid: Arc<X509Svid>,
    key: Arc<CertifiedKey>,
}

/// Shared resolution logic for both TLS sides.
pub(crate) struct SvidCertResolver {
    source: Arc<dyn DynSvidSource>,
    trace: Trace,
    cache: Mutex<Option<CachedKey>>,
}

impl SvidCertResolver {
    pub(crate) fn new(source: Arc<dyn DynSvidSource>, trace: Trace) -> Self {
        Self {
            source,
            trace,
            cache: Mutex::new(None),
        }
    }

    /// Fetches the current SVID and derives (or reuses) its rustls key.
    ///
    /// Returns `None` when the source has no SVID or the key cannot be
    /// loaded; rustls aborts the handshake in that case.
    pub(crate) fn resolve_key(&self) -> Option<Arc<CertifiedKey>> {
        let trace_value = self.trace.dispatch_pre(&GetCertificateInfo::default());

        let resolved = self.resolve_key_inner();

        self.trace.dispatch_post(
            &GotCertificateInfo {
                cert_resolved: resolved.is_some(),
            },
            trace_value,
        );

        resolved
    }

    fn resolve_key_inner(&self) -> Option<Arc<CertifiedKey>> {
        let svid = match self.source.current_svid() {
            Ok(svid) => svid,
            Err(e) => {
                warn!("No SVID available for handshake: error={e}");
                return None;
            }
        };

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.as_ref() {
            if Arc::ptr_eq(&cached.svid, &svid) {
                return Some(Arc::clone(&cached.key));
            }
        }

        match certified_key_from_svid(&svid) {
            Ok(key) => {
                *cache = Some(CachedKey {
                    svid,
                    key: Arc::clone(&key),
                });
                Some(key)
            }
            Err(e) => {
                warn!("Failed building certified key from SVID: error={e}");
                None
            }
        }
    }
}

impl fmt::Debug for SvidCertResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SvidCertResolver").finish()
    }
}

/// Server-side resolver: presents the current SVID as the server
/// certificate.
#[derive(Debug)]
pub(crate) struct SvidServerCertResolver(pub(crate) SvidCertResolver);

impl ResolvesServerCert for SvidServerCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.0.resolve_key()
    }
}

/// Client-side resolver: presents the current SVID as the client
/// certificate.
#[derive(Debug)]
pub(crate) struct SvidClientCertResolver(pub(crate) SvidCertResolver);

impl ResolvesClientCert for SvidClientCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[rustls::SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.0.resolve_key()
    }

    fn has_certs(&self) -> bool {
        true
    }
}

/// Client-side resolver presenting no certificate.
#[derive(Debug)]
pub(crate) struct NoClientCert;

impl ResolvesClientCert for NoClientCert {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[rustls::SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        None
    }

    fn has_certs(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::test_support::TestCa;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticSource {
        svid: Mutex<Option<Arc<X509Svid>>>,
    }

    impl DynSvidSource for StaticSource {
        fn current_svid(&self) -> Result<Arc<X509Svid>> {
            self.svid
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Error::NoSvid("empty".into()))
        }
    }

    fn make_svid() -> Arc<X509Svid> {
        let ca = TestCa::new("example.org");
        let (chain, key) = ca.issue_svid("spiffe://example.org/service");
        Arc::new(X509Svid::parse_from_der(&chain, &key).unwrap())
    }

    #[test]
    fn resolves_current_svid_and_caches_per_rotation() {
        crate::crypto::ensure_crypto_provider_installed();

        let source = Arc::new(StaticSource {
            svid: Mutex::new(Some(make_svid())),
        });
        let resolver = SvidCertResolver::new(source.clone(), Trace::default());

        let first = resolver.resolve_key().unwrap();
        let again = resolver.resolve_key().unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        // Rotation produces a fresh key.
        *source.svid.lock().unwrap() = Some(make_svid());
        let rotated = resolver.resolve_key().unwrap();
        assert!(!Arc::ptr_eq(&first, &rotated));
    }

    #[test]
    fn missing_svid_resolves_to_none() {
        crate::crypto::ensure_crypto_provider_installed();

        let source = Arc::new(StaticSource {
            svid: Mutex::new(None),
        });
        let resolver = SvidCertResolver::new(source, Trace::default());
        assert!(resolver.resolve_key().is_none());
    }

    #[test]
    fn trace_hooks_fire_once_per_fetch() {
        crate::crypto::ensure_crypto_provider_installed();

        let pre_calls = Arc::new(AtomicUsize::new(0));
        let post_calls = Arc::new(AtomicUsize::new(0));

        let pre = Arc::clone(&pre_calls);
        let post = Arc::clone(&post_calls);
        let trace = Trace {
            pre_get_certificate: Some(Arc::new(move |_| {
                pre.fetch_add(1, Ordering::SeqCst);
                None
            })),
            post_get_certificate: Some(Arc::new(move |info, _| {
                assert!(info.cert_resolved);
                post.fetch_add(1, Ordering::SeqCst);
            })),
        };

        let source = Arc::new(StaticSource {
            svid: Mutex::new(Some(make_svid())),
        });
        let resolver = SvidCertResolver::new(source, trace);

        resolver.resolve_key().unwrap();
        assert_eq!(pre_calls.load(Ordering::SeqCst), 1);
        assert_eq!(post_calls.load(Ordering::SeqCst), 1);
    }
}
