//! Authorization policies applied to peer SPIFFE IDs after chain
//! verification succeeds.
//!
//! Authorizers are pure predicates over the peer's SPIFFE ID and the
//! verified chains: deterministic and free of I/O. Implementations must be
//! thread-safe.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use svidkit::cert::Certificate;
use svidkit::{SpiffeId, TrustDomain};

/// Error produced when an [`Authorizer`] rejects a peer.
///
/// The message always identifies the observed SPIFFE ID or trust domain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AuthorizerError {
    message: String,
}

impl AuthorizerError {
    /// Creates a rejection with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Authorization policy for peer SPIFFE IDs.
///
/// Runs **after** cryptographic verification succeeds; its error becomes the
/// verification error surfaced to the TLS handshake.
pub trait Authorizer: Send + Sync + 'static {
    /// Returns `Ok(())` if the peer is authorized.
    ///
    /// `verified_chains` holds the chains that validated against the trust
    /// bundle, outer-first.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthorizerError`] naming the rejected peer.
    fn authorize(
        &self,
        peer: &SpiffeId,
        verified_chains: &[Vec<Certificate>],
    ) -> Result<(), AuthorizerError>;
}

impl Authorizer for Arc<dyn Authorizer> {
    fn authorize(
        &self,
        peer: &SpiffeId,
        verified_chains: &[Vec<Certificate>],
    ) -> Result<(), AuthorizerError> {
        (**self).authorize(peer, verified_chains)
    }
}

/// Authorizes any SPIFFE ID (authentication only).
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizeAny;

impl Authorizer for AuthorizeAny {
    fn authorize(&self, _peer: &SpiffeId, _chains: &[Vec<Certificate>]) -> Result<(), AuthorizerError> {
        Ok(())
    }
}

/// Authorizes exactly one SPIFFE ID.
#[derive(Debug, Clone)]
pub struct AuthorizeId {
    expected: SpiffeId,
}

impl Authorizer for AuthorizeId {
    fn authorize(&self, peer: &SpiffeId, _chains: &[Vec<Certificate>]) -> Result<(), AuthorizerError> {
        if peer == &self.expected {
            Ok(())
        } else {
            Err(AuthorizerError::new(format!("unexpected ID {:?}", peer.to_string())))
        }
    }
}

/// Authorizes any SPIFFE ID in a given trust domain.
#[derive(Debug, Clone)]
pub struct AuthorizeMemberOf {
    trust_domain: TrustDomain,
}

impl Authorizer for AuthorizeMemberOf {
    fn authorize(&self, peer: &SpiffeId, _chains: &[Vec<Certificate>]) -> Result<(), AuthorizerError> {
        if peer.is_member_of(&self.trust_domain) {
            Ok(())
        } else {
            Err(AuthorizerError::new(format!(
                "unexpected trust domain {:?}",
                peer.trust_domain().to_string()
            )))
        }
    }
}

/// Authorizes any SPIFFE ID in an allow list.
#[derive(Debug, Clone)]
pub struct AuthorizeOneOf {
    allowed: Arc<BTreeSet<SpiffeId>>,
}

impl Authorizer for AuthorizeOneOf {
    fn authorize(&self, peer: &SpiffeId, _chains: &[Vec<Certificate>]) -> Result<(), AuthorizerError> {
        if self.allowed.contains(peer) {
            Ok(())
        } else {
            Err(AuthorizerError::new(format!("unexpected ID {:?}", peer.to_string())))
        }
    }
}

/// Authorizes SPIFFE IDs matching a caller-supplied predicate.
#[derive(Clone)]
pub struct AuthorizeMatches<F> {
    predicate: F,
}

impl<F> fmt::Debug for AuthorizeMatches<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizeMatches").finish()
    }
}

impl<F> Authorizer for AuthorizeMatches<F>
where
    F: Fn(&SpiffeId) -> bool + Send + Sync + 'static,
{
    fn authorize(&self, peer: &SpiffeId, _chains: &[Vec<Certificate>]) -> Result<(), AuthorizerError> {
        if (self.predicate)(peer) {
            Ok(())
        } else {
            Err(AuthorizerError::new(format!(
                "authorizer rejected ID {:?}",
                peer.to_string()
            )))
        }
    }
}

/// Returns an authorizer that accepts any SPIFFE ID.
///
/// Authentication (certificate verification) still applies; use this when
/// authorization happens at another layer.
pub fn authorize_any() -> AuthorizeAny {
    AuthorizeAny
}

/// Returns an authorizer that accepts exactly `expected`.
pub fn authorize_id(expected: SpiffeId) -> AuthorizeId {
    AuthorizeId { expected }
}

/// Returns an authorizer that accepts any SPIFFE ID in `trust_domain`.
///
/// Rejections carry the message `unexpected trust domain "<peer domain>"`.
pub fn authorize_member_of(trust_domain: TrustDomain) -> AuthorizeMemberOf {
    AuthorizeMemberOf { trust_domain }
}

/// Returns an authorizer that accepts any of the given SPIFFE IDs.
///
/// An empty list authorizes nothing.
pub fn authorize_one_of<I>(ids: I) -> AuthorizeOneOf
where
    I: IntoIterator<Item = SpiffeId>,
{
    AuthorizeOneOf {
        allowed: Arc::new(ids.into_iter().collect()),
    }
}

/// Returns an authorizer backed by a predicate over the peer SPIFFE ID.
///
/// The predicate must be deterministic and free of I/O.
pub fn authorize_matches<F>(predicate: F) -> AuthorizeMatches<F>
where
    F: Fn(&SpiffeId) -> bool + Send + Sync + 'static,
{
    AuthorizeMatches { predicate }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> SpiffeId {
        SpiffeId::new(s).unwrap()
    }

    #[test]
    fn any_accepts_everything() {
        let auth = authorize_any();
        assert!(auth.authorize(&id("spiffe://example.org/a"), &[]).is_ok());
        assert!(auth.authorize(&id("spiffe://other.org/b"), &[]).is_ok());
    }

    #[test]
    fn id_accepts_exact_match_only() {
        let auth = authorize_id(id("spiffe://example.org/backend"));
        assert!(auth.authorize(&id("spiffe://example.org/backend"), &[]).is_ok());

        let err = auth
            .authorize(&id("spiffe://example.org/other"), &[])
            .unwrap_err();
        assert_eq!(err.to_string(), "unexpected ID \"spiffe://example.org/other\"");
    }

    #[test]
    fn member_of_names_the_observed_trust_domain() {
        let auth = authorize_member_of(TrustDomain::new("domain2.test").unwrap());
        assert!(auth.authorize(&id("spiffe://domain2.test/a"), &[]).is_ok());

        let err = auth.authorize(&id("spiffe://domain1.test/a"), &[]).unwrap_err();
        assert_eq!(err.to_string(), "unexpected trust domain \"domain1.test\"");
    }

    #[test]
    fn one_of_accepts_listed_ids() {
        let auth = authorize_one_of([
            id("spiffe://example.org/a"),
            id("spiffe://example.org/b"),
        ]);
        assert!(auth.authorize(&id("spiffe://example.org/a"), &[]).is_ok());
        assert!(auth.authorize(&id("spiffe://example.org/b"), &[]).is_ok());
        assert!(auth.authorize(&id("spiffe://example.org/c"), &[]).is_err());
    }

    #[test]
    fn one_of_empty_authorizes_nothing() {
        let auth = authorize_one_of([]);
        assert!(auth.authorize(&id("spiffe://example.org/a"), &[]).is_err());
    }

    #[test]
    fn matches_runs_the_predicate() {
        let auth = authorize_matches(|peer: &SpiffeId| peer.path().starts_with("/api/"));
        assert!(auth.authorize(&id("spiffe://example.org/api/v1"), &[]).is_ok());

        let err = auth.authorize(&id("spiffe://example.org/web"), &[]).unwrap_err();
        assert!(err.to_string().contains("spiffe://example.org/web"));
    }
}
