//! JWT bundle types.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use jsonwebtoken::jwk::{Jwk, JwkSet};
use thiserror::Error;

use crate::bundle::BundleSource;
use crate::spiffe_id::TrustDomain;
use std::convert::Infallible;
use std::sync::Arc;

/// A collection of trusted JWT authorities (public keys) for a [`TrustDomain`].
///
/// Mutations take an internal writer lock; readers receive snapshots.
#[derive(Debug)]
pub struct JwtBundle {
    trust_domain: TrustDomain,
    authorities: RwLock<HashMap<String, Jwk>>,
}

/// A set of [`JwtBundle`], keyed by [`TrustDomain`].
#[derive(Debug, Clone, Default)]
pub struct JwtBundleSet {
    bundles: HashMap<TrustDomain, Arc<JwtBundle>>,
}

/// An error that can arise building a [`JwtBundle`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JwtBundleError {
    /// A JWT authority is missing the key ID that identifies it.
    #[error("missing key ID")]
    MissingKeyId,

    /// The bytes are not a deserializable JSON JWK set.
    #[error("cannot deserialize json jwk set")]
    Deserialize(#[from] serde_json::Error),
}

impl JwtBundle {
    /// Creates an empty bundle for the given [`TrustDomain`].
    pub fn new(trust_domain: TrustDomain) -> Self {
        Self {
            trust_domain,
            authorities: RwLock::new(HashMap::new()),
        }
    }

    /// Parses a bundle from a standard RFC 7517 JWKS document.
    ///
    /// Every key in the document must carry a `kid`.
    ///
    /// # Errors
    ///
    /// Returns a [`JwtBundleError`] if the document cannot be deserialized or
    /// a key has no key ID.
    ///
    /// # Examples
    ///
    /// ```
    /// use svidkit::{JwtBundle, TrustDomain};
    ///
    /// let jwks = r#"{
    ///     "keys": [
    ///         {
    ///             "kty": "EC",
    ///             "kid": "C6vs25welZOx6WksNYfbMfiw9l96pMnD",
    ///             "crv": "P-256",
    ///             "x": "ngLYQnlfF6GsojUwqtcEE3WgTNG2RUlsGhK73RNEl5k",
    ///             "y": "tKbiDSUSsQ3F1P7wteeHNXIcU-cx6CgSbroeQrQHTLM"
    ///         }
    ///     ]
    ///  }"#;
    /// let td = TrustDomain::new("example.org").unwrap();
    /// let bundle = JwtBundle::from_jwt_authorities(td, jwks.as_bytes()).unwrap();
    ///
    /// assert!(bundle
    ///     .find_jwt_authority("C6vs25welZOx6WksNYfbMfiw9l96pMnD")
    ///     .is_some());
    /// ```
    pub fn from_jwt_authorities(
        trust_domain: TrustDomain,
        jwt_authorities: &[u8],
    ) -> Result<Self, JwtBundleError> {
        let jwk_set: JwkSet = serde_json::from_slice(jwt_authorities)?;

        let mut authorities = HashMap::new();
        for key in jwk_set.keys {
            let key_id = key
                .common
                .key_id
                .clone()
                .ok_or(JwtBundleError::MissingKeyId)?;
            authorities.insert(key_id, key);
        }

        Ok(Self {
            trust_domain,
            authorities: RwLock::new(authorities),
        })
    }

    /// Returns the JWT authority with the given key ID, if present.
    pub fn find_jwt_authority(&self, key_id: &str) -> Option<Jwk> {
        self.read_authorities().get(key_id).cloned()
    }

    /// Adds a JWT authority to the bundle, replacing any existing key with
    /// the same key ID.
    ///
    /// # Errors
    ///
    /// Returns [`JwtBundleError::MissingKeyId`] if the key carries no `kid`.
    pub fn add_jwt_authority(&self, authority: Jwk) -> Result<(), JwtBundleError> {
        let key_id = authority
            .common
            .key_id
            .clone()
            .ok_or(JwtBundleError::MissingKeyId)?;

        self.write_authorities().insert(key_id, authority);
        Ok(())
    }

    /// Removes the JWT authority with the given key ID, if present.
    pub fn remove_jwt_authority(&self, key_id: &str) {
        self.write_authorities().remove(key_id);
    }

    /// Returns a snapshot of the authorities keyed by key ID.
    pub fn jwt_authorities(&self) -> HashMap<String, Jwk> {
        self.read_authorities().clone()
    }

    /// Returns the [`TrustDomain`] associated with the bundle.
    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    fn read_authorities(&self) -> RwLockReadGuard<'_, HashMap<String, Jwk>> {
        self.authorities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_authorities(&self) -> RwLockWriteGuard<'_, HashMap<String, Jwk>> {
        self.authorities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for JwtBundle {
    fn clone(&self) -> Self {
        Self {
            trust_domain: self.trust_domain.clone(),
            authorities: RwLock::new(self.jwt_authorities()),
        }
    }
}

impl PartialEq for JwtBundle {
    fn eq(&self, other: &Self) -> bool {
        self.trust_domain == other.trust_domain
            && *self.read_authorities() == other.jwt_authorities()
    }
}

impl JwtBundleSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a bundle, replacing any existing bundle for its trust domain.
    pub fn add_bundle(&mut self, bundle: JwtBundle) {
        self.bundles
            .insert(bundle.trust_domain().clone(), Arc::new(bundle));
    }

    /// Returns the bundle for the given trust domain, if any.
    pub fn get_bundle(&self, trust_domain: &TrustDomain) -> Option<Arc<JwtBundle>> {
        self.bundles.get(trust_domain).cloned()
    }

    /// Returns the number of bundles in the set.
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Returns `true` if the set holds no bundles.
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

impl BundleSource for JwtBundleSet {
    type Item = JwtBundle;
    type Error = Infallible;

    fn bundle_for_trust_domain(
        &self,
        trust_domain: &TrustDomain,
    ) -> Result<Option<Arc<Self::Item>>, Self::Error> {
        Ok(self.bundles.get(trust_domain).cloned())
    }
}
