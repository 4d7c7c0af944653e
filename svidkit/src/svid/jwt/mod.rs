//! JWT-SVID types.

use std::str::FromStr;

use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{de, Deserialize, Deserializer, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use crate::bundle::jwt::JwtBundle;
use crate::spiffe_id::{SpiffeId, SpiffeIdError, TrustDomain};
use crate::BundleSource;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use time::OffsetDateTime;

const SUPPORTED_ALGORITHMS: &[Algorithm; 8] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

/// A SPIFFE JWT-SVID.
///
/// The serialized token is zeroized on drop.
#[derive(Debug, Clone, PartialEq)]
pub struct JwtSvid {
    spiffe_id: SpiffeId,
    hint: Option<Arc<str>>,
    expiry: OffsetDateTime,
    claims: Claims,
    kid: String,
    alg: Algorithm,
    token: Token,
}

/// Errors arising from parsing or validating a [`JwtSvid`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JwtSvidError {
    /// The `sub` claim is not a valid SPIFFE ID.
    #[error("invalid spiffe_id in token 'sub' claim")]
    InvalidSubject(#[from] SpiffeIdError),

    /// The `kid` header is not present.
    #[error("token header 'kid' not found")]
    MissingKeyId,

    /// The `typ` header holds a value other than `JWT` or `JOSE`.
    #[error("token header 'typ' should be 'JWT' or 'JOSE'")]
    InvalidTyp,

    /// The `alg` header names an unsupported algorithm.
    #[error("algorithm in 'alg' header is not supported")]
    UnsupportedAlgorithm,

    /// No JWT bundle is available for the issuer's trust domain.
    #[error("cannot find JWT bundle for trust domain: {0}")]
    BundleNotFound(TrustDomain),

    /// The bundle holds no authority with the token's `kid`.
    #[error("cannot find JWT authority for key_id: {0}")]
    AuthorityNotFound(String),

    /// The `aud` claim is empty.
    #[error("token 'aud' claim is empty")]
    EmptyAudience,

    /// Error returned by the JWT decoding library (bad signature, expired
    /// token, audience mismatch, malformed token).
    #[error("cannot decode token")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    /// Invalid `exp` claim value.
    #[error("invalid token expiration ('exp') claim")]
    InvalidExpiration,

    /// Error returned by the bundle source while fetching the bundle.
    #[error("bundle source error")]
    BundleSource(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl From<std::convert::Infallible> for JwtSvidError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Zeroize)]
#[zeroize(drop)]
struct Token {
    inner: String,
}

impl From<&str> for Token {
    fn from(token: &str) -> Self {
        Self {
            inner: token.to_owned(),
        }
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

/// Required JWT-SVID claims.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    sub: String,
    #[serde(deserialize_with = "string_or_seq_string")]
    aud: Vec<String>,
    exp: i64,
}

impl Claims {
    /// Returns the SPIFFE ID string from the `sub` claim.
    pub fn sub(&self) -> &str {
        &self.sub
    }

    /// Returns the audience from the `aud` claim.
    pub fn aud(&self) -> &[String] {
        &self.aud
    }

    /// Returns the expiration timestamp from the `exp` claim.
    pub fn exp(&self) -> i64 {
        self.exp
    }
}

impl JwtSvid {
    /// Parses and validates `token`:
    /// - verifies the signature against the issuer's bundle,
    /// - validates expiration (`exp` must be in the future),
    /// - validates that every expected audience is listed in `aud`.
    ///
    /// # Errors
    ///
    /// Returns a [`JwtSvidError`] if the token is malformed, a required
    /// header or claim is missing or invalid, the bundle or authority cannot
    /// be found, the signature does not verify, the token is expired, or the
    /// audience does not match.
    pub fn parse_and_validate<B, T>(
        token: &str,
        bundle_source: &B,
        expected_audience: &[T],
    ) -> Result<Self, JwtSvidError>
    where
        B: BundleSource<Item = JwtBundle>,
        B::Error: std::error::Error + Send + Sync + 'static,
        T: AsRef<str> + fmt::Debug,
    {
        // Untrusted parse to learn trust domain, kid, and alg.
        let untrusted = JwtSvid::parse_insecure(token)?;

        let authority = find_jwt_authority(
            bundle_source,
            untrusted.spiffe_id.trust_domain(),
            &untrusted.kid,
        )?;

        let mut validation = Validation::new(untrusted.alg);
        validation.validate_exp = true;
        let aud: Vec<&str> = expected_audience.iter().map(AsRef::as_ref).collect();
        validation.set_audience(&aud);

        let decoding_key = DecodingKey::from_jwk(&authority)?;
        // Validating decode: signature, exp, aud.
        jsonwebtoken::decode::<Claims>(token, &decoding_key, &validation)?;

        Ok(untrusted)
    }

    /// Parses `token` without verifying its signature.
    ///
    /// The result is untrusted; use [`JwtSvid::parse_and_validate`] for
    /// untrusted inputs.
    ///
    /// # Errors
    ///
    /// Returns a [`JwtSvidError`] if the token or a required header/claim is
    /// malformed.
    pub fn parse_insecure(token: &str) -> Result<Self, JwtSvidError> {
        JwtSvid::from_str(token)
    }

    /// Returns a copy with the given Workload API hint attached.
    ///
    /// The hint is transport metadata, not part of the JWT.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<Arc<str>>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Returns the serialized token.
    pub fn token(&self) -> &str {
        self.token.as_ref()
    }

    /// Returns the SPIFFE ID from the `sub` claim.
    pub fn spiffe_id(&self) -> &SpiffeId {
        &self.spiffe_id
    }

    /// Returns the audience from the `aud` claim.
    pub fn audience(&self) -> &[String] {
        &self.claims.aud
    }

    /// Returns the expiration from the `exp` claim.
    pub fn expiry(&self) -> OffsetDateTime {
        self.expiry
    }

    /// Returns the `kid` header.
    pub fn key_id(&self) -> &str {
        &self.kid
    }

    /// Returns the parsed claims (untrusted unless validated).
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Returns the Workload API hint, if any.
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }
}

impl FromStr for JwtSvid {
    type Err = JwtSvidError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        // Decode without signature or expiration validation.
        let mut validation = Validation::default();
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.insecure_disable_signature_validation();

        let token_data =
            jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?;

        let claims = token_data.claims;
        let spiffe_id = SpiffeId::from_str(&claims.sub)?;

        if claims.aud.is_empty() {
            return Err(JwtSvidError::EmptyAudience);
        }

        let expiry = OffsetDateTime::from_unix_timestamp(claims.exp)
            .map_err(|_| JwtSvidError::InvalidExpiration)?;

        let kid = token_data.header.kid.ok_or(JwtSvidError::MissingKeyId)?;

        // `typ` is optional; validate it when present.
        if let Some(typ) = token_data.header.typ.as_deref() {
            match typ {
                "JWT" | "JOSE" => {}
                _ => return Err(JwtSvidError::InvalidTyp),
            }
        }

        if !SUPPORTED_ALGORITHMS.contains(&token_data.header.alg) {
            return Err(JwtSvidError::UnsupportedAlgorithm);
        }

        Ok(Self {
            spiffe_id,
            hint: None,
            expiry,
            claims,
            kid,
            alg: token_data.header.alg,
            token: Token::from(token),
        })
    }
}

fn find_jwt_authority<B>(
    bundle_source: &B,
    trust_domain: &TrustDomain,
    key_id: &str,
) -> Result<Jwk, JwtSvidError>
where
    B: BundleSource<Item = JwtBundle>,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let bundle = bundle_source
        .bundle_for_trust_domain(trust_domain)
        .map_err(|e| JwtSvidError::BundleSource(Box::new(e)))?
        .ok_or_else(|| JwtSvidError::BundleNotFound(trust_domain.clone()))?;

    bundle
        .find_jwt_authority(key_id)
        .ok_or_else(|| JwtSvidError::AuthorityNotFound(key_id.to_owned()))
}

// Deserializes the 'aud' claim as either a string or a sequence of strings.
fn string_or_seq_string<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec(PhantomData<Vec<String>>);

    impl<'de> de::Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("string or sequence of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![value.to_owned()])
        }

        fn visit_seq<S>(self, visitor: S) -> Result<Self::Value, S::Error>
        where
            S: de::SeqAccess<'de>,
        {
            Deserialize::deserialize(de::value::SeqAccessDeserializer::new(visitor))
        }
    }

    deserializer.deserialize_any(StringOrVec(PhantomData))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::jwt::JwtBundleSet;
    use jsonwebtoken::EncodingKey;

    const FAR_FUTURE: i64 = 4_294_967_295;

    fn generate_key(kid: &str) -> (EncodingKey, Jwk) {
        let key = jsonwebkey::Key::generate_p256();
        let encoding_key = EncodingKey::from_ec_der(&key.to_der());

        let mut jwt_key = jsonwebkey::JsonWebKey::new(key);
        jwt_key.set_algorithm(jsonwebkey::Algorithm::ES256).unwrap();
        jwt_key.key_id = Some(kid.to_string());

        let serialized = serde_json::to_string(&jwt_key).unwrap();
        let jwk = serde_json::from_str(&serialized).unwrap();
        (encoding_key, jwk)
    }

    fn bundle_source_with(jwk: Jwk) -> JwtBundleSet {
        let bundle = JwtBundle::new(TrustDomain::new("example.org").unwrap());
        bundle.add_jwt_authority(jwk).unwrap();
        let mut set = JwtBundleSet::new();
        set.add_bundle(bundle);
        set
    }

    fn generate_token(
        aud: Vec<String>,
        sub: &str,
        typ: Option<&str>,
        kid: Option<&str>,
        exp: i64,
        alg: Algorithm,
        encoding_key: &EncodingKey,
    ) -> String {
        let claims = Claims {
            sub: sub.to_owned(),
            aud,
            exp,
        };
        let header = jsonwebtoken::Header {
            typ: typ.map(str::to_owned),
            alg,
            kid: kid.map(str::to_owned),
            ..Default::default()
        };
        jsonwebtoken::encode(&header, &claims, encoding_key).unwrap()
    }

    #[test]
    fn parse_and_validate_roundtrip() {
        let (encoding_key, jwk) = generate_key("test-key-id");
        let token = generate_token(
            vec!["audience".to_owned()],
            "spiffe://example.org/service",
            Some("JWT"),
            Some("test-key-id"),
            FAR_FUTURE,
            Algorithm::ES256,
            &encoding_key,
        );
        let source = bundle_source_with(jwk);

        let svid = JwtSvid::parse_and_validate(&token, &source, &["audience"]).unwrap();

        assert_eq!(
            svid.spiffe_id(),
            &SpiffeId::new("spiffe://example.org/service").unwrap()
        );
        assert_eq!(svid.audience(), ["audience"]);
        assert_eq!(svid.key_id(), "test-key-id");
        assert_eq!(svid.token(), token);
    }

    #[test]
    fn validate_rejects_wrong_audience() {
        let (encoding_key, jwk) = generate_key("test-key-id");
        let token = generate_token(
            vec!["audience".to_owned()],
            "spiffe://example.org/service",
            Some("JWT"),
            Some("test-key-id"),
            FAR_FUTURE,
            Algorithm::ES256,
            &encoding_key,
        );
        let source = bundle_source_with(jwk);

        let err = JwtSvid::parse_and_validate(&token, &source, &["other-audience"]).unwrap_err();
        assert!(matches!(err, JwtSvidError::InvalidToken(..)));
    }

    #[test]
    fn validate_rejects_expired_token() {
        let (encoding_key, jwk) = generate_key("test-key-id");
        let token = generate_token(
            vec!["audience".to_owned()],
            "spiffe://example.org/service",
            Some("JWT"),
            Some("test-key-id"),
            1,
            Algorithm::ES256,
            &encoding_key,
        );
        let source = bundle_source_with(jwk);

        let err = JwtSvid::parse_and_validate(&token, &source, &["audience"]).unwrap_err();
        assert!(matches!(err, JwtSvidError::InvalidToken(..)));
    }

    #[test]
    fn validate_fails_without_bundle_for_trust_domain() {
        let (encoding_key, _) = generate_key("test-key-id");
        let token = generate_token(
            vec!["audience".to_owned()],
            "spiffe://other.org/service",
            Some("JWT"),
            Some("test-key-id"),
            FAR_FUTURE,
            Algorithm::ES256,
            &encoding_key,
        );
        let (_, jwk) = generate_key("test-key-id");
        let source = bundle_source_with(jwk); // bundle is for example.org only

        let err = JwtSvid::parse_and_validate(&token, &source, &["audience"]).unwrap_err();
        assert!(matches!(err, JwtSvidError::BundleNotFound(..)));
    }

    #[test]
    fn validate_fails_without_authority_for_kid() {
        let (encoding_key, jwk) = generate_key("known-kid");
        let token = generate_token(
            vec!["audience".to_owned()],
            "spiffe://example.org/service",
            Some("JWT"),
            Some("unknown-kid"),
            FAR_FUTURE,
            Algorithm::ES256,
            &encoding_key,
        );
        let source = bundle_source_with(jwk);

        let err = JwtSvid::parse_and_validate(&token, &source, &["audience"]).unwrap_err();
        assert!(matches!(err, JwtSvidError::AuthorityNotFound(kid) if kid == "unknown-kid"));
    }

    #[test]
    fn parse_insecure_rejects_unsupported_algorithm() {
        let token = generate_token(
            vec!["audience".to_owned()],
            "spiffe://example.org/service",
            Some("JWT"),
            Some("kid"),
            FAR_FUTURE,
            Algorithm::HS256,
            &EncodingKey::from_secret(b"secret"),
        );

        let err = JwtSvid::parse_insecure(&token).unwrap_err();
        assert!(matches!(err, JwtSvidError::UnsupportedAlgorithm));
    }

    #[test]
    fn parse_insecure_rejects_missing_kid() {
        let (encoding_key, _) = generate_key("unused");
        let token = generate_token(
            vec!["audience".to_owned()],
            "spiffe://example.org/service",
            Some("JWT"),
            None,
            FAR_FUTURE,
            Algorithm::ES256,
            &encoding_key,
        );

        let err = JwtSvid::parse_insecure(&token).unwrap_err();
        assert!(matches!(err, JwtSvidError::MissingKeyId));
    }

    #[test]
    fn parse_insecure_rejects_bad_typ() {
        let (encoding_key, _) = generate_key("unused");
        let token = generate_token(
            vec!["audience".to_owned()],
            "spiffe://example.org/service",
            Some("OTHER"),
            Some("kid"),
            FAR_FUTURE,
            Algorithm::ES256,
            &encoding_key,
        );

        let err = JwtSvid::parse_insecure(&token).unwrap_err();
        assert!(matches!(err, JwtSvidError::InvalidTyp));
    }

    #[test]
    fn parse_insecure_rejects_invalid_subject() {
        let (encoding_key, _) = generate_key("unused");
        let token = generate_token(
            vec!["audience".to_owned()],
            "not-a-spiffe-id",
            Some("JWT"),
            Some("kid"),
            FAR_FUTURE,
            Algorithm::ES256,
            &encoding_key,
        );

        let err = JwtSvid::parse_insecure(&token).unwrap_err();
        assert!(matches!(err, JwtSvidError::InvalidSubject(..)));
    }

    #[test]
    fn hint_is_transport_metadata() {
        let (encoding_key, _) = generate_key("unused");
        let token = generate_token(
            vec!["audience".to_owned()],
            "spiffe://example.org/service",
            Some("JWT"),
            Some("kid"),
            FAR_FUTURE,
            Algorithm::ES256,
            &encoding_key,
        );

        let svid = JwtSvid::parse_insecure(&token).unwrap();
        assert_eq!(svid.hint(), None);
        let svid = svid.with_hint("internal");
        assert_eq!(svid.hint(), Some("internal"));
    }
}
