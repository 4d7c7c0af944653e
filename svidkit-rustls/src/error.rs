/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by `svidkit-rustls` configuration and material handling.
///
/// Peer verification failures use [`crate::VerifyError`] instead, so the
/// handshake error names the failure class.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The SVID source has no current SVID.
    #[error("svid source has no current SVID: {0}")]
    NoSvid(String),

    /// Failed to create a `rustls::sign::CertifiedKey` from SVID material.
    #[error("failed building rustls certified key: {0}")]
    CertifiedKey(String),

    /// No rustls crypto provider is installed as the process default.
    #[error("rustls crypto provider is not installed")]
    NoCryptoProvider,

    /// Failed to build a rustls verifier.
    #[error("rustls verifier builder error: {0}")]
    VerifierBuilder(String),

    /// A rustls error occurred.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}
