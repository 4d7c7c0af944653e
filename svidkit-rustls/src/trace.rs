//! Optional lifecycle hooks around certificate fetches.
//!
//! A [`Trace`] carries two optional hooks invoked by the certificate
//! resolvers: one before the SVID is fetched from the source, one after.
//! The value returned by the pre hook is passed through to the post hook.
//! Absent hooks are never invoked.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque value passed from the pre hook to the post hook.
pub type TraceValue = Box<dyn Any + Send>;

/// Information handed to the pre-fetch hook.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct GetCertificateInfo {}

/// Information handed to the post-fetch hook.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct GotCertificateInfo {
    /// Whether a certificate was produced.
    pub cert_resolved: bool,
}

type PreGetCertificate =
    Arc<dyn Fn(&GetCertificateInfo) -> Option<TraceValue> + Send + Sync + 'static>;
type PostGetCertificate = Arc<dyn Fn(&GotCertificateInfo, Option<TraceValue>) + Send + Sync + 'static>;

/// Hooks observing certificate fetches.
#[derive(Clone, Default)]
pub struct Trace {
    /// Called before a certificate is resolved from the source. The return
    /// value is handed to [`Trace::post_get_certificate`].
    pub pre_get_certificate: Option<PreGetCertificate>,

    /// Called after the resolution attempt, with the pre hook's value.
    pub post_get_certificate: Option<PostGetCertificate>,
}

impl Trace {
    /// Dispatches the pre hook, if set.
    pub(crate) fn dispatch_pre(&self, info: &GetCertificateInfo) -> Option<TraceValue> {
        self.pre_get_certificate.as_ref().and_then(|hook| hook(info))
    }

    /// Dispatches the post hook, if set.
    pub(crate) fn dispatch_post(&self, info: &GotCertificateInfo, value: Option<TraceValue>) {
        if let Some(hook) = self.post_get_certificate.as_ref() {
            hook(info, value);
        }
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trace")
            .field(
                "pre_get_certificate",
                &self.pre_get_certificate.as_ref().map(|_| "<hook>"),
            )
            .field(
                "post_get_certificate",
                &self.post_get_certificate.as_ref().map(|_| "<hook>"),
            )
            .finish()
    }
}
