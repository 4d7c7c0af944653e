//! All X.509 materials delivered to a workload in one update.

use crate::constants::DEFAULT_SVID;
use crate::{X509BundleSet, X509Svid};
use std::sync::Arc;

/// A snapshot of the X.509 materials fetched from the Workload API: the
/// ordered list of SVIDs issued to the workload plus the trust bundles.
///
/// SVID order is significant. The first SVID is the workload's default, and
/// the order encodes the agent's preference for hint-based selection.
#[derive(Debug, Clone, PartialEq)]
pub struct X509Context {
    svids: Vec<Arc<X509Svid>>,
    bundle_set: Arc<X509BundleSet>,
}

impl X509Context {
    /// Creates a new [`X509Context`].
    #[must_use]
    pub fn new(
        svids: impl IntoIterator<Item = Arc<X509Svid>>,
        bundle_set: impl Into<Arc<X509BundleSet>>,
    ) -> Self {
        Self {
            svids: svids.into_iter().collect(),
            bundle_set: bundle_set.into(),
        }
    }

    /// Returns the default [`X509Svid`] (the first one), if present.
    pub fn default_svid(&self) -> Option<&Arc<X509Svid>> {
        self.svids.get(DEFAULT_SVID)
    }

    /// Returns all X.509 SVIDs in this context, in preference order.
    pub fn svids(&self) -> &[Arc<X509Svid>] {
        &self.svids
    }

    /// Returns the bundle set associated with this context.
    pub fn bundle_set(&self) -> &Arc<X509BundleSet> {
        &self.bundle_set
    }
}
