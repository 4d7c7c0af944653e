use crate::workload_api::error::WorkloadApiError;
use crate::workload_api::WorkloadApiClient;
use crate::X509Svid;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Strategy for selecting an X.509 SVID when multiple SVIDs are available.
///
/// The picker runs against every new context received from the Workload API.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use svidkit::x509_source::SvidPicker;
/// use svidkit::X509Svid;
///
/// #[derive(Debug)]
/// struct HintPicker {
///     hint: String,
/// }
///
/// impl SvidPicker for HintPicker {
///     fn pick_svid(&self, svids: &[Arc<X509Svid>]) -> Option<usize> {
///         svids.iter().position(|svid| svid.hint() == Some(self.hint.as_str()))
///     }
/// }
/// ```
pub trait SvidPicker: Send + Sync + 'static {
    /// Selects an SVID by returning its index into `svids`, or `None` if no
    /// suitable SVID exists.
    fn pick_svid(&self, svids: &[Arc<X509Svid>]) -> Option<usize>;
}

/// Picks the SVID whose Workload API hint equals the configured name.
///
/// This implements the default-SVID-by-name selection rule; the first
/// matching SVID in preference order wins.
#[derive(Debug, Clone)]
pub(super) struct HintPicker {
    pub(super) hint: String,
}

impl SvidPicker for HintPicker {
    fn pick_svid(&self, svids: &[Arc<X509Svid>]) -> Option<usize> {
        svids
            .iter()
            .position(|svid| svid.hint() == Some(self.hint.as_str()))
    }
}

/// Boxed future resolving to a connected Workload API client.
pub type ClientFuture =
    Pin<Box<dyn Future<Output = Result<WorkloadApiClient, WorkloadApiError>> + Send + 'static>>;

/// Factory producing connected Workload API clients; injectable for tests.
pub type ClientFactory = Arc<dyn Fn() -> ClientFuture + Send + Sync + 'static>;
