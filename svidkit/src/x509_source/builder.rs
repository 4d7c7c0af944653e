use super::errors::X509SourceError;
use super::source::X509Source;
use super::types::{ClientFactory, HintPicker, SvidPicker};
use crate::workload_api::WorkloadApiClient;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Reconnect/backoff configuration.
///
/// When the Workload API connection fails, the source retries with
/// exponential backoff between `min_backoff` and `max_backoff`, with jitter
/// to avoid synchronized reconnect storms. Inverted bounds are swapped at
/// the construction boundary.
#[derive(Clone, Copy, Debug)]
pub struct ReconnectConfig {
    /// Initial delay before retrying.
    pub min_backoff: Duration,
    /// Maximum delay between retries.
    pub max_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    pub(crate) fn normalize(mut self) -> Self {
        if self.min_backoff > self.max_backoff {
            std::mem::swap(&mut self.min_backoff, &mut self.max_backoff);
        }
        self
    }
}

/// Best-effort limits on material accepted from the agent.
///
/// Limits are enforced before a new context is published; a violating update
/// is rejected and the previous snapshot retained. `None` disables the
/// corresponding limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum number of SVIDs allowed in a context.
    pub max_svids: Option<usize>,
    /// Maximum number of bundles allowed in a bundle set.
    pub max_bundles: Option<usize>,
    /// Maximum summed DER size in bytes per bundle.
    pub max_bundle_der_bytes: Option<usize>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        // Conservative defaults; typical workloads sit far below these.
        Self {
            max_svids: Some(100),
            max_bundles: Some(200),
            max_bundle_der_bytes: Some(4 * 1024 * 1024),
        }
    }
}

impl ResourceLimits {
    /// Returns limits with every bound disabled.
    pub const fn unlimited() -> Self {
        Self {
            max_svids: None,
            max_bundles: None,
            max_bundle_der_bytes: None,
        }
    }
}

/// Builder for [`X509Source`].
pub struct X509SourceBuilder {
    svid_picker: Option<Box<dyn SvidPicker>>,
    reconnect: ReconnectConfig,
    make_client: Option<ClientFactory>,
    limits: ResourceLimits,
    shutdown_timeout: Option<Duration>,
    cancel_parent: Option<CancellationToken>,
}

impl Debug for X509SourceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X509SourceBuilder")
            .field(
                "svid_picker",
                &self.svid_picker.as_ref().map(|_| "<SvidPicker>"),
            )
            .field("reconnect", &self.reconnect)
            .field("limits", &self.limits)
            .field(
                "make_client",
                &self.make_client.as_ref().map(|_| "<ClientFactory>"),
            )
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("cancel_parent", &self.cancel_parent)
            .finish()
    }
}

impl Default for X509SourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl X509SourceBuilder {
    /// Creates a builder with default settings: endpoint from
    /// `SPIFFE_ENDPOINT_SOCKET`, default reconnect backoff and limits, 30s
    /// shutdown timeout.
    pub fn new() -> Self {
        Self {
            svid_picker: None,
            reconnect: ReconnectConfig::default(),
            make_client: None,
            limits: ResourceLimits::default(),
            shutdown_timeout: Some(Duration::from_secs(30)),
            cancel_parent: None,
        }
    }

    /// Sets the Workload API endpoint URI, e.g.
    /// `unix:/tmp/spire-agent/public/api.sock` or `tcp://127.0.0.1:8081`.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl AsRef<str>) -> Self {
        let endpoint: Arc<str> = Arc::from(endpoint.as_ref());

        let factory: ClientFactory = Arc::new(move || {
            let endpoint = Arc::clone(&endpoint);
            Box::pin(async move { WorkloadApiClient::connect_to(&endpoint).await })
        });

        self.make_client = Some(factory);
        self
    }

    /// Sets a custom client factory; injectable for tests.
    #[must_use]
    pub fn client_factory(mut self, factory: ClientFactory) -> Self {
        self.make_client = Some(factory);
        self
    }

    /// Sets a custom SVID selection strategy.
    #[must_use]
    pub fn picker<P>(mut self, picker: P) -> Self
    where
        P: SvidPicker + 'static,
    {
        self.svid_picker = Some(Box::new(picker));
        self
    }

    /// Selects the SVID whose Workload API hint equals `hint`; when no SVID
    /// matches, the source reports no suitable SVID.
    ///
    /// This is a convenience over [`X509SourceBuilder::picker`]. Without
    /// either, the agent's default (first) SVID is used.
    #[must_use]
    pub fn default_svid_hint(mut self, hint: impl Into<String>) -> Self {
        self.svid_picker = Some(Box::new(HintPicker { hint: hint.into() }));
        self
    }

    /// Sets the reconnect backoff range.
    #[must_use]
    pub const fn reconnect_backoff(mut self, min_backoff: Duration, max_backoff: Duration) -> Self {
        self.reconnect = ReconnectConfig {
            min_backoff,
            max_backoff,
        };
        self
    }

    /// Sets resource limits on accepted material.
    #[must_use]
    pub const fn resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the shutdown timeout used by
    /// [`X509Source::shutdown_configured`]. `None` waits indefinitely.
    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Parents the source's lifetime to `token`: cancelling it cancels the
    /// initial sync and every background task of the source.
    #[must_use]
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel_parent = Some(token);
        self
    }

    /// Builds a ready-to-use [`X509Source`].
    ///
    /// This performs the first-value wait: it returns once an initial
    /// context has been received and validated, retrying with backoff until
    /// then, or fails with [`X509SourceError::Closed`] when the cancellation
    /// token fires first.
    ///
    /// # Errors
    ///
    /// Returns an [`X509SourceError`] if the source is cancelled before the
    /// initial synchronization completes.
    pub async fn build(self) -> Result<X509Source, X509SourceError> {
        let make_client = self.make_client.unwrap_or_else(|| {
            Arc::new(|| Box::pin(async { WorkloadApiClient::connect_env().await }))
        });

        let cancel = match self.cancel_parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };

        X509Source::build_with(
            make_client,
            self.svid_picker,
            self.reconnect.normalize(),
            self.limits,
            self.shutdown_timeout,
            cancel,
        )
        .await
    }
}
