use super::errors::JwtSourceError;
use super::source::JwtSource;
use crate::workload_api::WorkloadApiClient;
use crate::x509_source::{ClientFactory, ReconnectConfig};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Builder for [`JwtSource`].
pub struct JwtSourceBuilder {
    reconnect: ReconnectConfig,
    make_client: Option<ClientFactory>,
    max_bundles: Option<usize>,
    shutdown_timeout: Option<Duration>,
    cancel_parent: Option<CancellationToken>,
}

impl Debug for JwtSourceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSourceBuilder")
            .field("reconnect", &self.reconnect)
            .field(
                "make_client",
                &self.make_client.as_ref().map(|_| "<ClientFactory>"),
            )
            .field("max_bundles", &self.max_bundles)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("cancel_parent", &self.cancel_parent)
            .finish()
    }
}

impl Default for JwtSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl JwtSourceBuilder {
    /// Creates a builder with default settings: endpoint from
    /// `SPIFFE_ENDPOINT_SOCKET`, default reconnect backoff, 200-bundle
    /// limit, 30s shutdown timeout.
    pub fn new() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            make_client: None,
            max_bundles: Some(200),
            shutdown_timeout: Some(Duration::from_secs(30)),
            cancel_parent: None,
        }
    }

    /// Sets the Workload API endpoint URI.
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

    /// Sets the reconnect backoff range.
    #[must_use]
    pub const fn reconnect_backoff(mut self, min_backoff: Duration, max_backoff: Duration) -> Self {
        self.reconnect = ReconnectConfig {
            min_backoff,
            max_backoff,
        };
        self
    }

    /// Bounds the number of JWT bundles accepted per update. `None`
    /// disables the limit.
    #[must_use]
    pub const fn max_bundles(mut self, max_bundles: Option<usize>) -> Self {
        self.max_bundles = max_bundles;
        self
    }

    /// Sets the shutdown timeout used by
    /// [`JwtSource::shutdown_configured`]. `None` waits indefinitely.
    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Parents the source's lifetime to `token`.
    #[must_use]
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel_parent = Some(token);
        self
    }

    /// Builds a ready-to-use [`JwtSource`].
    ///
    /// Performs the first-value wait: returns once an initial bundle set has
    /// been received, retrying with backoff until then, or fails with
    /// [`JwtSourceError::Closed`] when the cancellation token fires first.
    ///
    /// # Errors
    ///
    /// Returns a [`JwtSourceError`] if the source is cancelled before the
    /// initial synchronization completes.
    pub async fn build(self) -> Result<JwtSource, JwtSourceError> {
        let make_client = self.make_client.unwrap_or_else(|| {
            Arc::new(|| Box::pin(async { WorkloadApiClient::connect_env().await }))
        });

        let cancel = match self.cancel_parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };

        JwtSource::build_with(
            make_client,
            self.reconnect.normalize(),
            self.max_bundles,
            self.shutdown_timeout,
            cancel,
        )
        .await
    }
}
