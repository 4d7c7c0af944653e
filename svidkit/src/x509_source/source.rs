use super::builder::{ReconnectConfig, ResourceLimits};
use super::errors::X509SourceError;
use super::limits::{select_svid, validate_context};
use super::supervisor::initial_sync_with_retry;
use super::types::{ClientFactory, SvidPicker};
use crate::bundle::BundleSource;
use crate::prelude::warn;
use crate::svid::SvidSource;
use crate::workload_api::X509Context;
use crate::{TrustDomain, X509Bundle, X509BundleSet, X509SourceBuilder, X509Svid};
use arc_swap::ArcSwap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use crate::WorkloadApiError;

/// Handle for receiving update notifications from an [`X509Source`].
///
/// The handle yields a strictly increasing sequence number per published
/// update. It is a single-slot conflating subscription: a slow consumer only
/// ever observes the newest sequence, never blocks the stream reader, and
/// may skip intermediate values.
#[derive(Clone, Debug)]
pub struct X509SourceUpdates {
    rx: watch::Receiver<u64>,
}

impl X509SourceUpdates {
    /// Waits for the next update and returns the new sequence number.
    ///
    /// The initial synchronization does not notify; only rotations after it
    /// do.
    ///
    /// # Errors
    ///
    /// Returns [`X509SourceError::Closed`] if the source has been shut down.
    pub async fn changed(&mut self) -> Result<u64, X509SourceError> {
        self.rx
            .changed()
            .await
            .map_err(|_| X509SourceError::Closed)?;
        Ok(*self.rx.borrow())
    }

    /// Returns the last sequence number without waiting.
    pub fn last(&self) -> u64 {
        *self.rx.borrow()
    }

    /// Waits until the sequence number satisfies `f`, returning the first
    /// satisfying value. Returns immediately if the current value already
    /// satisfies it.
    ///
    /// # Errors
    ///
    /// Returns [`X509SourceError::Closed`] if the source has been shut down.
    pub async fn wait_for<F>(&mut self, mut f: F) -> Result<u64, X509SourceError>
    where
        F: FnMut(&u64) -> bool,
    {
        let current = self.last();
        if f(&current) {
            return Ok(current);
        }
        loop {
            let seq = self.changed().await?;
            if f(&seq) {
                return Ok(seq);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn from_receiver(rx: watch::Receiver<u64>) -> Self {
        Self { rx }
    }
}

/// Live source of X.509 SVIDs and bundles from the SPIFFE Workload API.
///
/// Building the source performs an initial synchronization; afterwards a
/// background supervisor keeps the cached context current, reconnecting with
/// exponential backoff when the stream fails. Reads never block beyond an
/// atomic pointer load and always serve the latest validated snapshot.
///
/// ```no_run
/// use svidkit::{TrustDomain, X509Source};
/// use svidkit::bundle::BundleSource;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
/// let source = X509Source::new().await?;
///
/// let svid = source.svid()?;
///
/// let td = TrustDomain::new("example.org")?;
/// let bundle = source
///     .bundle_for_trust_domain(&td)?
///     .ok_or("missing bundle")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct X509Source {
    inner: Arc<Inner>,
}

pub(super) struct Inner {
    // Atomically replaced, last-known-good X.509 context.
    x509_context: ArcSwap<X509Context>,

    // SVID selection policy.
    svid_picker: Option<Box<dyn SvidPicker>>,
    limits: ResourceLimits,

    // Supervisor configuration and dependencies.
    reconnect: ReconnectConfig,
    make_client: ClientFactory,

    // Lifecycle.
    closed: AtomicBool,
    cancel: CancellationToken,
    shutdown_timeout: Option<Duration>,

    // Update notifications (monotonic sequence).
    update_seq: AtomicU64,
    update_tx: watch::Sender<u64>,
    update_rx: watch::Receiver<u64>,

    // Supervisor task handle, joined at shutdown.
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    pub(super) fn reconnect(&self) -> ReconnectConfig {
        self.reconnect
    }

    pub(super) fn make_client(&self) -> &ClientFactory {
        &self.make_client
    }
}

impl Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X509Source")
            .field("x509_context", &"<ArcSwap<X509Context>>")
            .field(
                "svid_picker",
                &self.svid_picker.as_ref().map(|_| "<SvidPicker>"),
            )
            .field("limits", &self.limits)
            .field("reconnect", &self.reconnect)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("update_seq", &self.update_seq)
            .finish_non_exhaustive()
    }
}

impl X509Source {
    /// Creates an `X509Source` against the default Workload API endpoint
    /// (`SPIFFE_ENDPOINT_SOCKET`), selecting the agent's default SVID.
    ///
    /// On success the source is synchronized and keeps updating in the
    /// background until closed.
    ///
    /// # Errors
    ///
    /// Returns an [`X509SourceError`] if the source is cancelled before the
    /// initial synchronization completes.
    pub async fn new() -> Result<Self, X509SourceError> {
        X509SourceBuilder::new().build().await
    }

    /// Returns a builder for configuring an [`X509Source`].
    pub fn builder() -> X509SourceBuilder {
        X509SourceBuilder::new()
    }

    /// Returns a subscription handle for update notifications.
    ///
    /// The initial sequence number is 0; the initial synchronization does
    /// not notify.
    pub fn updated(&self) -> X509SourceUpdates {
        X509SourceUpdates {
            rx: self.inner.update_rx.clone(),
        }
    }

    /// Returns `true` if the source is open and an SVID can currently be
    /// selected.
    ///
    /// The check is inherently racy with respect to shutdown and rotation;
    /// use it for monitoring, not synchronization.
    pub fn is_healthy(&self) -> bool {
        if self.inner.closed.load(Ordering::Acquire) || self.inner.cancel.is_cancelled() {
            return false;
        }

        let ctx = self.inner.x509_context.load();
        select_svid(&ctx, self.inner.svid_picker.as_deref()).is_some()
    }

    /// Returns the current X.509 context (SVIDs plus bundles).
    ///
    /// # Errors
    ///
    /// Returns [`X509SourceError::Closed`] if the source has been shut down.
    pub fn x509_context(&self) -> Result<Arc<X509Context>, X509SourceError> {
        self.assert_open()?;
        Ok(self.inner.x509_context.load_full())
    }

    /// Returns the current X.509 SVID per the configured selection rule
    /// (picker or hint if set, else the agent default).
    ///
    /// # Errors
    ///
    /// Returns [`X509SourceError`] if the source is closed or no suitable
    /// SVID is available.
    pub fn svid(&self) -> Result<Arc<X509Svid>, X509SourceError> {
        self.assert_open()?;

        let ctx = self.inner.x509_context.load();
        select_svid(&ctx, self.inner.svid_picker.as_deref())
            .ok_or(X509SourceError::NoSuitableSvid)
    }

    /// Returns the current SVID, or `None` when unavailable (including when
    /// the source is closed).
    pub fn try_svid(&self) -> Option<Arc<X509Svid>> {
        self.svid().ok()
    }

    /// Returns the current X.509 bundle set.
    ///
    /// # Errors
    ///
    /// Returns [`X509SourceError::Closed`] if the source has been shut down.
    pub fn bundle_set(&self) -> Result<Arc<X509BundleSet>, X509SourceError> {
        self.assert_open()?;
        Ok(self.inner.x509_context.load().bundle_set().clone())
    }

    /// Returns the bundle for the trust domain, or `None` when unavailable
    /// (including when the source is closed).
    pub fn try_bundle_for_trust_domain(&self, td: &TrustDomain) -> Option<Arc<X509Bundle>> {
        self.bundle_for_trust_domain(td).ok().flatten()
    }

    /// Cancels background tasks and waits for them to finish.
    ///
    /// Idempotent. May wait indefinitely if the supervisor does not respond;
    /// prefer [`X509Source::shutdown_with_timeout`] in production.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();

        if let Some(handle) = self.inner.supervisor.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Error joining supervisor task during shutdown: error={e}");
            }
        }
    }

    /// Cancels background tasks and waits up to `timeout` for them to
    /// finish, aborting the supervisor if the timeout is exceeded.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`X509SourceError::ShutdownTimeout`] if graceful shutdown did
    /// not complete in time.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<(), X509SourceError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.cancel.cancel();

        let Some(mut handle) = self.inner.supervisor.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("Error joining supervisor task during shutdown: error={e}");
                Ok(())
            }
            Err(_) => {
                warn!("Shutdown timeout exceeded; aborting supervisor task");
                handle.abort();
                let _ = handle.await;
                Err(X509SourceError::ShutdownTimeout)
            }
        }
    }

    /// Shuts down using the timeout configured at build time, waiting
    /// indefinitely when none was set.
    ///
    /// # Errors
    ///
    /// Returns [`X509SourceError::ShutdownTimeout`] if the configured
    /// timeout is exceeded.
    pub async fn shutdown_configured(&self) -> Result<(), X509SourceError> {
        if let Some(timeout) = self.inner.shutdown_timeout {
            self.shutdown_with_timeout(timeout).await
        } else {
            self.shutdown().await;
            Ok(())
        }
    }
}

impl X509Source {
    pub(super) async fn build_with(
        make_client: ClientFactory,
        svid_picker: Option<Box<dyn SvidPicker>>,
        reconnect: ReconnectConfig,
        limits: ResourceLimits,
        shutdown_timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<X509Source, X509SourceError> {
        let (update_tx, update_rx) = watch::channel(0u64);

        let initial_ctx = initial_sync_with_retry(
            &make_client,
            svid_picker.as_deref(),
            &cancel,
            reconnect,
            limits,
        )
        .await?;

        let inner = Arc::new(Inner {
            x509_context: ArcSwap::from(initial_ctx),
            svid_picker,
            limits,
            reconnect,
            make_client,
            closed: AtomicBool::new(false),
            cancel,
            shutdown_timeout,
            update_seq: AtomicU64::new(0),
            update_tx,
            update_rx,
            supervisor: Mutex::new(None),
        });

        let task_inner = Arc::clone(&inner);
        let token = task_inner.cancel.clone();
        let handle = tokio::spawn(async move {
            task_inner.run_update_supervisor(token).await;
        });

        *inner.supervisor.lock().await = Some(handle);

        Ok(Self { inner })
    }

    /// Test-only constructor bypassing initial sync and the supervisor task.
    #[cfg(test)]
    pub(super) fn new_for_test(
        initial_ctx: Arc<X509Context>,
        reconnect: ReconnectConfig,
        limits: ResourceLimits,
        svid_picker: Option<Box<dyn SvidPicker>>,
    ) -> X509Source {
        let (update_tx, update_rx) = watch::channel(0u64);

        let make_client: ClientFactory =
            Arc::new(|| Box::pin(async move { Err(WorkloadApiError::EmptyResponse) }));

        Self {
            inner: Arc::new(Inner {
                x509_context: ArcSwap::from(initial_ctx),
                svid_picker,
                limits,
                reconnect: reconnect.normalize(),
                make_client,
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                shutdown_timeout: None,
                update_seq: AtomicU64::new(0),
                update_tx,
                update_rx,
                supervisor: Mutex::new(None),
            }),
        }
    }

    fn assert_open(&self) -> Result<(), X509SourceError> {
        if self.inner.closed.load(Ordering::Acquire) || self.inner.cancel.is_cancelled() {
            return Err(X509SourceError::Closed);
        }
        Ok(())
    }
}

impl Inner {
    /// Validates and publishes a new context; rejected contexts leave the
    /// previous snapshot in place.
    pub(super) fn apply_update(&self, new_ctx: Arc<X509Context>) -> Result<(), X509SourceError> {
        validate_context(&new_ctx, self.svid_picker.as_deref(), self.limits)?;
        self.x509_context.store(new_ctx);
        self.notify_update();
        Ok(())
    }

    fn notify_update(&self) {
        let next = self.update_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.update_tx.send(next);
    }
}

impl Drop for X509Source {
    fn drop(&mut self) {
        // Best-effort cancellation once the last user handle goes away;
        // never block in Drop. The supervisor task itself holds one clone of
        // `inner` until it exits.
        if Arc::strong_count(&self.inner) <= 2 {
            self.inner.cancel.cancel();
        }
    }
}

impl SvidSource for X509Source {
    type Item = X509Svid;
    type Error = X509SourceError;

    fn svid(&self) -> Result<Arc<Self::Item>, Self::Error> {
        X509Source::svid(self)
    }
}

impl BundleSource for X509Source {
    type Item = X509Bundle;
    type Error = X509SourceError;

    fn bundle_for_trust_domain(
        &self,
        trust_domain: &TrustDomain,
    ) -> Result<Option<Arc<Self::Item>>, Self::Error> {
        self.assert_open()?;
        let ctx = self.inner.x509_context.load();
        Ok(ctx.bundle_set().get(trust_domain))
    }
}
