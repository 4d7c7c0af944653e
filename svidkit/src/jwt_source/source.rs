use super::builder::JwtSourceBuilder;
use super::errors::JwtSourceError;
use super::supervisor::{initial_sync_with_retry, validate_bundle_set};
use crate::bundle::BundleSource;
use crate::prelude::warn;
use crate::workload_api::WorkloadApiClient;
use crate::x509_source::{ClientFactory, ReconnectConfig};
use crate::{JwtBundle, JwtBundleSet, JwtSvid, SpiffeId, TrustDomain};
use arc_swap::ArcSwap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle for receiving update notifications from a [`JwtSource`].
///
/// Same conflating single-slot semantics as
/// [`crate::x509_source::X509SourceUpdates`]: a slow consumer observes the
/// newest sequence number only and never blocks the stream reader.
#[derive(Clone, Debug)]
pub struct JwtSourceUpdates {
    rx: watch::Receiver<u64>,
}

impl JwtSourceUpdates {
    /// Waits for the next update and returns the new sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`JwtSourceError::Closed`] if the source has been shut down.
    pub async fn changed(&mut self) -> Result<u64, JwtSourceError> {
        self.rx.changed().await.map_err(|_| JwtSourceError::Closed)?;
        Ok(*self.rx.borrow())
    }

    /// Returns the last sequence number without waiting.
    pub fn last(&self) -> u64 {
        *self.rx.borrow()
    }
}

/// Live source of JWT bundles from the SPIFFE Workload API.
///
/// The bundle-set stream is cached and kept current by a background
/// supervisor. JWT-SVIDs are not streamed; [`JwtSource::jwt_svid`] fetches
/// them on demand for a specific audience through a lazily created client.
#[derive(Clone, Debug)]
pub struct JwtSource {
    inner: Arc<Inner>,
}

pub(super) struct Inner {
    // Atomically replaced, last-known-good JWT bundle set.
    bundle_set: ArcSwap<JwtBundleSet>,
    max_bundles: Option<usize>,

    // Cached client for on-demand SVID fetching; recreated on failure.
    fetch_client: Mutex<Option<WorkloadApiClient>>,

    reconnect: ReconnectConfig,
    make_client: ClientFactory,

    closed: AtomicBool,
    cancel: CancellationToken,
    shutdown_timeout: Option<Duration>,

    update_seq: AtomicU64,
    update_tx: watch::Sender<u64>,
    update_rx: watch::Receiver<u64>,

    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    pub(super) fn reconnect(&self) -> ReconnectConfig {
        self.reconnect
    }

    pub(super) fn make_client(&self) -> &ClientFactory {
        &self.make_client
    }

    pub(super) fn apply_update(&self, new_set: Arc<JwtBundleSet>) -> Result<(), JwtSourceError> {
        validate_bundle_set(&new_set, self.max_bundles)?;
        self.bundle_set.store(new_set);
        let next = self.update_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.update_tx.send(next);
        Ok(())
    }
}

impl Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSource")
            .field("bundle_set", &"<ArcSwap<JwtBundleSet>>")
            .field("max_bundles", &self.max_bundles)
            .field("reconnect", &self.reconnect)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl JwtSource {
    /// Creates a `JwtSource` against the default Workload API endpoint
    /// (`SPIFFE_ENDPOINT_SOCKET`).
    ///
    /// # Errors
    ///
    /// Returns a [`JwtSourceError`] if the source is cancelled before the
    /// initial synchronization completes.
    pub async fn new() -> Result<Self, JwtSourceError> {
        JwtSourceBuilder::new().build().await
    }

    /// Returns a builder for configuring a [`JwtSource`].
    pub fn builder() -> JwtSourceBuilder {
        JwtSourceBuilder::new()
    }

    /// Returns a subscription handle for update notifications.
    pub fn updated(&self) -> JwtSourceUpdates {
        JwtSourceUpdates {
            rx: self.inner.update_rx.clone(),
        }
    }

    /// Returns the current JWT bundle set.
    ///
    /// # Errors
    ///
    /// Returns [`JwtSourceError::Closed`] if the source has been shut down.
    pub fn bundle_set(&self) -> Result<Arc<JwtBundleSet>, JwtSourceError> {
        self.assert_open()?;
        Ok(self.inner.bundle_set.load_full())
    }

    /// Fetches a JWT-SVID for `audience`, optionally for a specific subject
    /// SPIFFE ID. Without a subject, the agent's default identity is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns a [`JwtSourceError`] if the source is closed or the fetch
    /// fails.
    pub async fn jwt_svid<I>(
        &self,
        audience: I,
        subject: Option<&SpiffeId>,
    ) -> Result<JwtSvid, JwtSourceError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.assert_open()?;

        let client = self.fetch_client().await?;
        match client.fetch_jwt_svid(audience, subject).await {
            Ok(svid) => Ok(svid),
            Err(e) => {
                // Drop the cached client so the next call reconnects.
                *self.inner.fetch_client.lock().await = None;
                Err(JwtSourceError::Source(e))
            }
        }
    }

    /// Cancels background tasks and waits for them to finish. Idempotent.
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

    /// Cancels background tasks and waits up to `timeout`, aborting the
    /// supervisor if exceeded. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`JwtSourceError::ShutdownTimeout`] if graceful shutdown did
    /// not complete in time.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<(), JwtSourceError> {
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
                Err(JwtSourceError::ShutdownTimeout)
            }
        }
    }

    /// Shuts down using the timeout configured at build time.
    ///
    /// # Errors
    ///
    /// Returns [`JwtSourceError::ShutdownTimeout`] if the configured timeout
    /// is exceeded.
    pub async fn shutdown_configured(&self) -> Result<(), JwtSourceError> {
        if let Some(timeout) = self.inner.shutdown_timeout {
            self.shutdown_with_timeout(timeout).await
        } else {
            self.shutdown().await;
            Ok(())
        }
    }

    async fn fetch_client(&self) -> Result<WorkloadApiClient, JwtSourceError> {
        let mut guard = self.inner.fetch_client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let client = (self.inner.make_client)()
            .await
            .map_err(JwtSourceError::Source)?;
        *guard = Some(client.clone());
        Ok(client)
    }

    fn assert_open(&self) -> Result<(), JwtSourceError> {
        if self.inner.closed.load(Ordering::Acquire) || self.inner.cancel.is_cancelled() {
            return Err(JwtSourceError::Closed);
        }
        Ok(())
    }
}

impl JwtSource {
    pub(super) async fn build_with(
        make_client: ClientFactory,
        reconnect: ReconnectConfig,
        max_bundles: Option<usize>,
        shutdown_timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<JwtSource, JwtSourceError> {
        let (update_tx, update_rx) = watch::channel(0u64);

        let initial_set =
            initial_sync_with_retry(&make_client, &cancel, reconnect, max_bundles).await?;

        let inner = Arc::new(Inner {
            bundle_set: ArcSwap::from(initial_set),
            max_bundles,
            fetch_client: Mutex::new(None),
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
}

impl Drop for JwtSource {
    fn drop(&mut self) {
        // Best-effort cancellation once the last user handle goes away; the
        // supervisor task itself holds one clone of `inner` until it exits.
        if Arc::strong_count(&self.inner) <= 2 {
            self.inner.cancel.cancel();
        }
    }
}

impl BundleSource for JwtSource {
    type Item = JwtBundle;
    type Error = JwtSourceError;

    fn bundle_for_trust_domain(
        &self,
        trust_domain: &TrustDomain,
    ) -> Result<Option<Arc<Self::Item>>, Self::Error> {
        self.assert_open()?;
        Ok(self.inner.bundle_set.load().get_bundle(trust_domain))
    }
}
