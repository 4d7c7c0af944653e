use super::builder::{ReconnectConfig, ResourceLimits};
use super::errors::X509SourceError;
use super::limits::validate_context;
use super::source::Inner;
use super::types::{ClientFactory, SvidPicker};
use crate::prelude::{debug, info, warn};
use crate::workload_api::error::WorkloadApiError;
use crate::workload_api::supervisor_common::{
    next_backoff, next_backoff_for_no_identity, sleep_or_cancel, ErrorKey, ErrorTracker,
    StreamPhase, MAX_CONSECUTIVE_SAME_ERROR,
};
use crate::workload_api::{WorkloadApiClient, X509Context};
use futures::StreamExt as _;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Attempts to create a Workload API client. The caller owns backoff
/// progression.
async fn try_create_client(
    make_client: &ClientFactory,
    backoff: Duration,
    error_tracker: &mut ErrorTracker,
) -> Result<WorkloadApiClient, WorkloadApiError> {
    match (make_client)().await {
        Ok(client) => {
            if error_tracker.last_error_kind() == Some(ErrorKey::ClientCreation) {
                if error_tracker.consecutive_count() >= 3 {
                    debug!(
                        "Client creation recovered after {} consecutive failures",
                        error_tracker.consecutive_count()
                    );
                }
                error_tracker.reset();
            }
            Ok(client)
        }
        Err(e) => {
            let should_warn = error_tracker.record_error(ErrorKey::ClientCreation);
            if should_warn {
                warn!(
                    "Failed to create Workload API client; retrying: error={}, backoff_ms={}",
                    e,
                    backoff.as_millis()
                );
            } else {
                debug!(
                    "Failed to create Workload API client (repeated); retrying: error={}, backoff_ms={}, consecutive_failures={}",
                    e,
                    backoff.as_millis(),
                    error_tracker.consecutive_count()
                );
            }
            Err(e)
        }
    }
}

/// Attempts to open the X.509 context stream. The caller owns backoff
/// progression.
async fn try_connect_stream(
    client: &WorkloadApiClient,
    backoff: Duration,
    error_tracker: &mut ErrorTracker,
    phase: StreamPhase,
) -> Result<
    impl futures::Stream<Item = Result<X509Context, WorkloadApiError>> + Send + 'static + use<>,
    WorkloadApiError,
> {
    match client.stream_x509_contexts().await {
        Ok(stream) => {
            if error_tracker.last_error_kind() == Some(ErrorKey::StreamConnect)
                && error_tracker.consecutive_count() > 0
            {
                info!(
                    "Stream connection recovered after {} consecutive failures (phase={:?})",
                    error_tracker.consecutive_count(),
                    phase
                );
            }
            error_tracker.reset();
            info!("Connected to Workload API X509 context stream (phase={phase:?})");
            Ok(stream)
        }
        Err(e) => {
            // "No identity issued" is an expected transient state, tracked
            // separately so it gets the gentler backoff curve.
            if matches!(e, WorkloadApiError::NoIdentityIssued) {
                let should_warn = error_tracker.record_error(ErrorKey::NoIdentityIssued);
                if should_warn {
                    warn!("No identity issued yet; waiting before retry");
                } else {
                    debug!(
                        "No identity issued yet (repeated); waiting before retry: consecutive_failures={}",
                        error_tracker.consecutive_count()
                    );
                }
                return Err(e);
            }

            let should_warn = error_tracker.record_error(ErrorKey::StreamConnect);
            if should_warn {
                warn!(
                    "Failed to connect to Workload API stream; retrying: error={}, backoff_ms={}",
                    e,
                    backoff.as_millis()
                );
            } else {
                debug!(
                    "Failed to connect to Workload API stream (repeated); retrying: error={}, backoff_ms={}, consecutive_failures={}",
                    e,
                    backoff.as_millis(),
                    error_tracker.consecutive_count()
                );
            }
            Err(e)
        }
    }
}

/// The first-value wait: retries until an initial context is received and
/// validated, or cancellation fires.
pub(super) async fn initial_sync_with_retry(
    make_client: &ClientFactory,
    picker: Option<&dyn SvidPicker>,
    cancel: &CancellationToken,
    reconnect: ReconnectConfig,
    limits: ResourceLimits,
) -> Result<Arc<X509Context>, X509SourceError> {
    let mut backoff = reconnect.min_backoff;
    let mut error_tracker = ErrorTracker::new(MAX_CONSECUTIVE_SAME_ERROR);

    loop {
        if cancel.is_cancelled() {
            return Err(X509SourceError::Closed);
        }

        match try_sync_once(make_client, picker, limits, backoff, &mut error_tracker).await {
            Ok(ctx) => return Ok(ctx),
            Err(e) => {
                if sleep_or_cancel(cancel, backoff).await {
                    return Err(X509SourceError::Closed);
                }
                backoff = match &e {
                    X509SourceError::Source(WorkloadApiError::NoIdentityIssued) => {
                        next_backoff_for_no_identity(backoff, reconnect.max_backoff)
                    }
                    _ => next_backoff(backoff, reconnect.max_backoff),
                };
            }
        }
    }
}

async fn try_sync_once(
    make_client: &ClientFactory,
    picker: Option<&dyn SvidPicker>,
    limits: ResourceLimits,
    backoff: Duration,
    error_tracker: &mut ErrorTracker,
) -> Result<Arc<X509Context>, X509SourceError> {
    let client = try_create_client(make_client, backoff, error_tracker)
        .await
        .map_err(X509SourceError::Source)?;

    let mut stream = try_connect_stream(&client, backoff, error_tracker, StreamPhase::InitialSync)
        .await
        .map_err(X509SourceError::Source)?;

    match stream.next().await {
        Some(Ok(ctx)) => {
            validate_context(&ctx, picker, limits).inspect_err(|e| {
                warn!("Initial X509 context rejected; will retry: error={e}");
            })?;
            Ok(Arc::new(ctx))
        }
        Some(Err(e)) => {
            warn!("Initial sync: Workload API stream error; will retry: error={e}");
            Err(X509SourceError::Source(e))
        }
        None => {
            warn!("Initial sync: Workload API stream ended immediately; will retry");
            Err(X509SourceError::StreamEnded)
        }
    }
}

/// Result of draining one stream.
struct StreamResult {
    cancelled: bool,
    had_successful_update: bool,
}

impl Inner {
    pub(super) async fn run_update_supervisor(&self, cancellation_token: CancellationToken) {
        let supervisor_id = fastrand::u64(..);
        info!("Starting update supervisor: id={supervisor_id}");

        let mut backoff = self.reconnect().min_backoff;
        let mut error_tracker = ErrorTracker::new(MAX_CONSECUTIVE_SAME_ERROR);

        loop {
            if cancellation_token.is_cancelled() {
                debug!("Cancellation signal received; stopping updates");
                return;
            }

            let Ok(client) =
                try_create_client(self.make_client(), backoff, &mut error_tracker).await
            else {
                if sleep_or_cancel(&cancellation_token, backoff).await {
                    return;
                }
                backoff = next_backoff(backoff, self.reconnect().max_backoff);
                continue;
            };

            match try_connect_stream(&client, backoff, &mut error_tracker, StreamPhase::Supervisor)
                .await
            {
                Ok(mut stream) => {
                    let result = self
                        .process_stream_updates(&mut stream, &cancellation_token, supervisor_id)
                        .await;
                    if result.cancelled {
                        return;
                    }

                    // Only reset backoff when the stream actually delivered
                    // useful data before failing.
                    if result.had_successful_update {
                        backoff = self.reconnect().min_backoff;
                    }

                    if sleep_or_cancel(&cancellation_token, backoff).await {
                        return;
                    }
                    if !result.had_successful_update {
                        backoff = next_backoff(backoff, self.reconnect().max_backoff);
                    }
                }
                Err(stream_err) => {
                    backoff = match stream_err {
                        WorkloadApiError::NoIdentityIssued => {
                            next_backoff_for_no_identity(backoff, self.reconnect().max_backoff)
                        }
                        _ => next_backoff(backoff, self.reconnect().max_backoff),
                    };

                    if sleep_or_cancel(&cancellation_token, backoff).await {
                        return;
                    }
                }
            }
        }
    }

    /// Drains stream updates until the stream ends, errors, or cancellation.
    async fn process_stream_updates(
        &self,
        stream: &mut (impl futures::Stream<Item = Result<X509Context, WorkloadApiError>>
                  + Unpin
                  + Send
                  + 'static),
        cancellation_token: &CancellationToken,
        supervisor_id: u64,
    ) -> StreamResult {
        let mut rejection_tracker = ErrorTracker::new(MAX_CONSECUTIVE_SAME_ERROR);
        let mut had_successful_update = false;

        loop {
            let item = tokio::select! {
                () = cancellation_token.cancelled() => {
                    debug!("Cancellation signal received; stopping update loop");
                    return StreamResult { cancelled: true, had_successful_update };
                }
                v = stream.next() => v,
            };

            match item {
                Some(Ok(ctx)) => match self.apply_update(Arc::new(ctx)) {
                    Ok(()) => {
                        had_successful_update = true;
                        if rejection_tracker.consecutive_count() > 0 {
                            info!(
                                "Update validation recovered after {} consecutive failures",
                                rejection_tracker.consecutive_count()
                            );
                            rejection_tracker.reset();
                        }
                        info!("X509 context updated");
                    }
                    Err(e) => {
                        let should_warn = rejection_tracker.record_error(ErrorKey::UpdateRejected);
                        if should_warn {
                            warn!("Rejected X509 context update: error={e}");
                        } else {
                            debug!(
                                "Rejected X509 context update (repeated): error={}, consecutive_rejections={}",
                                e,
                                rejection_tracker.consecutive_count()
                            );
                        }
                    }
                },
                Some(Err(e)) => {
                    warn!("Workload API stream error; reconnecting: id={supervisor_id}, error={e}");
                    return StreamResult {
                        cancelled: false,
                        had_successful_update,
                    };
                }
                None => {
                    // A clean EOF is treated like an error: the supervisor
                    // reconnects rather than staying dark.
                    warn!("Workload API stream ended; reconnecting: id={supervisor_id}");
                    return StreamResult {
                        cancelled: false,
                        had_successful_update,
                    };
                }
            }
        }
    }
}
