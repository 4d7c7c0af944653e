use super::errors::JwtSourceError;
use super::source::Inner;
use crate::prelude::{debug, info, warn};
use crate::workload_api::error::WorkloadApiError;
use crate::workload_api::supervisor_common::{
    next_backoff, next_backoff_for_no_identity, sleep_or_cancel, ErrorKey, ErrorTracker,
    StreamPhase, MAX_CONSECUTIVE_SAME_ERROR,
};
use crate::workload_api::WorkloadApiClient;
use crate::x509_source::{ClientFactory, ReconnectConfig};
use crate::JwtBundleSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt as _;
use tokio_util::sync::CancellationToken;

async fn try_create_client(
    make_client: &ClientFactory,
    backoff: Duration,
    error_tracker: &mut ErrorTracker,
) -> Result<WorkloadApiClient, WorkloadApiError> {
    match (make_client)().await {
        Ok(client) => {
            if error_tracker.last_error_kind() == Some(ErrorKey::ClientCreation) {
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
                    "Failed to create Workload API client (repeated); retrying: error={}, backoff_ms={}",
                    e,
                    backoff.as_millis()
                );
            }
            Err(e)
        }
    }
}

async fn try_connect_stream(
    client: &WorkloadApiClient,
    backoff: Duration,
    error_tracker: &mut ErrorTracker,
    phase: StreamPhase,
) -> Result<
    impl tokio_stream::Stream<Item = Result<JwtBundleSet, WorkloadApiError>> + Send + 'static + use<>,
    WorkloadApiError,
> {
    match client.stream_jwt_bundles().await {
        Ok(stream) => {
            error_tracker.reset();
            info!("Connected to Workload API JWT bundle stream (phase={phase:?})");
            Ok(stream)
        }
        Err(e) => {
            let key = if matches!(e, WorkloadApiError::NoIdentityIssued) {
                ErrorKey::NoIdentityIssued
            } else {
                ErrorKey::StreamConnect
            };
            let should_warn = error_tracker.record_error(key);
            if should_warn {
                warn!(
                    "Failed to connect to JWT bundle stream; retrying: error={}, backoff_ms={}",
                    e,
                    backoff.as_millis()
                );
            } else {
                debug!(
                    "Failed to connect to JWT bundle stream (repeated); retrying: error={}, backoff_ms={}",
                    e,
                    backoff.as_millis()
                );
            }
            Err(e)
        }
    }
}

/// The first-value wait for JWT bundles.
pub(super) async fn initial_sync_with_retry(
    make_client: &ClientFactory,
    cancel: &CancellationToken,
    reconnect: ReconnectConfig,
    max_bundles: Option<usize>,
) -> Result<Arc<JwtBundleSet>, JwtSourceError> {
    let mut backoff = reconnect.min_backoff;
    let mut error_tracker = ErrorTracker::new(MAX_CONSECUTIVE_SAME_ERROR);

    loop {
        if cancel.is_cancelled() {
            return Err(JwtSourceError::Closed);
        }

        match try_sync_once(make_client, max_bundles, backoff, &mut error_tracker).await {
            Ok(set) => return Ok(set),
            Err(e) => {
                if sleep_or_cancel(cancel, backoff).await {
                    return Err(JwtSourceError::Closed);
                }
                backoff = match &e {
                    JwtSourceError::Source(WorkloadApiError::NoIdentityIssued) => {
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
    max_bundles: Option<usize>,
    backoff: Duration,
    error_tracker: &mut ErrorTracker,
) -> Result<Arc<JwtBundleSet>, JwtSourceError> {
    let client = try_create_client(make_client, backoff, error_tracker)
        .await
        .map_err(JwtSourceError::Source)?;

    let mut stream = try_connect_stream(&client, backoff, error_tracker, StreamPhase::InitialSync)
        .await
        .map_err(JwtSourceError::Source)?;

    match stream.next().await {
        Some(Ok(set)) => {
            validate_bundle_set(&set, max_bundles).inspect_err(|e| {
                warn!("Initial JWT bundle set rejected; will retry: error={e}");
            })?;
            Ok(Arc::new(set))
        }
        Some(Err(e)) => {
            warn!("Initial sync: JWT bundle stream error; will retry: error={e}");
            Err(JwtSourceError::Source(e))
        }
        None => {
            warn!("Initial sync: JWT bundle stream ended immediately; will retry");
            Err(JwtSourceError::StreamEnded)
        }
    }
}

pub(super) fn validate_bundle_set(
    set: &JwtBundleSet,
    max_bundles: Option<usize>,
) -> Result<(), JwtSourceError> {
    if let Some(limit) = max_bundles {
        let actual = set.len();
        if actual > limit {
            return Err(JwtSourceError::TooManyBundles { limit, actual });
        }
    }
    Ok(())
}

impl Inner {
    pub(super) async fn run_update_supervisor(&self, cancellation_token: CancellationToken) {
        let supervisor_id = fastrand::u64(..);
        info!("Starting JWT update supervisor: id={supervisor_id}");

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
                    let mut had_successful_update = false;
                    loop {
                        let item = tokio::select! {
                            () = cancellation_token.cancelled() => {
                                debug!("Cancellation signal received; stopping update loop");
                                return;
                            }
                            v = stream.next() => v,
                        };

                        match item {
                            Some(Ok(set)) => match self.apply_update(Arc::new(set)) {
                                Ok(()) => {
                                    had_successful_update = true;
                                    info!("JWT bundle set updated");
                                }
                                Err(e) => {
                                    warn!("Rejected JWT bundle set update: error={e}");
                                }
                            },
                            Some(Err(e)) => {
                                warn!(
                                    "JWT bundle stream error; reconnecting: id={supervisor_id}, error={e}"
                                );
                                break;
                            }
                            None => {
                                warn!("JWT bundle stream ended; reconnecting: id={supervisor_id}");
                                break;
                            }
                        }
                    }

                    if had_successful_update {
                        backoff = self.reconnect().min_backoff;
                    }
                    if sleep_or_cancel(&cancellation_token, backoff).await {
                        return;
                    }
                    if !had_successful_update {
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
}
