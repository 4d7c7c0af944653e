//! Federation: fetching a remote trust domain's bundle document over HTTPS.
//!
//! [`fetch_bundle`] performs a one-shot retrieval; [`watch_bundle`] loops,
//! notifying a [`BundleWatcher`] after every attempt and sleeping according
//! to the bundle's refresh hint. Endpoints are authenticated either with the
//! platform's Web PKI roots or with a SPIFFE TLS client config built by this
//! crate (see [`crate::tls_client_config`]).

use crate::prelude::{debug, warn};
use std::time::Duration;
use svidkit::{BundleDocument, BundleDocumentError, TrustDomain};
use tokio_util::sync::CancellationToken;

/// Floor for the refresh cadence of [`watch_bundle`].
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How a federation endpoint is authenticated.
#[derive(Debug, Default)]
pub enum EndpointAuth {
    /// Verify the endpoint with the platform's Web PKI root store.
    #[default]
    WebPki,

    /// Verify the endpoint with a SPIFFE TLS client config, typically built
    /// via [`crate::tls_client_config`] with an `authorize_id` predicate for
    /// the endpoint's expected SPIFFE ID.
    Spiffe(rustls::ClientConfig),
}

/// Options for [`fetch_bundle`] and [`watch_bundle`].
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct FetchOptions {
    /// Endpoint authentication mode.
    pub auth: EndpointAuth,
}

/// Errors produced by federation fetches.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FederationError {
    /// The HTTP client could not be constructed.
    #[error("failed building HTTPS client: {0}")]
    Client(#[source] reqwest::Error),

    /// The HTTPS request failed at the transport level.
    #[error("bundle fetch failed: {0}")]
    Http(#[source] reqwest::Error),

    /// The endpoint answered with a non-2xx status.
    #[error("bundle endpoint returned status {0}")]
    Status(u16),

    /// The response body is not a valid bundle document.
    #[error("invalid bundle document: {0}")]
    Document(#[from] BundleDocumentError),
}

/// Receives the outcome of each [`watch_bundle`] attempt.
pub trait BundleWatcher: Send + Sync {
    /// Called with every freshly fetched bundle document.
    fn on_update(&self, bundle: &BundleDocument);

    /// Called when an attempt fails; the loop continues.
    fn on_error(&self, error: &FederationError);
}

/// Fetches `trust_domain`'s bundle document from `url`.
///
/// # Errors
///
/// Returns a [`FederationError`] on transport failure, a non-2xx status, or
/// an unparseable document. No internal retry is performed.
pub async fn fetch_bundle(
    trust_domain: TrustDomain,
    url: &str,
    options: FetchOptions,
) -> Result<BundleDocument, FederationError> {
    let client = build_client(options.auth)?;
    fetch_with(&client, trust_domain, url).await
}

/// Fetches `trust_domain`'s bundle from `url` in a loop until `cancel`
/// fires, delivering each outcome to `watcher`.
///
/// After a successful fetch the loop sleeps for
/// `max(bundle.refresh_hint, MIN_REFRESH_INTERVAL)`; after a failure it
/// sleeps for [`MIN_REFRESH_INTERVAL`]. Cancellation exits cleanly.
///
/// # Errors
///
/// Returns a [`FederationError`] only if the HTTPS client cannot be built;
/// fetch failures are reported through the watcher.
pub async fn watch_bundle(
    cancel: &CancellationToken,
    trust_domain: TrustDomain,
    url: &str,
    watcher: &dyn BundleWatcher,
    options: FetchOptions,
) -> Result<(), FederationError> {
    let client = build_client(options.auth)?;

    loop {
        let refresh = match fetch_with(&client, trust_domain.clone(), url).await {
            Ok(bundle) => {
                let hint = bundle.refresh_hint().unwrap_or(MIN_REFRESH_INTERVAL);
                watcher.on_update(&bundle);
                hint.max(MIN_REFRESH_INTERVAL)
            }
            Err(e) => {
                warn!("Federated bundle fetch failed: trust_domain={trust_domain}, error={e}");
                watcher.on_error(&e);
                MIN_REFRESH_INTERVAL
            }
        };

        debug!(
            "Next federated bundle refresh: trust_domain={}, in_secs={}",
            trust_domain,
            refresh.as_secs()
        );

        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            () = tokio::time::sleep(refresh) => {}
        }
    }
}

fn build_client(auth: EndpointAuth) -> Result<reqwest::Client, FederationError> {
    let builder = reqwest::Client::builder();
    let builder = match auth {
        EndpointAuth::WebPki => builder,
        EndpointAuth::Spiffe(config) => builder.use_preconfigured_tls(config),
    };
    builder.build().map_err(FederationError::Client)
}

async fn fetch_with(
    client: &reqwest::Client,
    trust_domain: TrustDomain,
    url: &str,
) -> Result<BundleDocument, FederationError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(FederationError::Http)?;

    let status = response.status();
    if !status.is_success() {
        return Err(FederationError::Status(status.as_u16()));
    }

    let body = response.bytes().await.map_err(FederationError::Http)?;
    Ok(BundleDocument::parse(trust_domain, &body)?)
}
