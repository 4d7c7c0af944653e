use crate::constants::DEFAULT_SVID;
use crate::workload_api::pb::workload::{
    X509BundlesRequest, X509BundlesResponse, X509svidRequest, X509svidResponse,
};
use crate::workload_api::x509_context::X509Context;
use crate::{
    TrustDomain, WorkloadApiClient, WorkloadApiError, X509Bundle, X509BundleSet, X509Svid,
};
use futures::{Stream, StreamExt as _};
use std::sync::Arc;

impl WorkloadApiClient {
    /// Fetches the default X.509 SVID for the calling workload.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkloadApiError`] if the request fails, the stream ends
    /// before the first message, or the received data is invalid.
    pub async fn fetch_x509_svid(&self) -> Result<X509Svid, WorkloadApiError> {
        let mut client = self.client.clone();
        let response = client.fetch_x509svid(X509svidRequest::default()).await?;
        let message = Self::first_message(response.into_inner()).await?;
        Self::parse_x509_svid(&message)
    }

    /// Fetches all X.509 SVIDs available to the calling workload, in the
    /// agent's preference order.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkloadApiError`] if the request fails or the received
    /// data is invalid.
    pub async fn fetch_all_x509_svids(&self) -> Result<Vec<X509Svid>, WorkloadApiError> {
        let mut client = self.client.clone();
        let response = client.fetch_x509svid(X509svidRequest::default()).await?;
        let message = Self::first_message(response.into_inner()).await?;
        Self::parse_x509_svids(&message)
    }

    /// Fetches the current X.509 bundle set.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkloadApiError`] if the request fails or the received
    /// data is invalid.
    pub async fn fetch_x509_bundles(&self) -> Result<X509BundleSet, WorkloadApiError> {
        let mut client = self.client.clone();
        let response = client
            .fetch_x509_bundles(X509BundlesRequest::default())
            .await?;
        let message = Self::first_message(response.into_inner()).await?;
        Self::parse_x509_bundle_set(message)
    }

    /// Fetches the current X.509 context (SVIDs plus bundles) as one
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkloadApiError`] if the request fails or the received
    /// data is invalid.
    pub async fn fetch_x509_context(&self) -> Result<X509Context, WorkloadApiError> {
        let mut client = self.client.clone();
        let response = client.fetch_x509svid(X509svidRequest::default()).await?;
        let message = Self::first_message(response.into_inner()).await?;
        Self::parse_x509_context(message)
    }

    /// Streams X.509 context updates.
    ///
    /// The stream ends when the agent closes the connection; it does not
    /// reconnect. Use [`crate::X509Source`] for a resilient cached view.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkloadApiError`] if the stream cannot be established.
    pub async fn stream_x509_contexts(
        &self,
    ) -> Result<
        impl Stream<Item = Result<X509Context, WorkloadApiError>> + Send + 'static + use<>,
        WorkloadApiError,
    > {
        let mut client = self.client.clone();
        let response = client.fetch_x509svid(X509svidRequest::default()).await?;
        let stream = response.into_inner().map(|message| {
            message
                .map_err(WorkloadApiError::from)
                .and_then(Self::parse_x509_context)
        });
        Ok(Box::pin(stream))
    }

    /// Streams default X.509 SVID updates.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkloadApiError`] if the stream cannot be established.
    pub async fn stream_x509_svids(
        &self,
    ) -> Result<
        impl Stream<Item = Result<X509Svid, WorkloadApiError>> + Send + 'static + use<>,
        WorkloadApiError,
    > {
        let mut client = self.client.clone();
        let response = client.fetch_x509svid(X509svidRequest::default()).await?;
        let stream = response.into_inner().map(|message| {
            let message = message.map_err(WorkloadApiError::from)?;
            Self::parse_x509_svid(&message)
        });
        Ok(Box::pin(stream))
    }

    /// Streams X.509 bundle set updates.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkloadApiError`] if the stream cannot be established.
    pub async fn stream_x509_bundles(
        &self,
    ) -> Result<
        impl Stream<Item = Result<X509BundleSet, WorkloadApiError>> + Send + 'static + use<>,
        WorkloadApiError,
    > {
        let mut client = self.client.clone();
        let response = client
            .fetch_x509_bundles(X509BundlesRequest::default())
            .await?;
        let stream = response.into_inner().map(|message| {
            message
                .map_err(WorkloadApiError::from)
                .and_then(Self::parse_x509_bundle_set)
        });
        Ok(Box::pin(stream))
    }
}

impl WorkloadApiClient {
    fn parse_x509_svid(response: &X509svidResponse) -> Result<X509Svid, WorkloadApiError> {
        let svid = response
            .svids
            .get(DEFAULT_SVID)
            .ok_or(WorkloadApiError::EmptyResponse)?;

        X509Svid::parse_from_der_with_hint(
            &svid.x509_svid,
            &svid.x509_svid_key,
            (!svid.hint.is_empty()).then(|| Arc::<str>::from(svid.hint.as_str())),
        )
        .map_err(WorkloadApiError::from)
    }

    fn parse_x509_svids(response: &X509svidResponse) -> Result<Vec<X509Svid>, WorkloadApiError> {
        response
            .svids
            .iter()
            .map(|svid| {
                let hint = (!svid.hint.is_empty()).then(|| Arc::<str>::from(svid.hint.as_str()));
                X509Svid::parse_from_der_with_hint(&svid.x509_svid, &svid.x509_svid_key, hint)
                    .map_err(WorkloadApiError::from)
            })
            .collect()
    }

    fn parse_x509_bundle_set(
        response: X509BundlesResponse,
    ) -> Result<X509BundleSet, WorkloadApiError> {
        let mut bundle_set = X509BundleSet::new();
        for (td, bundle_der) in response.bundles {
            let trust_domain = TrustDomain::try_from(td)?;
            let bundle = X509Bundle::parse_from_der(trust_domain, &bundle_der)?;
            bundle_set.add_bundle(bundle);
        }
        Ok(bundle_set)
    }

    fn parse_x509_context(response: X509svidResponse) -> Result<X509Context, WorkloadApiError> {
        let mut svids: Vec<Arc<X509Svid>> = Vec::new();
        let mut bundle_set = X509BundleSet::new();

        for svid in &response.svids {
            let hint = (!svid.hint.is_empty()).then(|| Arc::<str>::from(svid.hint.as_str()));

            let x509_svid =
                X509Svid::parse_from_der_with_hint(&svid.x509_svid, &svid.x509_svid_key, hint)?;

            let trust_domain = x509_svid.spiffe_id().trust_domain().clone();
            svids.push(Arc::new(x509_svid));

            let bundle = X509Bundle::parse_from_der(trust_domain, &svid.bundle)?;
            bundle_set.add_bundle(bundle);
        }

        for (trust_domain, bundle_der) in response.federated_bundles {
            let trust_domain = TrustDomain::try_from(trust_domain)?;
            let bundle = X509Bundle::parse_from_der(trust_domain, &bundle_der)?;
            bundle_set.add_bundle(bundle);
        }

        Ok(X509Context::new(svids, Arc::new(bundle_set)))
    }
}
