use crate::constants::DEFAULT_SVID;
use crate::workload_api::pb::workload::{
    JwtBundlesRequest, JwtBundlesResponse, JwtsvidRequest, ValidateJwtsvidRequest,
    ValidateJwtsvidResponse,
};
use crate::{
    JwtBundle, JwtBundleSet, JwtSvid, SpiffeId, TrustDomain, WorkloadApiClient, WorkloadApiError,
};
use std::str::FromStr as _;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt as _};

impl WorkloadApiClient {
    /// Fetches the current set of JWT bundles.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkloadApiError`] if the request fails, the stream ends
    /// before the first message, or the received data is invalid.
    pub async fn fetch_jwt_bundles(&self) -> Result<JwtBundleSet, WorkloadApiError> {
        let mut client = self.client.clone();
        let response = client.fetch_jwt_bundles(JwtBundlesRequest::default()).await?;
        let message = Self::first_message(response.into_inner()).await?;
        Self::parse_jwt_bundle_set(message)
    }

    /// Fetches a JWT-SVID for the given audience and optional SPIFFE ID.
    ///
    /// With no `spiffe_id`, the agent returns the default identity.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkloadApiError`] if the request fails or the response is
    /// invalid or empty.
    pub async fn fetch_jwt_svid<I>(
        &self,
        audience: I,
        spiffe_id: Option<&SpiffeId>,
    ) -> Result<JwtSvid, WorkloadApiError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let response = self.fetch_jwt(audience, spiffe_id).await?;
        let entry = response
            .svids
            .get(DEFAULT_SVID)
            .ok_or(WorkloadApiError::EmptyResponse)?;

        let mut svid = JwtSvid::from_str(&entry.svid)?;
        if !entry.hint.is_empty() {
            svid = svid.with_hint(Arc::<str>::from(entry.hint.as_str()));
        }
        Ok(svid)
    }

    /// Fetches all JWT-SVIDs for the given audience and optional SPIFFE ID.
    ///
    /// Each returned [`JwtSvid`] may carry a hint to help tell identities
    /// apart.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkloadApiError`] if the request fails or any token
    /// cannot be parsed.
    pub async fn fetch_all_jwt_svids<I>(
        &self,
        audience: I,
        spiffe_id: Option<&SpiffeId>,
    ) -> Result<Vec<JwtSvid>, WorkloadApiError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let response = self.fetch_jwt(audience, spiffe_id).await?;

        response
            .svids
            .into_iter()
            .map(|entry| {
                let mut svid = JwtSvid::from_str(&entry.svid)?;
                if !entry.hint.is_empty() {
                    svid = svid.with_hint(Arc::<str>::from(entry.hint.as_str()));
                }
                Ok(svid)
            })
            .collect()
    }

    /// Fetches the JWT-SVID whose Workload API hint matches `hint`.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkloadApiError`] if the request fails or no SVID with
    /// the requested hint exists.
    pub async fn fetch_jwt_svid_by_hint<I>(
        &self,
        audience: I,
        spiffe_id: Option<&SpiffeId>,
        hint: impl AsRef<str>,
    ) -> Result<JwtSvid, WorkloadApiError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let hint = hint.as_ref();
        let all = self.fetch_all_jwt_svids(audience, spiffe_id).await?;
        all.into_iter()
            .find(|s| s.hint() == Some(hint))
            .ok_or_else(|| WorkloadApiError::HintNotFound(hint.to_owned()))
    }

    /// Validates a JWT-SVID token against the given audience via the agent,
    /// then parses it locally for structured access.
    ///
    /// The security property comes from the agent's validation; the local
    /// parse is insecure by design.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkloadApiError`] if validation fails or the token cannot
    /// be parsed.
    pub async fn validate_jwt_token(
        &self,
        audience: impl AsRef<str>,
        jwt_token: &str,
    ) -> Result<JwtSvid, WorkloadApiError> {
        let _: ValidateJwtsvidResponse = self.validate_jwt(audience.as_ref(), jwt_token).await?;
        Ok(JwtSvid::parse_insecure(jwt_token)?)
    }

    /// Streams JWT bundle set updates.
    ///
    /// The stream ends when the agent closes the connection; it does not
    /// reconnect. Use [`crate::JwtSource`] for a resilient cached view.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkloadApiError`] if the stream cannot be established.
    pub async fn stream_jwt_bundles(
        &self,
    ) -> Result<
        impl Stream<Item = Result<JwtBundleSet, WorkloadApiError>> + Send + 'static + use<>,
        WorkloadApiError,
    > {
        let mut client = self.client.clone();
        let response = client.fetch_jwt_bundles(JwtBundlesRequest::default()).await?;
        let stream = response.into_inner().map(|message| {
            message
                .map_err(WorkloadApiError::from)
                .and_then(Self::parse_jwt_bundle_set)
        });
        Ok(Box::pin(stream))
    }
}

impl WorkloadApiClient {
    async fn fetch_jwt<I>(
        &self,
        audience: I,
        spiffe_id: Option<&SpiffeId>,
    ) -> Result<crate::workload_api::pb::workload::JwtsvidResponse, WorkloadApiError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let request = JwtsvidRequest {
            spiffe_id: spiffe_id.map(ToString::to_string).unwrap_or_default(),
            audience: audience
                .into_iter()
                .map(|a| a.as_ref().to_string())
                .collect(),
        };

        let mut client = self.client.clone();
        Ok(client.fetch_jwtsvid(request).await?.into_inner())
    }

    async fn validate_jwt(
        &self,
        audience: &str,
        jwt_svid: &str,
    ) -> Result<ValidateJwtsvidResponse, WorkloadApiError> {
        let request = ValidateJwtsvidRequest {
            audience: audience.to_owned(),
            svid: jwt_svid.to_owned(),
        };
        let mut client = self.client.clone();
        Ok(client.validate_jwtsvid(request).await?.into_inner())
    }

    fn parse_jwt_bundle_set(response: JwtBundlesResponse) -> Result<JwtBundleSet, WorkloadApiError> {
        let mut bundle_set = JwtBundleSet::new();

        for (td, bundle_data) in response.bundles {
            let trust_domain = TrustDomain::try_from(td)?;
            let bundle = JwtBundle::from_jwt_authorities(trust_domain, &bundle_data)?;
            bundle_set.add_bundle(bundle);
        }

        Ok(bundle_set)
    }
}
