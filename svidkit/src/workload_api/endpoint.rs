//! Workload API endpoint discovery.
//!
//! Clients discover the agent endpoint via the `SPIFFE_ENDPOINT_SOCKET`
//! environment variable when no explicit address is configured.

use crate::constants::SPIFFE_SOCKET_ENV;
use crate::endpoint::Endpoint;
use crate::workload_api::error::WorkloadApiError;

/// Loads and parses the Workload API endpoint from `SPIFFE_ENDPOINT_SOCKET`.
///
/// # Errors
///
/// Returns a [`WorkloadApiError`] if the variable is not set or its value is
/// not a valid endpoint URI.
pub fn from_env() -> Result<Endpoint, WorkloadApiError> {
    let raw =
        std::env::var(SPIFFE_SOCKET_ENV).map_err(|_| WorkloadApiError::MissingEndpointSocket)?;
    Ok(Endpoint::parse(&raw)?)
}
