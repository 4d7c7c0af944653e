//! Crate-wide constants.

/// Index of the default SVID in a Workload API response.
///
/// The Workload API orders SVIDs by preference; the first entry is the
/// default identity of the workload.
pub const DEFAULT_SVID: usize = 0;

/// Environment variable selecting the Workload API endpoint when no explicit
/// address is configured.
pub const SPIFFE_SOCKET_ENV: &str = "SPIFFE_ENDPOINT_SOCKET";
