//! Live JWT bundle source backed by the SPIFFE Workload API.
//!
//! [`JwtSource`] caches the agent's JWT bundle set and keeps it current in
//! the background; JWT-SVIDs are fetched on demand per audience via
//! [`JwtSource::jwt_svid`].

mod builder;
mod errors;
mod source;
mod supervisor;

pub use builder::JwtSourceBuilder;
pub use errors::JwtSourceError;
pub use source::{JwtSource, JwtSourceUpdates};
