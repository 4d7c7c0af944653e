//! Live X.509 SVID and bundle source backed by the SPIFFE Workload API.
//!
//! [`X509Source`] performs an initial synchronization before becoming
//! usable, then watches the Workload API for rotations, reconnecting with
//! exponential backoff on transient failures. Subscribe to rotations via
//! [`X509Source::updated`]; stop background work with
//! [`X509Source::shutdown`].

mod builder;
mod errors;
mod limits;
mod source;
mod supervisor;
mod types;

pub use builder::{ReconnectConfig, ResourceLimits, X509SourceBuilder};
pub use errors::{LimitKind, X509SourceError};
pub use source::{X509Source, X509SourceUpdates};
pub use types::{ClientFactory, ClientFuture, SvidPicker};
