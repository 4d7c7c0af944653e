//! Workload API client and supporting types.

mod client;
pub mod endpoint;
pub mod error;
pub(crate) mod pb;
pub(crate) mod supervisor_common;
mod x509_context;

pub use client::WorkloadApiClient;
pub use error::WorkloadApiError;
pub use x509_context::X509Context;
