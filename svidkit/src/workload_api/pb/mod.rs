//! Protobuf bindings for the SPIFFE Workload API.
//!
//! These bindings cover the `SpiffeWorkloadAPI` service from the SPIFFE
//! Workload API standard. They are checked in and maintained by hand in the
//! shape `tonic-build` emits, so building the crate does not require
//! `protoc`.
//!
//! Lints are relaxed for this module because the binding style does not
//! follow the crate's documentation conventions.
#![allow(clippy::all, clippy::pedantic)]
#![allow(missing_docs)]

pub mod workload;
