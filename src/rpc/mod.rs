//! Backend RPC plumbing.
//!
//! - `descriptor`: service catalog and HTTP bindings, built from a descriptor set
//! - `client`: the [`Upstream`] seam and its gRPC implementation
//! - `codec`: tonic codec for dynamic messages
//! - `status`: gRPC status to HTTP status mapping

pub mod client;
pub mod codec;
pub mod descriptor;
pub mod status;

#[cfg(test)]
pub(crate) mod fixtures;

pub use client::{GrpcUpstream, Upstream};
pub use descriptor::{MethodBinding, MethodKind, ServiceCatalog, StreamingMode};
