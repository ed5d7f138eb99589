//! HTTP middleware.

pub mod cors;

pub use cors::allow_cors;
