//! HTTP/JSON and WebSocket gateway in front of a gRPC backend.
//!
//! Services are described by a compiled `FileDescriptorSet`; every method gets an HTTP
//! route, streaming methods are also reachable over WebSocket, and a generated index page
//! lists the read-only endpoints.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;
pub mod rpc;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
