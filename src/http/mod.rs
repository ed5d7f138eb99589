//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, CORS, timeout)
//!     → [routing layer picks the method]
//!     → request.rs (path, query and body → request message)
//!     → [rpc layer calls the backend]
//!     → response.rs (reply → JSON, metadata → headers)
//!     → Send to client
//!
//! Upgrade requests:
//!     → websocket.rs (bridge session per connection)
//! ```

pub mod error;
pub mod index;
pub mod metadata;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use error::GatewayError;
pub use server::{AppState, HttpServer};
