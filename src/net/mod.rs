//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Startup
//!     → connection.rs (dial the gRPC backend once)
//!     → Channel cloned into every call
//!
//! Connection States:
//!     Dialing → Open → Closed
//! ```
//!
//! # Design Decisions
//! - One multiplexed HTTP/2 channel for all calls
//! - Closed exactly once, when shutdown is triggered

pub mod connection;

pub use connection::{ConnectOptions, ConnectionManager, DialFailure};
