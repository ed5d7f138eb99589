//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load descriptors → Dial backend → Build routes → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Token cancelled → Stop accepting → Cancel bridges → Close backend connection
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: descriptors first, then backend, then listeners
//! - One cancellation token drives every part of shutdown

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{assemble, start, Gateway, StartupError};
