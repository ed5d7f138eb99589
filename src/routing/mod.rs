//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (verb, path)
//!     → router.rs (strip mount prefix, scan routes with a matching verb)
//!     → matcher.rs (compare segments, extract captures)
//!     → Return: matched Route + captures, or NotFound
//!
//! Route Compilation (at startup):
//!     ServiceCatalog + RouteConfig[]
//!     → Compile templates
//!     → Bind captures and body to input fields
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (segment comparison only)
//! - Deterministic: same input always matches same route
//! - First match wins (registration order)

pub mod matcher;
pub mod router;

pub use matcher::{Captures, MalformedPattern, Pattern};
pub use router::{ConflictingRoute, Handler, NotFound, RouteError, RouteTable};
