//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, CLI overrides applied by the caller)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → consumed once by lifecycle::startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the route table is built from it exactly once
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{parse_config, read_config, validated, ConfigError};
pub use validation::{validate_config, ValidationError};
pub use schema::{
    BackendConfig, DescriptorConfig, GatewayConfig, ListenerConfig, MarshalerConfig,
    MetadataConfig, ObservabilityConfig, RouteConfig, TimeoutConfig, WebSocketConfig,
};
