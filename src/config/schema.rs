//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, mount prefix).
    pub listener: ListenerConfig,

    /// gRPC backend connection.
    pub backend: BackendConfig,

    /// Where service descriptors come from.
    pub descriptors: DescriptorConfig,

    /// Explicit HTTP rules. Methods without a rule get a default route.
    pub routes: Vec<RouteConfig>,

    /// HTTP header to call metadata forwarding.
    pub metadata: MetadataConfig,

    /// JSON marshaling options.
    pub marshaler: MarshalerConfig,

    /// WebSocket bridge settings.
    pub websocket: WebSocketConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Host used in index page links. Defaults to the bind address.
    pub public_address: Option<String>,

    /// Path prefix every route is mounted under (e.g., "/api"). Empty for root.
    pub mount_prefix: String,

    /// Maximum accepted request body in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            public_address: None,
            mount_prefix: String::new(),
            max_body_size: 4 * 1024 * 1024,
        }
    }
}

impl ListenerConfig {
    /// Address advertised in index links: `public_address`, else the bound address.
    pub fn advertised_address(&self, bound: SocketAddr) -> String {
        self.public_address
            .clone()
            .unwrap_or_else(|| bound.to_string())
    }
}

/// Backend connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// gRPC endpoint (e.g., "http://127.0.0.1:50051").
    pub endpoint: String,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Per-call deadline in seconds, sent as `grpc-timeout`. None for no deadline.
    pub request_timeout_secs: Option<u64>,

    /// TCP keepalive interval in seconds. 0 disables keepalive.
    pub keepalive_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:50051".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: None,
            keepalive_secs: 60,
        }
    }
}

/// Service descriptor source.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DescriptorConfig {
    /// Path to a binary `FileDescriptorSet` (e.g., from `protoc --descriptor_set_out`).
    pub path: String,

    /// Fully qualified services to expose. Empty exposes all.
    pub services: Vec<String>,

    /// Method name prefixes that mark a read-only query.
    pub query_prefixes: Vec<String>,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            services: Vec::new(),
            query_prefixes: vec!["Get".to_string()],
        }
    }
}

/// HTTP rule binding a route to a method.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Method as `package.Service/Method`.
    pub method: String,

    /// HTTP verb.
    #[serde(default = "default_verb")]
    pub verb: String,

    /// Path template (e.g., "/v1/accounts/{address}").
    pub path: String,

    /// "*" for the whole message, a field name for one field, absent for no body.
    #[serde(default)]
    pub body: Option<String>,
}

fn default_verb() -> String {
    "GET".to_string()
}

/// Header forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// HTTP headers forwarded verbatim as call metadata.
    pub forward_headers: Vec<String>,

    /// Add `x-forwarded-for` / `x-forwarded-host` metadata.
    pub forwarded_for: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            forward_headers: vec!["authorization".to_string()],
            forwarded_for: true,
        }
    }
}

/// JSON marshaling configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MarshalerConfig {
    /// Emit fields holding default values.
    pub emit_defaults: bool,

    /// Use proto field names instead of lowerCamelCase JSON names.
    pub use_proto_names: bool,

    /// Encode 64-bit integers as JSON strings.
    pub stringify_64bit: bool,
}

/// WebSocket bridge configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// How long a draining bridge may take before both sides are forced closed.
    pub grace_period_ms: u64,

    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,

    /// Buffered request messages between the socket and the call.
    pub channel_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 2000,
            max_message_size: 4 * 1024 * 1024,
            channel_capacity: 16,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time until a unary HTTP response must be ready, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
