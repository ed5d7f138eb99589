//! Header ↔ call metadata propagation.
//!
//! # Responsibilities
//! - Build outgoing call metadata from HTTP request headers
//! - Copy response header and trailer metadata into prefixed HTTP headers
//!
//! # Design Decisions
//! - `Grpc-Metadata-<key>` request headers always travel, prefix stripped
//! - Other headers travel only when listed in the configuration
//! - Transport-level keys never cross the boundary in either direction

use std::net::SocketAddr;

use axum::http::header::HOST;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tonic::metadata::MetadataMap;

use crate::config::schema::MetadataConfig;

/// Prefix for metadata carried in HTTP headers.
pub const HEADER_PREFIX: &str = "grpc-metadata-";

/// Prefix for trailer metadata copied into HTTP response headers.
pub const TRAILER_PREFIX: &str = "grpc-trailer-";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";

fn is_reserved(key: &str) -> bool {
    key.starts_with("grpc-")
        || matches!(
            key,
            "content-type" | "content-length" | "te" | "date" | "connection" | "host"
                | "transfer-encoding" | "user-agent"
        )
}

/// Rules for turning request headers into call metadata.
#[derive(Debug, Clone)]
pub struct MetadataForwarding {
    forward_headers: Vec<HeaderName>,
    forwarded_for: bool,
}

impl Default for MetadataForwarding {
    fn default() -> Self {
        Self::from_config(&MetadataConfig::default())
    }
}

impl MetadataForwarding {
    /// Header names that fail to parse are logged and dropped.
    pub fn from_config(config: &MetadataConfig) -> Self {
        let forward_headers = config
            .forward_headers
            .iter()
            .filter_map(|name| match HeaderName::from_bytes(name.as_bytes()) {
                Ok(header) => Some(header),
                Err(e) => {
                    tracing::warn!(header = %name, error = %e, "Ignoring invalid forwarded header name");
                    None
                }
            })
            .collect();
        Self {
            forward_headers,
            forwarded_for: config.forwarded_for,
        }
    }

    /// Metadata to send with a call made for a request carrying `headers`.
    pub fn outgoing(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> MetadataMap {
        let mut out = HeaderMap::new();

        for (name, value) in headers {
            if let Some(key) = name.as_str().strip_prefix(HEADER_PREFIX) {
                if key.is_empty() || is_reserved(key) {
                    continue;
                }
                if let Ok(key) = HeaderName::from_bytes(key.as_bytes()) {
                    out.append(key, value.clone());
                }
            } else if self.forward_headers.contains(name) {
                out.append(name.clone(), value.clone());
            }
        }

        if self.forwarded_for {
            if let Some(host) = headers.get(HOST) {
                out.insert(HeaderName::from_static(X_FORWARDED_HOST), host.clone());
            }
            if let Some(peer) = peer {
                let ip = peer.ip().to_string();
                let chain = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                    Some(existing) => format!("{existing}, {ip}"),
                    None => ip,
                };
                if let Ok(value) = HeaderValue::from_str(&chain) {
                    out.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
                }
            }
        }

        MetadataMap::from_headers(out)
    }
}

/// Copy every non-reserved metadata entry into `headers` under `prefix`.
pub fn write_metadata(metadata: &MetadataMap, prefix: &str, headers: &mut HeaderMap) {
    for (key, value) in metadata.clone().into_headers().iter() {
        if is_reserved(key.as_str()) {
            continue;
        }
        match HeaderName::from_bytes(format!("{prefix}{key}").as_bytes()) {
            Ok(name) => {
                headers.append(name, value.clone());
            }
            Err(e) => tracing::debug!(key = %key, error = %e, "Metadata key cannot be a header"),
        }
    }
}
