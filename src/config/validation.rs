//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, the backend endpoint and value ranges
//! - Check route rules are well formed before descriptors are loaded
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Route templates are compiled later, against the descriptors, at startup

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: {value:?} is not a socket address")]
    InvalidAddress { field: &'static str, value: String },
    #[error("backend.endpoint: {value:?} is not an http(s) URL")]
    InvalidEndpoint { value: String },
    #[error("descriptors.path must be set")]
    MissingDescriptorSet,
    #[error("listener.mount_prefix {0:?} must start with '/' and not end with '/'")]
    InvalidMountPrefix(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("routes[{index}].method {method:?} must look like package.Service/Method")]
    InvalidMethodName { index: usize, method: String },
    #[error("observability.log_format {0:?} must be \"pretty\" or \"json\"")]
    InvalidLogFormat(String),
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    let prefix = &config.listener.mount_prefix;
    if !prefix.is_empty() && (!prefix.starts_with('/') || prefix.ends_with('/')) {
        errors.push(ValidationError::InvalidMountPrefix(prefix.clone()));
    }

    match url::Url::parse(&config.backend.endpoint) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {}
        _ => errors.push(ValidationError::InvalidEndpoint {
            value: config.backend.endpoint.clone(),
        }),
    }

    if config.descriptors.path.is_empty() {
        errors.push(ValidationError::MissingDescriptorSet);
    }

    if config.backend.connect_timeout_secs == 0 {
        errors.push(ValidationError::Zero("backend.connect_timeout_secs"));
    }
    if config.backend.request_timeout_secs == Some(0) {
        errors.push(ValidationError::Zero("backend.request_timeout_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.request_secs"));
    }
    if config.websocket.grace_period_ms == 0 {
        errors.push(ValidationError::Zero("websocket.grace_period_ms"));
    }
    if config.websocket.channel_capacity == 0 {
        errors.push(ValidationError::Zero("websocket.channel_capacity"));
    }

    for (index, route) in config.routes.iter().enumerate() {
        let well_formed = route
            .method
            .split_once('/')
            .is_some_and(|(service, method)| service.contains('.') && !method.is_empty());
        if !well_formed {
            errors.push(ValidationError::InvalidMethodName {
                index,
                method: route.method.clone(),
            });
        }
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::InvalidLogFormat(
            config.observability.log_format.clone(),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
