//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Pick pretty or JSON output
//! - Honour `RUST_LOG` over the configured level
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Parse a configured format name; anything but "json" is pretty.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Filter directive used when `RUST_LOG` is unset.
///
/// A bare level applies to this crate and tower-http; anything else is taken verbatim.
pub fn default_directive(level: &str) -> String {
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("rpc_gateway={level},tower_http={level},warn")
    }
}

/// Install the global subscriber. Returns `false` if one was already installed.
pub fn init(level: &str, format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names() {
        assert_eq!(LogFormat::from_name("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_name("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_name("other"), LogFormat::Pretty);
    }

    #[test]
    fn test_default_filter_accepts_directives() {
        assert_eq!(
            default_directive("debug"),
            "rpc_gateway=debug,tower_http=debug,warn"
        );
        assert_eq!(default_directive("rpc_gateway=trace"), "rpc_gateway=trace");
        assert!(EnvFilter::try_new(default_directive("info")).is_ok());
    }
}
