//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes in registration order
//! - Reject registrations that could never be reached
//! - Look up the handler for a verb and path
//! - Build the gateway's table from the service catalog and configured rules
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in registration order; first match wins
//! - Explicit NotFound rather than silent default

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use axum::http::Method;
use thiserror::Error;

use crate::config::schema::RouteConfig;
use crate::routing::matcher::{Captures, MalformedPattern, Pattern};
use crate::rpc::descriptor::{
    InvalidBinding, MethodBinding, MethodEntry, MethodKind, ServiceCatalog, StreamingMode,
};

/// A second registration with the same verb and the same path shape.
#[derive(Debug, Clone, Error)]
#[error("{verb} {template} for {method} conflicts with the route registered for {existing}")]
pub struct ConflictingRoute {
    pub verb: Method,
    pub template: String,
    pub method: String,
    pub existing: String,
}

/// No route accepts the verb and path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no route for {verb} {path}")]
pub struct NotFound {
    pub verb: Method,
    pub path: String,
}

/// Startup failures while building the gateway's route table.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Malformed(#[from] MalformedPattern),
    #[error(transparent)]
    Conflict(#[from] ConflictingRoute),
    #[error(transparent)]
    Binding(#[from] InvalidBinding),
}

/// A compiled route.
#[derive(Debug, Clone)]
pub struct RouteEntry<H> {
    pub verb: Method,
    pub pattern: Pattern,
    pub handler: H,
    /// Method the route was registered for.
    pub method_name: String,
}

/// Result of a successful lookup.
#[derive(Debug)]
pub struct Matched<'a, H> {
    pub entry: &'a RouteEntry<H>,
    pub captures: Captures,
}

/// Ordered routes mounted under an optional path prefix.
#[derive(Debug, Clone)]
pub struct RouteTable<H> {
    prefix: String,
    routes: Vec<RouteEntry<H>>,
}

impl<H> RouteTable<H> {
    /// Create an empty table. `prefix` is stripped from every path before matching.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            routes: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn routes(&self) -> &[RouteEntry<H>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Append a route. Earlier registrations take precedence.
    pub fn register(
        &mut self,
        verb: Method,
        pattern: Pattern,
        handler: H,
        method_name: &str,
    ) -> Result<(), ConflictingRoute> {
        if let Some(existing) = self
            .routes
            .iter()
            .find(|r| r.verb == verb && r.pattern.same_shape(&pattern))
        {
            return Err(ConflictingRoute {
                verb,
                template: pattern.template().to_string(),
                method: method_name.to_string(),
                existing: existing.method_name.clone(),
            });
        }

        tracing::debug!(verb = %verb, pattern = %pattern, method = %method_name, "Route registered");
        self.routes.push(RouteEntry {
            verb,
            pattern,
            handler,
            method_name: method_name.to_string(),
        });
        Ok(())
    }

    /// Find the first route accepting `verb` and `path`.
    pub fn dispatch(&self, verb: &Method, path: &str) -> Result<Matched<'_, H>, NotFound> {
        let not_found = || NotFound {
            verb: verb.clone(),
            path: path.to_string(),
        };
        let relative = self.strip_prefix(path).ok_or_else(not_found)?;

        self.routes
            .iter()
            .filter(|r| r.verb == *verb)
            .find_map(|entry| {
                entry
                    .pattern
                    .match_path(relative)
                    .map(|captures| Matched { entry, captures })
            })
            .ok_or_else(not_found)
    }

    /// First route accepting `path`, whatever its verb, among those `accept` allows.
    pub fn dispatch_where<F>(&self, path: &str, accept: F) -> Option<Matched<'_, H>>
    where
        F: Fn(&RouteEntry<H>) -> bool,
    {
        let relative = self.strip_prefix(path)?;
        self.routes.iter().filter(|r| accept(r)).find_map(|entry| {
            entry
                .pattern
                .match_path(relative)
                .map(|captures| Matched { entry, captures })
        })
    }

    fn strip_prefix<'p>(&self, path: &'p str) -> Option<&'p str> {
        if self.prefix.is_empty() {
            return Some(path);
        }
        let rest = path.strip_prefix(self.prefix.as_str())?;
        match rest {
            "" => Some("/"),
            rest if rest.starts_with('/') => Some(rest),
            _ => None,
        }
    }
}

/// What the gateway does with a matched request.
#[derive(Debug, Clone)]
pub enum Handler {
    /// Serve the generated index page.
    Index,
    /// Call a backend method.
    Rpc(Arc<MethodBinding>),
}

impl Handler {
    pub fn binding(&self) -> Option<&MethodBinding> {
        match self {
            Handler::Index => None,
            Handler::Rpc(binding) => Some(binding),
        }
    }
}

impl fmt::Display for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Index => f.write_str("index"),
            Handler::Rpc(binding) => f.write_str(binding.full_name()),
        }
    }
}

impl RouteTable<Handler> {
    /// Build the table: the index route, then configured rules in order, then a default
    /// route for every method without a rule.
    pub fn from_catalog(
        catalog: &ServiceCatalog,
        rules: &[RouteConfig],
        prefix: &str,
    ) -> Result<Self, RouteError> {
        let mut table = Self::new(prefix);
        table.register(Method::GET, Pattern::compile("/")?, Handler::Index, "index")?;

        let mut bound = HashSet::new();
        for rule in rules {
            let entry = catalog
                .find_method(&rule.method)
                .ok_or_else(|| InvalidBinding::UnknownMethod(rule.method.clone()))?;
            let verb = Method::from_bytes(rule.verb.to_ascii_uppercase().as_bytes()).map_err(
                |_| InvalidBinding::InvalidVerb {
                    method: rule.method.clone(),
                    verb: rule.verb.clone(),
                },
            )?;
            let pattern = Pattern::compile(&rule.path)?;
            table.bind(entry, verb, pattern, rule.body.as_deref())?;
            bound.insert(entry.qualified_name());
        }

        for service in catalog.services() {
            for entry in &service.methods {
                if bound.contains(&entry.qualified_name()) {
                    continue;
                }
                let (verb, body) = default_rule(entry);
                let pattern = Pattern::compile(&format!("/{}", entry.route_name))?;
                table.bind(entry, verb, pattern, body)?;
            }
        }

        tracing::info!(routes = table.len(), prefix = %table.prefix, "Route table built");
        Ok(table)
    }

    /// First streaming-method route accepting `path`, ignoring the verb.
    pub fn dispatch_upgrade(&self, path: &str) -> Option<Matched<'_, Handler>> {
        self.dispatch_where(path, |entry| {
            entry
                .handler
                .binding()
                .is_some_and(|b| b.mode.is_streaming())
        })
    }

    fn bind(
        &mut self,
        entry: &MethodEntry,
        verb: Method,
        pattern: Pattern,
        body: Option<&str>,
    ) -> Result<(), RouteError> {
        let binding = MethodBinding::new(entry, body, &pattern)?;
        let name = entry.qualified_name();
        self.register(verb, pattern, Handler::Rpc(Arc::new(binding)), &name)?;
        Ok(())
    }
}

fn default_rule(entry: &MethodEntry) -> (Method, Option<&'static str>) {
    match (entry.kind, entry.mode) {
        (MethodKind::Query, _) => (Method::GET, None),
        (MethodKind::Stream, StreamingMode::ServerStreaming) => (Method::GET, None),
        _ => (Method::POST, Some("*")),
    }
}
