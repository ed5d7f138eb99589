//! Service descriptor catalog.
//!
//! # Responsibilities
//! - Load a compiled protobuf `FileDescriptorSet`
//! - Enumerate services and methods in declaration order
//! - Tag every method with its streaming mode and [`MethodKind`]
//! - Resolve HTTP bindings (body field, capture field paths) against input types
//!
//! # Design Decisions
//! - Built once at startup, immutable afterwards
//! - The read-only naming convention is evaluated here, once, never at render time

use std::path::{Path, PathBuf};

use prost_reflect::{DescriptorPool, FieldDescriptor, Kind, MessageDescriptor, MethodDescriptor};
use thiserror::Error;

use crate::routing::matcher::Pattern;

/// Errors while loading the descriptor set.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to read descriptor set {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid descriptor set: {0}")]
    Decode(#[from] prost_reflect::DescriptorError),
    #[error("service {0:?} is not present in the descriptor set")]
    UnknownService(String),
}

/// How a method streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingMode {
    Unary,
    ServerStreaming,
    ClientStreaming,
    Bidirectional,
}

impl StreamingMode {
    pub fn of(method: &MethodDescriptor) -> Self {
        match (method.is_client_streaming(), method.is_server_streaming()) {
            (false, false) => StreamingMode::Unary,
            (false, true) => StreamingMode::ServerStreaming,
            (true, false) => StreamingMode::ClientStreaming,
            (true, true) => StreamingMode::Bidirectional,
        }
    }

    pub fn is_streaming(self) -> bool {
        self != StreamingMode::Unary
    }

    /// True when the client sends more than one message.
    pub fn client_streams(self) -> bool {
        matches!(self, StreamingMode::ClientStreaming | StreamingMode::Bidirectional)
    }
}

/// Explicit role of a method, decided when the catalog is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Read-only lookup, listed on the index page.
    Query,
    /// State-changing unary call.
    Mutation,
    /// Any streaming call.
    Stream,
}

impl MethodKind {
    fn classify<'p>(
        name: &str,
        mode: StreamingMode,
        query_prefixes: &'p [String],
    ) -> (Self, Option<&'p str>) {
        if mode.is_streaming() {
            return (MethodKind::Stream, None);
        }
        let prefix = query_prefixes
            .iter()
            .find(|p| name.len() > p.len() && name.starts_with(p.as_str()));
        match prefix {
            Some(prefix) => (MethodKind::Query, Some(prefix.as_str())),
            None => (MethodKind::Mutation, None),
        }
    }
}

/// One method of a service.
#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub descriptor: MethodDescriptor,
    pub mode: StreamingMode,
    pub kind: MethodKind,
    /// Method name with the query prefix removed (`GetAccount` -> `Account`).
    pub route_name: String,
}

impl MethodEntry {
    /// `package.Service/Method`, the form used in route rules.
    pub fn qualified_name(&self) -> String {
        format!(
            "{}/{}",
            self.descriptor.parent_service().full_name(),
            self.descriptor.name()
        )
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }
}

/// One service and its methods, in declaration order.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    pub full_name: String,
    pub methods: Vec<MethodEntry>,
}

/// All services the gateway exposes.
#[derive(Debug, Clone)]
pub struct ServiceCatalog {
    pool: DescriptorPool,
    services: Vec<ServiceEntry>,
}

impl ServiceCatalog {
    /// Load a binary `FileDescriptorSet` from disk.
    pub fn load(
        path: &Path,
        allow: &[String],
        query_prefixes: &[String],
    ) -> Result<Self, DescriptorError> {
        let bytes = std::fs::read(path).map_err(|source| DescriptorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let pool = DescriptorPool::decode(bytes.as_slice())?;
        Self::from_pool(pool, allow, query_prefixes)
    }

    /// Build the catalog from a pool. An empty allow-list exposes every service.
    pub fn from_pool(
        pool: DescriptorPool,
        allow: &[String],
        query_prefixes: &[String],
    ) -> Result<Self, DescriptorError> {
        if let Some(missing) = allow
            .iter()
            .find(|name| pool.get_service_by_name(name).is_none())
        {
            return Err(DescriptorError::UnknownService(missing.clone()));
        }

        let services = pool
            .services()
            .filter(|s| allow.is_empty() || allow.iter().any(|a| a == s.full_name()))
            .map(|service| ServiceEntry {
                full_name: service.full_name().to_string(),
                methods: service
                    .methods()
                    .map(|descriptor| {
                        let mode = StreamingMode::of(&descriptor);
                        let (kind, prefix) =
                            MethodKind::classify(descriptor.name(), mode, query_prefixes);
                        let route_name = match prefix {
                            Some(prefix) => descriptor.name()[prefix.len()..].to_string(),
                            None => descriptor.name().to_string(),
                        };
                        MethodEntry {
                            descriptor,
                            mode,
                            kind,
                            route_name,
                        }
                    })
                    .collect(),
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            services = services.len(),
            methods = services.iter().map(|s| s.methods.len()).sum::<usize>(),
            "Service catalog built"
        );

        Ok(Self { pool, services })
    }

    pub fn services(&self) -> &[ServiceEntry] {
        &self.services
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// Look up a method by `package.Service/Method` (a `.` separator is also accepted).
    pub fn find_method(&self, qualified: &str) -> Option<&MethodEntry> {
        let (service, method) = qualified
            .rsplit_once('/')
            .or_else(|| qualified.rsplit_once('.'))?;
        self.services
            .iter()
            .find(|s| s.full_name == service)?
            .methods
            .iter()
            .find(|m| m.name() == method)
    }
}

/// Where the JSON request body goes.
#[derive(Debug, Clone)]
pub enum BodyBinding {
    /// No body is read.
    None,
    /// The body is the whole request message.
    Whole,
    /// The body fills one message-typed field.
    Field(FieldDescriptor),
}

/// An HTTP rule bound to a method that could not be resolved.
#[derive(Debug, Clone, Error)]
pub enum InvalidBinding {
    #[error("route names unknown method {0:?}")]
    UnknownMethod(String),
    #[error("route for {method} has invalid verb {verb:?}")]
    InvalidVerb { method: String, verb: String },
    #[error("route for {method} binds unknown field {field:?}")]
    UnknownField { method: String, field: String },
    #[error("route for {method} binds {field:?}, which is not a singular scalar field")]
    NotScalar { method: String, field: String },
    #[error("route for {method} uses {field:?} as body, which is not a message field")]
    BodyNotMessage { method: String, field: String },
}

/// Everything a handler needs to know about the method behind a route.
#[derive(Debug, Clone)]
pub struct MethodBinding {
    pub method: MethodDescriptor,
    pub mode: StreamingMode,
    pub kind: MethodKind,
    pub body: BodyBinding,
    /// Input field paths bound by the path template.
    pub path_fields: Vec<String>,
}

impl MethodBinding {
    /// Resolve a rule's body selector and capture names against the method's input type.
    pub fn new(
        entry: &MethodEntry,
        body: Option<&str>,
        pattern: &Pattern,
    ) -> Result<Self, InvalidBinding> {
        let input = entry.descriptor.input();
        let method = entry.qualified_name();

        let body = match body {
            None | Some("") => BodyBinding::None,
            Some("*") => BodyBinding::Whole,
            Some(name) => {
                let field = input.get_field_by_name(name).ok_or_else(|| {
                    InvalidBinding::UnknownField {
                        method: method.clone(),
                        field: name.to_string(),
                    }
                })?;
                if !matches!(field.kind(), Kind::Message(_)) || field.is_list() || field.is_map() {
                    return Err(InvalidBinding::BodyNotMessage {
                        method,
                        field: name.to_string(),
                    });
                }
                BodyBinding::Field(field)
            }
        };

        let mut path_fields = Vec::new();
        for name in pattern.capture_names() {
            if name.parse::<usize>().is_ok() {
                continue;
            }
            let chain = resolve_field_path(&input, name).ok_or_else(|| {
                InvalidBinding::UnknownField {
                    method: method.clone(),
                    field: name.to_string(),
                }
            })?;
            let leaf = chain.last().ok_or_else(|| InvalidBinding::UnknownField {
                method: method.clone(),
                field: name.to_string(),
            })?;
            if matches!(leaf.kind(), Kind::Message(_)) || leaf.is_map() {
                return Err(InvalidBinding::NotScalar {
                    method,
                    field: name.to_string(),
                });
            }
            path_fields.push(name.to_string());
        }

        Ok(Self {
            method: entry.descriptor.clone(),
            mode: entry.mode,
            kind: entry.kind,
            body,
            path_fields,
        })
    }

    pub fn full_name(&self) -> &str {
        self.method.full_name()
    }
}

/// Look up a field by proto name, falling back to its JSON name.
pub fn find_field(message: &MessageDescriptor, name: &str) -> Option<FieldDescriptor> {
    message
        .get_field_by_name(name)
        .or_else(|| message.get_field_by_json_name(name))
}

/// Resolve a dotted field path; every component but the last must be a singular message.
pub fn resolve_field_path(message: &MessageDescriptor, path: &str) -> Option<Vec<FieldDescriptor>> {
    let mut chain = Vec::new();
    let mut current = message.clone();
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let field = find_field(&current, part)?;
        if parts.peek().is_some() {
            match field.kind() {
                Kind::Message(next) if !field.is_list() && !field.is_map() => current = next,
                _ => return None,
            }
        }
        chain.push(field);
    }
    Some(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::fixtures;

    fn catalog() -> ServiceCatalog {
        ServiceCatalog::from_pool(fixtures::pool(), &[], &["Get".to_string()]).unwrap()
    }

    #[test]
    fn test_methods_are_tagged_at_build_time() {
        let catalog = catalog();
        let account = catalog.find_method("gallactic.v1.BlockChain/GetAccount").unwrap();
        assert_eq!(account.kind, MethodKind::Query);
        assert_eq!(account.route_name, "Account");

        let search = catalog.find_method("gallactic.v1.BlockChain/Search").unwrap();
        assert_eq!(search.kind, MethodKind::Mutation);
        assert_eq!(search.route_name, "Search");

        let subscribe = catalog.find_method("gallactic.v1.Events/Subscribe").unwrap();
        assert_eq!(subscribe.kind, MethodKind::Stream);
        assert_eq!(subscribe.mode, StreamingMode::ServerStreaming);

        let chat = catalog.find_method("gallactic.v1.Events.Chat").unwrap();
        assert_eq!(chat.mode, StreamingMode::Bidirectional);
    }

    #[test]
    fn test_bare_prefix_is_not_a_query() {
        let (kind, _) = MethodKind::classify("Get", StreamingMode::Unary, &["Get".to_string()]);
        assert_eq!(kind, MethodKind::Mutation);
    }

    #[test]
    fn test_allow_list() {
        let catalog = ServiceCatalog::from_pool(
            fixtures::pool(),
            &["gallactic.v1.Network".to_string()],
            &[],
        )
        .unwrap();
        assert_eq!(catalog.services().len(), 1);

        let err = ServiceCatalog::from_pool(fixtures::pool(), &["nope.Svc".to_string()], &[])
            .unwrap_err();
        assert!(matches!(err, DescriptorError::UnknownService(name) if name == "nope.Svc"));
    }

    #[test]
    fn test_binding_validates_fields() {
        let catalog = catalog();
        let search = catalog.find_method("gallactic.v1.BlockChain/Search").unwrap();

        let pattern = Pattern::compile("/search/{name}/{range.start}").unwrap();
        let binding = MethodBinding::new(search, Some("range"), &pattern).unwrap();
        assert_eq!(binding.path_fields, ["name", "range.start"]);
        assert!(matches!(binding.body, BodyBinding::Field(_)));

        let pattern = Pattern::compile("/search/{missing}").unwrap();
        assert!(matches!(
            MethodBinding::new(search, None, &pattern),
            Err(InvalidBinding::UnknownField { .. })
        ));

        let pattern = Pattern::compile("/search/{range}").unwrap();
        assert!(matches!(
            MethodBinding::new(search, None, &pattern),
            Err(InvalidBinding::NotScalar { .. })
        ));

        let pattern = Pattern::compile("/search").unwrap();
        assert!(matches!(
            MethodBinding::new(search, Some("name"), &pattern),
            Err(InvalidBinding::BodyNotMessage { .. })
        ));
    }
}
