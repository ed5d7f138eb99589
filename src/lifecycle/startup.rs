//! Startup orchestration.
//!
//! # Responsibilities
//! - Load the service descriptors
//! - Dial the backend
//! - Build the route table and the index page
//! - Bind the listener and hand everything to the HTTP server
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, GatewayConfig};
use crate::http::index;
use crate::http::metadata::MetadataForwarding;
use crate::http::response::Marshaler;
use crate::http::websocket::BridgeConfig;
use crate::http::{AppState, HttpServer};
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::{ConnectOptions, ConnectionManager, DialFailure};
use crate::routing::{RouteError, RouteTable};
use crate::rpc::client::{GrpcUpstream, Upstream};
use crate::rpc::descriptor::{DescriptorError, ServiceCatalog};

/// Anything that keeps the gateway from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Routes(#[from] RouteError),
    #[error(transparent)]
    Dial(#[from] DialFailure),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// A started gateway, ready to serve.
pub struct Gateway {
    server: HttpServer,
    listener: TcpListener,
    local_addr: SocketAddr,
    closer: JoinHandle<()>,
}

impl Gateway {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until shutdown, then wait for the backend connection to be released.
    pub async fn run(self) -> Result<(), std::io::Error> {
        self.server.run(self.listener).await?;
        if let Err(e) = self.closer.await {
            tracing::warn!(error = %e, "Backend close task failed");
        }
        Ok(())
    }
}

/// Load descriptors, dial the backend, bind the listener.
pub async fn start(config: &GatewayConfig, shutdown: &Shutdown) -> Result<Gateway, StartupError> {
    let descriptors = &config.descriptors;
    let catalog = ServiceCatalog::load(
        Path::new(&descriptors.path),
        &descriptors.services,
        &descriptors.query_prefixes,
    )?;
    tracing::info!(
        path = %descriptors.path,
        services = catalog.services().len(),
        "Service descriptors loaded"
    );

    let backend = &config.backend;
    let options = ConnectOptions {
        connect_timeout: Duration::from_secs(backend.connect_timeout_secs),
        keepalive: (backend.keepalive_secs > 0).then(|| Duration::from_secs(backend.keepalive_secs)),
    };
    let connection = ConnectionManager::connect(&backend.endpoint, &options).await?;
    let closer = connection.close_on(shutdown.token());
    let upstream = Arc::new(GrpcUpstream::new(
        connection,
        backend.request_timeout_secs.map(Duration::from_secs),
    ));

    let address = &config.listener.bind_address;
    let listener = TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| StartupError::Bind {
        address: address.clone(),
        source,
    })?;

    let advertised = config.listener.advertised_address(local_addr);
    let server = assemble(config, catalog, upstream, shutdown, &advertised)?;

    Ok(Gateway {
        server,
        listener,
        local_addr,
        closer,
    })
}

/// Build the route table, the index page and the server state around an upstream.
pub fn assemble(
    config: &GatewayConfig,
    catalog: ServiceCatalog,
    upstream: Arc<dyn Upstream>,
    shutdown: &Shutdown,
    address: &str,
) -> Result<HttpServer, StartupError> {
    let routes = RouteTable::from_catalog(&catalog, &config.routes, &config.listener.mount_prefix)?;
    let index_html = index::render(&catalog, &routes, address);

    let state = AppState {
        routes: Arc::new(routes),
        upstream,
        marshaler: Marshaler::from_config(&config.marshaler),
        forwarding: Arc::new(MetadataForwarding::from_config(&config.metadata)),
        bridge: BridgeConfig::from_config(&config.websocket),
        shutdown: shutdown.clone(),
        index_html: index_html.into(),
        max_body_size: config.listener.max_body_size,
        request_timeout: Duration::from_secs(config.timeouts.request_secs),
    };

    Ok(HttpServer::new(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::rpc::fixtures;
    use prost::Message;
    use prost_types::FileDescriptorSet;

    fn descriptor_file(name: &str) -> String {
        let path = std::env::temp_dir().join(format!("{name}-{}.pb", uuid::Uuid::new_v4()));
        let set = FileDescriptorSet {
            file: vec![fixtures::file()],
        };
        std::fs::write(&path, set.encode_to_vec()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_missing_descriptor_set_is_fatal() {
        let mut config = GatewayConfig::default();
        config.descriptors.path = "/nonexistent/gateway.pb".to_string();
        let err = start(&config, &Shutdown::new()).await.err().unwrap();
        assert!(matches!(err, StartupError::Descriptor(DescriptorError::Io { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_fatal() {
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend = unused.local_addr().unwrap();
        drop(unused);

        let mut config = GatewayConfig::default();
        config.descriptors.path = descriptor_file("dial");
        config.backend.endpoint = format!("http://{backend}");
        config.backend.connect_timeout_secs = 2;

        let err = start(&config, &Shutdown::new()).await.err().unwrap();
        assert!(matches!(err, StartupError::Dial(_)));
    }

    #[test]
    fn test_bad_rule_is_fatal() {
        let mut config = GatewayConfig::default();
        config.routes.push(RouteConfig {
            method: "gallactic.v1.BlockChain/GetAccount".to_string(),
            verb: "GET".to_string(),
            path: "/accounts/{owner}".to_string(),
            body: None,
        });
        let catalog =
            ServiceCatalog::from_pool(fixtures::pool(), &[], &["Get".to_string()]).unwrap();

        struct Refusing;
        #[async_trait::async_trait]
        impl Upstream for Refusing {
            async fn unary(
                &self,
                _: &prost_reflect::MethodDescriptor,
                _: tonic::Request<prost_reflect::DynamicMessage>,
            ) -> Result<crate::rpc::client::UnaryReply, tonic::Status> {
                Err(tonic::Status::unavailable("refusing"))
            }
            async fn streaming(
                &self,
                _: &prost_reflect::MethodDescriptor,
                _: tonic::Request<crate::rpc::client::RequestStream>,
            ) -> Result<crate::rpc::client::StreamReply, tonic::Status> {
                Err(tonic::Status::unavailable("refusing"))
            }
        }

        let err = assemble(&config, catalog, Arc::new(Refusing), &Shutdown::new(), "gw")
            .err()
            .unwrap();
        assert!(matches!(err, StartupError::Routes(RouteError::Binding(_))));
    }
}
