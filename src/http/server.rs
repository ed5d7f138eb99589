//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the gateway handler
//! - Wire up middleware (request ID, tracing, CORS)
//! - Dispatch requests through the route table
//! - Call the backend within the request deadline and forward the reply
//! - Hand WebSocket upgrades to the bridge
//! - Observability (metrics, correlation IDs)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Method, Request},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tonic::metadata::MetadataMap;
use tonic::Status;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::http::error::GatewayError;
use crate::http::metadata::MetadataForwarding;
use crate::http::middleware::allow_cors;
use crate::http::request;
use crate::http::response::{self, Marshaler};
use crate::http::websocket::{self, BridgeConfig};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::routing::{Captures, Handler, RouteTable};
use crate::rpc::client::{RequestStream, Upstream};
use crate::rpc::descriptor::{MethodBinding, StreamingMode};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable<Handler>>,
    pub upstream: Arc<dyn Upstream>,
    pub marshaler: Marshaler,
    pub forwarding: Arc<MetadataForwarding>,
    pub bridge: BridgeConfig,
    pub shutdown: Shutdown,
    pub index_html: Arc<str>,
    pub max_body_size: usize,
    /// Deadline for producing a response; streamed bodies are not limited by it.
    pub request_timeout: Duration,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    shutdown: Shutdown,
}

impl HttpServer {
    /// Create a new HTTP server around prepared state.
    pub fn new(state: AppState) -> Self {
        let shutdown = state.shutdown.clone();
        let router = Self::build_router(state);
        Self { router, shutdown }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/", any(gateway_handler))
            .route("/{*path}", any(gateway_handler))
            .with_state(state)
            .layer(middleware::from_fn(allow_cors))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The router, for serving it some other way (or driving it in tests).
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Run the server, accepting connections on the given listener until shutdown.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let shutdown = self.shutdown;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main gateway handler.
/// Looks up the route, builds the request message, calls the backend and forwards the reply.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let verb = request.method().clone();
    let path = request.uri().path().to_string();

    if is_upgrade(&request) {
        tracing::debug!(request_id = %request_id, path = %path, "WebSocket upgrade");
        return websocket::upgrade(state, request, peer).await;
    }

    tracing::debug!(request_id = %request_id, method = %verb, path = %path, "Gateway request");

    let matched = match state.routes.dispatch(&verb, &path) {
        Ok(matched) => matched,
        Err(not_found) => {
            tracing::debug!(request_id = %request_id, path = %path, "No route matched");
            let response = GatewayError::from(not_found).into_response();
            metrics::record_request(verb.as_str(), "none", response.status().as_u16(), start);
            return response;
        }
    };

    let result = match &matched.entry.handler {
        Handler::Index => Ok(Html(state.index_html.to_string()).into_response()),
        Handler::Rpc(binding) => {
            let deadline = state.request_timeout;
            tokio::time::timeout(deadline, call(&state, binding, &matched.captures, request, peer))
                .await
                .unwrap_or_else(|_| {
                    tracing::warn!(request_id = %request_id, path = %path, "Request deadline exceeded");
                    Err(GatewayError::Upstream(Status::deadline_exceeded(format!(
                        "request did not complete within {}s",
                        deadline.as_secs_f64()
                    ))))
                })
        }
    };
    let response = result.unwrap_or_else(IntoResponse::into_response);

    metrics::record_request(
        verb.as_str(),
        &matched.entry.method_name,
        response.status().as_u16(),
        start,
    );
    response
}

fn is_upgrade(request: &Request<Body>) -> bool {
    request.method() == Method::GET
        && request
            .headers()
            .get(header::UPGRADE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn with_metadata<T>(message: T, metadata: MetadataMap) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    *request.metadata_mut() = metadata;
    request
}

/// Translate, call and forward, according to the method's streaming mode.
async fn call(
    state: &AppState,
    binding: &MethodBinding,
    captures: &Captures,
    request: Request<Body>,
    peer: Option<SocketAddr>,
) -> Result<Response, GatewayError> {
    let metadata = state.forwarding.outgoing(request.headers(), peer);
    let query = request.uri().query().map(str::to_string);
    let query = query.as_deref();
    let body = axum::body::to_bytes(request.into_body(), state.max_body_size)
        .await
        .map_err(|e| GatewayError::Body(e.to_string()))?;

    match binding.mode {
        StreamingMode::Unary => {
            let message = request::translate(binding, captures, query, &body)?;
            let reply = state
                .upstream
                .unary(&binding.method, with_metadata(message, metadata))
                .await?;
            response::forward_unary(&state.marshaler, reply)
        }
        StreamingMode::ServerStreaming => {
            let message = request::translate(binding, captures, query, &body)?;
            let messages: RequestStream = Box::pin(tokio_stream::once(message));
            let reply = state
                .upstream
                .streaming(&binding.method, with_metadata(messages, metadata))
                .await?;
            Ok(response::forward_stream(
                &state.marshaler,
                reply,
                state.shutdown.token(),
            ))
        }
        StreamingMode::ClientStreaming | StreamingMode::Bidirectional => {
            let template = request::template(binding, captures, query)?;
            let messages = request::decode_stream_body(&template, &body)?;
            let messages: RequestStream = Box::pin(futures_util::stream::iter(messages));
            let reply = state
                .upstream
                .streaming(&binding.method, with_metadata(messages, metadata))
                .await?;
            if binding.mode == StreamingMode::ClientStreaming {
                response::forward_unary(&state.marshaler, response::collect_single(reply).await?)
            } else {
                Ok(response::forward_stream(
                    &state.marshaler,
                    reply,
                    state.shutdown.token(),
                ))
            }
        }
    }
}
