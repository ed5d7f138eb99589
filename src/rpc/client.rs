//! Backend call seam.
//!
//! # Responsibilities
//! - Define [`Upstream`], the interface every handler uses to reach the backend
//! - Implement it over the shared tonic channel ([`GrpcUpstream`])
//! - Keep response headers and trailers apart so both can be forwarded
//!
//! # Design Decisions
//! - Every call goes through tonic's streaming entry point; unary calls read exactly one
//!   message and then the trailers
//! - Dropping a [`StreamReply`] cancels the underlying call

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::Stream;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use tonic::codegen::http::uri::PathAndQuery;
use tokio::sync::oneshot;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status, Streaming};

use crate::net::connection::ConnectionManager;
use crate::rpc::codec::DynamicCodec;

/// Messages sent to the backend on a streaming call.
pub type RequestStream = BoxStream<'static, DynamicMessage>;

/// Messages received from the backend on a streaming call.
pub type MessageStream = BoxStream<'static, Result<DynamicMessage, Status>>;

/// Metadata received with a completed call.
#[derive(Debug, Default, Clone)]
pub struct CallMetadata {
    pub headers: MetadataMap,
    pub trailers: MetadataMap,
}

/// Result of a unary call.
#[derive(Debug)]
pub struct UnaryReply {
    pub message: DynamicMessage,
    pub metadata: CallMetadata,
}

/// Result of opening a streaming call.
pub struct StreamReply {
    pub headers: MetadataMap,
    pub messages: MessageStream,
    /// Resolves with the trailers once `messages` has ended cleanly.
    pub trailers: oneshot::Receiver<MetadataMap>,
}

impl StreamReply {
    /// A reply whose trailers are always empty.
    pub fn new(headers: MetadataMap, messages: MessageStream) -> Self {
        let (_, trailers) = oneshot::channel();
        Self::with_trailers(headers, messages, trailers)
    }

    pub fn with_trailers(
        headers: MetadataMap,
        messages: MessageStream,
        trailers: oneshot::Receiver<MetadataMap>,
    ) -> Self {
        Self {
            headers,
            messages,
            trailers,
        }
    }
}

impl std::fmt::Debug for StreamReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReply")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// A backend able to serve calls described by method descriptors.
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// Send one request message, receive one response message.
    async fn unary(
        &self,
        method: &MethodDescriptor,
        request: Request<DynamicMessage>,
    ) -> Result<UnaryReply, Status>;

    /// Open a call with a stream of request messages.
    ///
    /// Used for server-streaming (a one-item request stream), client-streaming and
    /// bidirectional methods alike.
    async fn streaming(
        &self,
        method: &MethodDescriptor,
        request: Request<RequestStream>,
    ) -> Result<StreamReply, Status>;
}

/// [`Upstream`] over the shared gRPC channel.
#[derive(Debug, Clone)]
pub struct GrpcUpstream {
    connection: ConnectionManager,
    timeout: Option<Duration>,
}

impl GrpcUpstream {
    pub fn new(connection: ConnectionManager, timeout: Option<Duration>) -> Self {
        Self {
            connection,
            timeout,
        }
    }

    async fn call<S>(
        &self,
        method: &MethodDescriptor,
        mut request: Request<S>,
    ) -> Result<Response<Streaming<DynamicMessage>>, Status>
    where
        S: Stream<Item = DynamicMessage> + Send + 'static,
    {
        let channel = self
            .connection
            .channel()
            .ok_or_else(|| Status::unavailable("backend connection is closed"))?;

        if let Some(timeout) = self.timeout {
            request.set_timeout(timeout);
        }

        let path = PathAndQuery::try_from(format!(
            "/{}/{}",
            method.parent_service().full_name(),
            method.name()
        ))
        .map_err(|e| Status::internal(format!("invalid method path: {e}")))?;

        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("backend not ready: {e}")))?;

        tracing::trace!(
            endpoint = %self.connection.endpoint(),
            method = %method.full_name(),
            "Calling backend"
        );
        grpc.streaming(request, path, DynamicCodec::new(method.output()))
            .await
    }
}

#[async_trait]
impl Upstream for GrpcUpstream {
    async fn unary(
        &self,
        method: &MethodDescriptor,
        request: Request<DynamicMessage>,
    ) -> Result<UnaryReply, Status> {
        let request = request.map(tokio_stream::once);
        let (headers, mut messages, _) = self.call(method, request).await?.into_parts();

        let message = messages.message().await?.ok_or_else(|| {
            Status::internal(format!("{} returned no response message", method.full_name()))
        })?;
        let trailers = messages.trailers().await?.unwrap_or_default();

        Ok(UnaryReply {
            message,
            metadata: CallMetadata { headers, trailers },
        })
    }

    async fn streaming(
        &self,
        method: &MethodDescriptor,
        request: Request<RequestStream>,
    ) -> Result<StreamReply, Status> {
        let (headers, messages, _) = self.call(method, request).await?.into_parts();
        let (trailers_tx, trailers) = oneshot::channel();

        let messages = futures_util::stream::unfold(
            Some((messages, trailers_tx)),
            |state| async move {
                let (mut messages, trailers_tx) = state?;
                match messages.message().await {
                    Ok(Some(message)) => Some((Ok(message), Some((messages, trailers_tx)))),
                    Ok(None) => match messages.trailers().await {
                        Ok(trailers) => {
                            let _ = trailers_tx.send(trailers.unwrap_or_default());
                            None
                        }
                        Err(status) => Some((Err(status), None)),
                    },
                    Err(status) => Some((Err(status), None)),
                }
            },
        );

        Ok(StreamReply::with_trailers(
            headers,
            Box::pin(messages),
            trailers,
        ))
    }
}
