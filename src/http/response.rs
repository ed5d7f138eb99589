//! RPC reply → HTTP response forwarding.
//!
//! # Responsibilities
//! - Serialize reply messages as JSON
//! - Copy header and trailer metadata into prefixed HTTP headers
//! - Stream server-streaming replies as newline-delimited JSON
//!
//! # Design Decisions
//! - JSON is the only marshaler, whatever the `Accept` header says
//! - Stream chunks are produced as the backend delivers them; no buffering
//! - Dropping the response body drops the call

use std::convert::Infallible;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use prost_reflect::{DynamicMessage, SerializeOptions};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tonic::Status;

use crate::config::schema::MarshalerConfig;
use crate::http::error::{error_body, GatewayError};
use crate::http::metadata::{write_metadata, HEADER_PREFIX, TRAILER_PREFIX};
use crate::rpc::client::{CallMetadata, MessageStream, StreamReply, UnaryReply};
use crate::rpc::status::http_status;

const APPLICATION_JSON: &str = "application/json";

/// Message ↔ JSON conversion settings.
#[derive(Debug, Clone, Default)]
pub struct Marshaler {
    emit_defaults: bool,
    use_proto_names: bool,
    stringify_64bit: bool,
}

impl Marshaler {
    pub fn from_config(config: &MarshalerConfig) -> Self {
        Self {
            emit_defaults: config.emit_defaults,
            use_proto_names: config.use_proto_names,
            stringify_64bit: config.stringify_64bit,
        }
    }

    fn options(&self) -> SerializeOptions {
        SerializeOptions::new()
            .skip_default_fields(!self.emit_defaults)
            .use_proto_field_name(self.use_proto_names)
            .stringify_64_bit_integers(self.stringify_64bit)
    }

    pub fn to_value(&self, message: &DynamicMessage) -> Result<Value, serde_json::Error> {
        message.serialize_with_options(serde_json::value::Serializer, &self.options())
    }

    pub fn to_json(&self, message: &DynamicMessage) -> Result<Vec<u8>, serde_json::Error> {
        let mut serializer = serde_json::Serializer::new(Vec::new());
        message.serialize_with_options(&mut serializer, &self.options())?;
        Ok(serializer.into_inner())
    }
}

fn json_response(status: StatusCode, body: impl Into<Body>) -> Response {
    let mut response = (status, body.into()).into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
    response
}

/// 200 response carrying one message and the call's metadata.
pub fn forward_unary(marshaler: &Marshaler, reply: UnaryReply) -> Result<Response, GatewayError> {
    let body = marshaler
        .to_json(&reply.message)
        .map_err(|e| GatewayError::Encode(e.to_string()))?;
    let mut response = json_response(StatusCode::OK, body);
    write_call_metadata(&reply.metadata, &mut response);
    Ok(response)
}

fn write_call_metadata(metadata: &CallMetadata, response: &mut Response) {
    write_metadata(&metadata.headers, HEADER_PREFIX, response.headers_mut());
    write_metadata(&metadata.trailers, TRAILER_PREFIX, response.headers_mut());
}

/// Reduce a client-streaming reply to its single response message.
///
/// The stream is read to its end so the call's trailers are forwarded too.
pub async fn collect_single(reply: StreamReply) -> Result<UnaryReply, Status> {
    let StreamReply {
        headers,
        mut messages,
        trailers,
    } = reply;
    let message = messages
        .next()
        .await
        .ok_or_else(|| Status::internal("backend closed the stream without a response"))??;
    while let Some(extra) = messages.next().await {
        extra?;
        tracing::debug!("Ignoring extra message on a client-streaming reply");
    }
    drop(messages);

    Ok(UnaryReply {
        message,
        metadata: CallMetadata {
            headers,
            trailers: trailers.await.unwrap_or_default(),
        },
    })
}

/// Newline-delimited JSON response: one `{"result": ...}` chunk per message.
///
/// A backend error ends the body with one `{"error": ...}` chunk. The body also ends,
/// dropping the call, once `shutdown` is cancelled.
pub fn forward_stream(
    marshaler: &Marshaler,
    reply: StreamReply,
    shutdown: CancellationToken,
) -> Response {
    let StreamReply { headers, messages, .. } = reply;
    let marshaler = marshaler.clone();

    let chunks = futures_util::stream::unfold(Some(messages), move |state: Option<MessageStream>| {
        let marshaler = marshaler.clone();
        async move {
            let mut messages = state?;
            let (chunk, next) = match messages.next().await? {
                Ok(message) => match marshaler.to_value(&message) {
                    Ok(value) => (json!({ "result": value }), Some(messages)),
                    Err(e) => (
                        stream_error(&Status::internal(format!("failed to encode message: {e}"))),
                        None,
                    ),
                },
                Err(status) => {
                    tracing::debug!(code = ?status.code(), message = %status.message(), "Stream ended with an error");
                    (stream_error(&status), None)
                }
            };
            let mut line = chunk.to_string().into_bytes();
            line.push(b'\n');
            Some((Ok::<_, Infallible>(Bytes::from(line)), next))
        }
    });

    let chunks = chunks.take_until(shutdown.cancelled_owned());
    let mut response = json_response(StatusCode::OK, Body::from_stream(chunks));
    write_metadata(&headers, HEADER_PREFIX, response.headers_mut());
    response
}

fn stream_error(status: &Status) -> Value {
    json!({ "error": error_body(status.code(), status.message(), http_status(status.code())) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::fixtures;
    use prost_reflect::Value as ProtoValue;
    use tonic::metadata::MetadataMap;

    fn account(address: &str, balance: u64) -> DynamicMessage {
        let descriptor = fixtures::pool()
            .get_message_by_name("gallactic.v1.Account")
            .unwrap();
        let mut message = DynamicMessage::new(descriptor);
        message.set_field_by_name("address", ProtoValue::String(address.to_string()));
        message.set_field_by_name("balance", ProtoValue::U64(balance));
        message
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_marshaler_options() {
        let message = account("abc", 42);
        let plain = Marshaler::default().to_value(&message).unwrap();
        assert_eq!(plain, json!({"address": "abc", "balance": 42}));

        let full = Marshaler::from_config(&MarshalerConfig {
            emit_defaults: true,
            use_proto_names: true,
            stringify_64bit: true,
        })
        .to_value(&message)
        .unwrap();
        assert_eq!(full["balance"], "42");
        assert_eq!(full["sequence"], "0");
        assert_eq!(full["permissions"], json!([]));
    }

    #[tokio::test]
    async fn test_unary_metadata_headers() {
        let mut headers = MetadataMap::new();
        headers.insert("x-node", "n1".parse().unwrap());
        let mut trailers = MetadataMap::new();
        trailers.insert("x-cost", "3".parse().unwrap());

        let response = forward_unary(
            &Marshaler::default(),
            UnaryReply {
                message: account("abc", 1),
                metadata: CallMetadata { headers, trailers },
            },
        )
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["grpc-metadata-x-node"], "n1");
        assert_eq!(response.headers()["grpc-trailer-x-cost"], "3");
        assert_eq!(body_text(response).await, r#"{"address":"abc","balance":1}"#);
    }

    #[tokio::test]
    async fn test_stream_chunks_end_with_error() {
        let items = vec![
            Ok(account("a", 1)),
            Ok(account("b", 2)),
            Err(Status::unavailable("backend went away")),
            Ok(account("c", 3)),
        ];
        let reply = StreamReply::new(
            MetadataMap::new(),
            Box::pin(futures_util::stream::iter(items)),
        );

        let response = forward_stream(&Marshaler::default(), reply, CancellationToken::new());
        let text = body_text(response).await;
        let lines: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["result"]["address"], "a");
        assert_eq!(lines[1]["result"]["address"], "b");
        assert_eq!(lines[2]["error"]["code"], 14);
        assert_eq!(lines[2]["error"]["http_code"], 503);
    }

    #[tokio::test]
    async fn test_stream_stops_on_shutdown() {
        let reply = StreamReply::new(
            MetadataMap::new(),
            Box::pin(
                futures_util::stream::iter(vec![Ok::<_, Status>(account("a", 1))])
                    .chain(futures_util::stream::pending()),
            ),
        );
        let shutdown = CancellationToken::new();
        let response = forward_stream(&Marshaler::default(), reply, shutdown.clone());

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        assert!(first.starts_with(b"{\"result\""));

        shutdown.cancel();
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_collect_single() {
        let reply = StreamReply::new(
            MetadataMap::new(),
            Box::pin(futures_util::stream::iter(vec![Ok::<_, Status>(account("a", 1))])),
        );
        let unary = collect_single(reply).await.unwrap();
        assert_eq!(
            *unary.message.get_field_by_name("address").unwrap(),
            ProtoValue::String("a".into())
        );
        assert!(unary.metadata.trailers.is_empty());

        let empty = StreamReply::new(MetadataMap::new(), Box::pin(futures_util::stream::empty()));
        assert_eq!(collect_single(empty).await.unwrap_err().code(), tonic::Code::Internal);
    }

    #[tokio::test]
    async fn test_collect_single_forwards_trailers() {
        let (trailers_tx, trailers_rx) = tokio::sync::oneshot::channel();
        let mut trailers = MetadataMap::new();
        trailers.insert("x-cost", "7".parse().unwrap());

        // Trailers only arrive once the message stream has been read to its end.
        let mut pending = Some((trailers_tx, trailers));
        let messages = futures_util::stream::iter(vec![Ok::<_, Status>(account("a", 1))]).chain(
            futures_util::stream::poll_fn(move |_| {
                if let Some((tx, trailers)) = pending.take() {
                    let _ = tx.send(trailers);
                }
                std::task::Poll::Ready(None)
            }),
        );
        let reply = StreamReply::with_trailers(MetadataMap::new(), Box::pin(messages), trailers_rx);

        let unary = collect_single(reply).await.unwrap();
        assert_eq!(unary.metadata.trailers.get("x-cost").unwrap(), "7");

        let response = forward_unary(&Marshaler::default(), unary).unwrap();
        assert_eq!(response.headers()["grpc-trailer-x-cost"], "7");
    }
}
