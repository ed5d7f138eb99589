//! WebSocket ↔ streaming RPC bridge.
//!
//! # Responsibilities
//! - Accept upgrades on any route backed by a streaming method
//! - Relay inbound data frames as request messages and reply messages as frames
//! - Close both sides within a bounded grace period once either side ends
//!
//! # Data Flow
//! ```text
//! Client ── frames ──→ inbound pump ── mpsc ──→ RPC call
//! Client ←─ frames ─── outbound pump ←──────── RPC call
//! ```
//!
//! # Design Decisions
//! - Two tasks per session, coordinated by one cancellation token
//! - A client Close half-closes the call: queued frames still reach the backend, and
//!   replies are read (and discarded) until the backend finishes or the grace period ends
//! - Faults, backend completion, grace expiry and shutdown cancel the token, dropping the call
//! - The session, not the pumps, sends the Close frame, so its code reflects both ends
//! - Ping/pong is answered by the WebSocket layer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        FromRequestParts,
    },
    http::Request,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use prost_reflect::DynamicMessage;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{metadata::MetadataMap, Status};
use uuid::Uuid;

use crate::config::schema::WebSocketConfig;
use crate::http::error::GatewayError;
use crate::http::request::{self, DecodeFailure};
use crate::http::response::Marshaler;
use crate::http::server::AppState;
use crate::observability::metrics::{self, Direction};
use crate::routing::{Handler, NotFound};
use crate::rpc::client::{RequestStream, Upstream};
use crate::rpc::descriptor::{MethodBinding, StreamingMode};

/// Bridge settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub grace_period: Duration,
    pub channel_capacity: usize,
    pub max_message_size: usize,
}

impl BridgeConfig {
    pub fn from_config(config: &WebSocketConfig) -> Self {
        Self {
            grace_period: Duration::from_millis(config.grace_period_ms),
            channel_capacity: config.channel_capacity.max(1),
            max_message_size: config.max_message_size,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from_config(&WebSocketConfig::default())
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Connecting,
    Active,
    Draining,
    Closed,
}

/// Why a session ended abnormally.
#[derive(Debug, Error)]
pub enum BridgeFault {
    #[error(transparent)]
    Decode(#[from] DecodeFailure),
    #[error("backend error: {}", .0.message())]
    Upstream(Status),
    #[error("websocket error: {0}")]
    Socket(axum::Error),
    #[error("failed to encode message: {0}")]
    Encode(String),
}

impl BridgeFault {
    /// Close code sent to the client.
    pub fn close_code(&self) -> u16 {
        match self {
            BridgeFault::Decode(_) => close_code::INVALID,
            BridgeFault::Upstream(_) | BridgeFault::Socket(_) | BridgeFault::Encode(_) => {
                close_code::ERROR
            }
        }
    }
}

/// Kind of data frame the client last sent; replies use the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Text,
    Binary,
}

/// What the outbound pump sees of the client side.
struct ClientSide {
    /// Kind of the most recent inbound data frame.
    kind: watch::Receiver<FrameKind>,
    /// Cancelled once the client has closed its side.
    closed: CancellationToken,
}

/// How a pump stopped.
#[derive(Debug)]
enum PumpEnd {
    /// Client closed, or the call completed.
    Finished,
    /// The other pump or the process ended the session.
    Cancelled,
    Fault(BridgeFault),
}

/// Handle a WebSocket upgrade request.
pub async fn upgrade(state: AppState, request: Request<Body>, peer: Option<SocketAddr>) -> Response {
    let path = request.uri().path().to_string();
    let Some(matched) = state.routes.dispatch_upgrade(&path) else {
        return GatewayError::from(NotFound {
            verb: request.method().clone(),
            path,
        })
        .into_response();
    };
    let Handler::Rpc(binding) = &matched.entry.handler else {
        return GatewayError::from(NotFound {
            verb: request.method().clone(),
            path,
        })
        .into_response();
    };

    let template = match request::template(binding, &matched.captures, request.uri().query()) {
        Ok(template) => template,
        Err(e) => return GatewayError::from(e).into_response(),
    };
    let metadata = state.forwarding.outgoing(request.headers(), peer);

    let (mut parts, _body) = request.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let session = BridgeSession {
        id: Uuid::new_v4(),
        binding: Arc::clone(binding),
        template,
        metadata,
        upstream: Arc::clone(&state.upstream),
        marshaler: state.marshaler.clone(),
        config: state.bridge.clone(),
        cancel: state.shutdown.child(),
        state: BridgeState::Connecting,
    };

    ws.max_message_size(state.bridge.max_message_size)
        .on_upgrade(move |socket| session.run(socket))
}

/// One WebSocket bound to one streaming call.
pub struct BridgeSession {
    id: Uuid,
    binding: Arc<MethodBinding>,
    template: DynamicMessage,
    metadata: MetadataMap,
    upstream: Arc<dyn Upstream>,
    marshaler: Marshaler,
    config: BridgeConfig,
    cancel: CancellationToken,
    state: BridgeState,
}

impl BridgeSession {
    fn transition(&mut self, next: BridgeState) {
        tracing::debug!(session = %self.id, from = ?self.state, to = ?next, "Bridge state change");
        self.state = next;
    }

    /// Run the session to completion.
    pub async fn run(mut self, socket: WebSocket) {
        let method = self.binding.full_name().to_string();
        tracing::info!(session = %self.id, method = %method, "Bridge opened");
        metrics::bridge_opened(&method);

        let (sink, stream) = socket.split();
        let (kind_tx, kind_rx) = watch::channel(FrameKind::Text);
        let client_closed = CancellationToken::new();

        let (requests, sender) = match self.binding.mode {
            StreamingMode::ServerStreaming => {
                let once: RequestStream = Box::pin(tokio_stream::once(self.template.clone()));
                (once, None)
            }
            _ => {
                let (tx, rx) = mpsc::channel(self.config.channel_capacity);
                let received: RequestStream = Box::pin(ReceiverStream::new(rx));
                (received, Some(tx))
            }
        };
        let mut call = tonic::Request::new(requests);
        *call.metadata_mut() = std::mem::take(&mut self.metadata);

        let mut inbound = tokio::spawn(inbound_pump(
            stream,
            sender,
            self.template.clone(),
            kind_tx,
            method.clone(),
            client_closed.clone(),
            self.cancel.clone(),
        ));
        let mut outbound = tokio::spawn(outbound_pump(
            sink,
            Arc::clone(&self.upstream),
            Arc::clone(&self.binding),
            call,
            self.marshaler.clone(),
            ClientSide {
                kind: kind_rx,
                closed: client_closed,
            },
            self.cancel.clone(),
        ));
        self.transition(BridgeState::Active);

        let inbound_done = tokio::select! {
            joined = &mut inbound => Some(joined),
            _ = self.cancel.cancelled() => None,
        };
        self.transition(BridgeState::Draining);

        let grace = self.config.grace_period;
        let inbound_end = match inbound_done {
            Some(joined) => joined_end(joined, self.id, "inbound"),
            None => settle(&mut inbound, grace, &self.cancel, self.id, "inbound").await,
        };
        let outbound_end = settle(&mut outbound, grace, &self.cancel, self.id, "outbound").await;

        if let Some((mut sink, outbound_end)) = outbound_end {
            let (code, reason) = close_reason(&outbound_end, inbound_end.as_ref());
            let frame = CloseFrame {
                code,
                reason: reason.into(),
            };
            let closing = async {
                sink.send(Message::Close(Some(frame))).await?;
                sink.close().await
            };
            match tokio::time::timeout(grace, closing).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(session = %self.id, error = %e, "Close frame not delivered"),
                Err(_) => tracing::debug!(session = %self.id, "Close frame timed out"),
            }
        }

        self.transition(BridgeState::Closed);
        metrics::bridge_closed(&method);
        tracing::info!(session = %self.id, method = %method, "Bridge closed");
    }
}

/// How long a cancelled pump may take to return before it is aborted.
const CANCEL_WAIT: Duration = Duration::from_millis(250);

/// Wait up to `grace` for a pump to end on its own, then cancel the session and, failing
/// that, abort the pump.
async fn settle<T>(
    pump: &mut JoinHandle<T>,
    grace: Duration,
    cancel: &CancellationToken,
    session: Uuid,
    name: &str,
) -> Option<T> {
    if let Ok(joined) = tokio::time::timeout(grace, &mut *pump).await {
        return joined_end(joined, session, name);
    }
    tracing::debug!(session = %session, pump = name, "Grace period over; cancelling the call");
    cancel.cancel();

    match tokio::time::timeout(CANCEL_WAIT, &mut *pump).await {
        Ok(joined) => joined_end(joined, session, name),
        Err(_) => {
            tracing::warn!(session = %session, pump = name, "Pump ignored cancellation; aborting");
            pump.abort();
            None
        }
    }
}

fn joined_end<T>(joined: Result<T, JoinError>, session: Uuid, name: &str) -> Option<T> {
    joined
        .inspect_err(|e| tracing::warn!(session = %session, pump = name, error = %e, "Pump failed"))
        .ok()
}

/// Close code and reason, preferring the outbound fault, then the inbound one.
fn close_reason(outbound: &PumpEnd, inbound: Option<&PumpEnd>) -> (u16, String) {
    match (outbound, inbound) {
        (PumpEnd::Fault(fault), _) | (_, Some(PumpEnd::Fault(fault))) => {
            let mut reason = fault.to_string();
            // Close reasons are limited to 123 bytes.
            if reason.len() > 123 {
                let mut end = 123;
                while !reason.is_char_boundary(end) {
                    end -= 1;
                }
                reason.truncate(end);
            }
            (fault.close_code(), reason)
        }
        _ => (close_code::NORMAL, String::new()),
    }
}

/// WebSocket → call.
///
/// A client Close (or EOF) drops the sender, half-closing the call, and marks
/// `client_closed`. Faults cancel the session.
async fn inbound_pump(
    mut stream: SplitStream<WebSocket>,
    sender: Option<mpsc::Sender<DynamicMessage>>,
    template: DynamicMessage,
    kind: watch::Sender<FrameKind>,
    method: String,
    client_closed: CancellationToken,
    cancel: CancellationToken,
) -> PumpEnd {
    let end = relay_inbound(&mut stream, sender.as_ref(), &template, &kind, &method, &cancel).await;
    match &end {
        PumpEnd::Finished => {
            client_closed.cancel();
            // Nothing queued for a server-streaming call, so its replies are not awaited.
            if sender.is_none() {
                cancel.cancel();
            }
        }
        PumpEnd::Fault(_) => cancel.cancel(),
        PumpEnd::Cancelled => {}
    }
    end
}

async fn relay_inbound(
    stream: &mut SplitStream<WebSocket>,
    sender: Option<&mpsc::Sender<DynamicMessage>>,
    template: &DynamicMessage,
    kind: &watch::Sender<FrameKind>,
    method: &str,
    cancel: &CancellationToken,
) -> PumpEnd {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return PumpEnd::Cancelled,
            frame = stream.next() => frame,
        };

        let payload: Bytes = match frame {
            None | Some(Ok(Message::Close(_))) => return PumpEnd::Finished,
            Some(Err(e)) => return PumpEnd::Fault(BridgeFault::Socket(e)),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Text(text))) => {
                kind.send_replace(FrameKind::Text);
                Bytes::copy_from_slice(text.as_str().as_bytes())
            }
            Some(Ok(Message::Binary(data))) => {
                kind.send_replace(FrameKind::Binary);
                data
            }
        };

        let Some(sender) = sender else {
            tracing::trace!(method = %method, "Ignoring data frame on server-streaming bridge");
            continue;
        };

        let message = match request::merge_json(template, &payload) {
            Ok(message) => message,
            Err(e) => return PumpEnd::Fault(e.into()),
        };
        metrics::record_frame(method, Direction::Inbound);

        tokio::select! {
            _ = cancel.cancelled() => return PumpEnd::Cancelled,
            sent = sender.send(message) => {
                if sent.is_err() {
                    return PumpEnd::Cancelled;
                }
            }
        }
    }
}

/// Call → WebSocket. Gives the sink back so the session can send the Close frame.
///
/// Ending for any reason cancels the session. Once the client has closed, replies are
/// still read so the backend can finish, but no longer sent.
async fn outbound_pump(
    mut sink: SplitSink<WebSocket, Message>,
    upstream: Arc<dyn Upstream>,
    binding: Arc<MethodBinding>,
    call: tonic::Request<RequestStream>,
    marshaler: Marshaler,
    client: ClientSide,
    cancel: CancellationToken,
) -> (SplitSink<WebSocket, Message>, PumpEnd) {
    let _guard = cancel.clone().drop_guard();
    let method = binding.full_name().to_string();

    let opened = tokio::select! {
        biased;
        opened = upstream.streaming(&binding.method, call) => opened,
        _ = cancel.cancelled() => return (sink, PumpEnd::Cancelled),
    };
    let mut messages = match opened {
        Ok(reply) => reply.messages,
        Err(status) => return (sink, PumpEnd::Fault(BridgeFault::Upstream(status))),
    };

    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (sink, PumpEnd::Cancelled),
            item = messages.next() => item,
        };

        let message = match item {
            None => return (sink, PumpEnd::Finished),
            Some(Err(status)) => return (sink, PumpEnd::Fault(BridgeFault::Upstream(status))),
            Some(Ok(message)) => message,
        };

        if client.closed.is_cancelled() {
            tracing::trace!(method = %method, "Client closed; discarding reply");
            continue;
        }

        let json = match marshaler.to_json(&message) {
            Ok(json) => json,
            Err(e) => return (sink, PumpEnd::Fault(BridgeFault::Encode(e.to_string()))),
        };
        let current = *client.kind.borrow();
        let frame = match current {
            FrameKind::Text => match String::from_utf8(json) {
                Ok(text) => Message::Text(text.into()),
                Err(e) => Message::Binary(Bytes::from(e.into_bytes())),
            },
            FrameKind::Binary => Message::Binary(Bytes::from(json)),
        };

        tokio::select! {
            _ = cancel.cancelled() => return (sink, PumpEnd::Cancelled),
            sent = sink.send(frame) => match sent {
                Ok(()) => metrics::record_frame(&method, Direction::Outbound),
                // The Close raced this frame; keep draining.
                Err(_) if client.closed.is_cancelled() => {}
                Err(e) => return (sink, PumpEnd::Fault(BridgeFault::Socket(e))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_codes() {
        let decode = BridgeFault::Decode(DecodeFailure {
            field: "body".to_string(),
            reason: "expected value".to_string(),
        });
        assert_eq!(decode.close_code(), 1007);
        assert_eq!(BridgeFault::Upstream(Status::internal("boom")).close_code(), 1011);
    }

    #[test]
    fn test_close_reason_prefers_outbound_fault() {
        let outbound = PumpEnd::Fault(BridgeFault::Upstream(Status::internal("boom")));
        let inbound = PumpEnd::Fault(BridgeFault::Decode(DecodeFailure {
            field: "body".to_string(),
            reason: "bad".to_string(),
        }));
        assert_eq!(close_reason(&outbound, Some(&inbound)).0, 1011);
        assert_eq!(close_reason(&PumpEnd::Cancelled, Some(&inbound)).0, 1007);
        assert_eq!(
            close_reason(&PumpEnd::Finished, Some(&PumpEnd::Cancelled)),
            (1000, String::new())
        );
    }

    #[test]
    fn test_close_reason_is_truncated() {
        let long = PumpEnd::Fault(BridgeFault::Upstream(Status::internal("é".repeat(100))));
        let (_, reason) = close_reason(&long, None);
        assert!(reason.len() <= 123);
    }

    #[tokio::test]
    async fn test_settle_cancels_after_grace_then_aborts() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let mut pump = tokio::spawn(async move {
            token.cancelled().await;
            "cancelled"
        });
        let grace = Duration::from_millis(20);
        let end = settle(&mut pump, grace, &cancel, Uuid::new_v4(), "test").await;
        assert_eq!(end, Some("cancelled"));
        assert!(cancel.is_cancelled());

        let mut stuck = tokio::spawn(futures_util::future::pending::<()>());
        assert!(settle(&mut stuck, grace, &cancel, Uuid::new_v4(), "test")
            .await
            .is_none());
        assert!(stuck.await.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_bridge_config_from_settings() {
        let config = BridgeConfig::from_config(&WebSocketConfig {
            grace_period_ms: 250,
            max_message_size: 1024,
            channel_capacity: 0,
        });
        assert_eq!(config.grace_period, Duration::from_millis(250));
        assert_eq!(config.channel_capacity, 1);
    }
}
