//! Shared harness: an in-process gateway in front of a scripted backend.

#![allow(dead_code)]

#[path = "../../src/rpc/fixtures.rs"]
pub mod fixtures;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use prost_reflect::{DynamicMessage, MethodDescriptor, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataMap;
use tonic::{Request, Status};

use rpc_gateway::config::GatewayConfig;
use rpc_gateway::lifecycle::{assemble, Shutdown};
use rpc_gateway::rpc::client::{CallMetadata, RequestStream, StreamReply, UnaryReply, Upstream};
use rpc_gateway::rpc::ServiceCatalog;

fn message(name: &str) -> DynamicMessage {
    let descriptor = fixtures::pool()
        .get_message_by_name(&format!("gallactic.v1.{name}"))
        .unwrap();
    DynamicMessage::new(descriptor)
}

fn string_field(message: &DynamicMessage, name: &str) -> String {
    message
        .get_field_by_name(name)
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Backend double for the `gallactic.v1` fixture services.
#[derive(Default)]
pub struct MockUpstream {
    /// Metadata of the most recent call.
    pub last_metadata: Mutex<Option<MetadataMap>>,
    /// Chat messages received, in order.
    pub chat_log: Arc<Mutex<Vec<String>>>,
    /// Notified when a chat call ends, whichever side ended it.
    pub chat_ended: Arc<Notify>,
    /// Notified when an endless subscription's reply stream is dropped by the gateway.
    pub subscription_dropped: Arc<Notify>,
}

fn event(kind: &str, height: u64) -> DynamicMessage {
    let mut event = message("Event");
    event.set_field_by_name("kind", Value::String(kind.to_string()));
    event.set_field_by_name("height", Value::U64(height));
    event
}

impl MockUpstream {
    /// One event every 20ms until the reply stream is dropped.
    fn endless(&self, kind: String) -> StreamReply {
        let (tx, rx) = mpsc::channel::<Result<DynamicMessage, Status>>(1);
        let dropped = Arc::clone(&self.subscription_dropped);
        tokio::spawn(async move {
            for height in 1.. {
                if tx.send(Ok(event(&kind, height))).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            dropped.notify_one();
        });
        StreamReply::new(MetadataMap::new(), Box::pin(ReceiverStream::new(rx)))
    }

    fn remember(&self, metadata: &MetadataMap) {
        *self.last_metadata.lock().unwrap() = Some(metadata.clone());
    }

    pub fn last_metadata(&self) -> MetadataMap {
        self.last_metadata.lock().unwrap().clone().unwrap_or_default()
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn unary(
        &self,
        method: &MethodDescriptor,
        request: Request<DynamicMessage>,
    ) -> Result<UnaryReply, Status> {
        self.remember(request.metadata());
        let input = request.into_inner();

        match method.name() {
            "GetAccount" => {
                let address = string_field(&input, "address");
                match address.as_str() {
                    "missing" => return Err(Status::not_found("account not found")),
                    "bad" => return Err(Status::invalid_argument("malformed address")),
                    "slow" => tokio::time::sleep(Duration::from_secs(30)).await,
                    _ => {}
                }
                let mut account = message("Account");
                account.set_field_by_name("address", Value::String(address));
                account.set_field_by_name("balance", Value::U64(42));

                let mut headers = MetadataMap::new();
                headers.insert("x-node", "node-1".parse().unwrap());
                let mut trailers = MetadataMap::new();
                trailers.insert("x-cost", "3".parse().unwrap());
                Ok(UnaryReply {
                    message: account,
                    metadata: CallMetadata { headers, trailers },
                })
            }
            "GetNetworkInfo" => {
                let mut info = message("NetInfo");
                info.set_field_by_name("listening", Value::Bool(true));
                Ok(UnaryReply {
                    message: info,
                    metadata: CallMetadata::default(),
                })
            }
            "Search" => {
                let mut block = message("Block");
                block.set_field_by_name("hash", Value::String(string_field(&input, "name")));
                let height = input
                    .get_field_by_name("limit")
                    .and_then(|v| v.as_i32())
                    .unwrap_or_default();
                block.set_field_by_name("height", Value::U64(height as u64));
                Ok(UnaryReply {
                    message: block,
                    metadata: CallMetadata::default(),
                })
            }
            other => Err(Status::unimplemented(other.to_string())),
        }
    }

    async fn streaming(
        &self,
        method: &MethodDescriptor,
        request: Request<RequestStream>,
    ) -> Result<StreamReply, Status> {
        self.remember(request.metadata());
        let mut input = request.into_inner();

        match method.name() {
            "Subscribe" => {
                let first = input.next().await.unwrap_or_else(|| message("SubscribeRequest"));
                let kind = string_field(&first, "kind");
                if kind == "endless" {
                    return Ok(self.endless(kind));
                }
                let events = (1..=3u64)
                    .map(|height| Ok::<_, Status>(event(&kind, height)))
                    .collect::<Vec<_>>();
                Ok(StreamReply::new(
                    MetadataMap::new(),
                    Box::pin(futures_util::stream::iter(events)),
                ))
            }
            "Chat" => {
                let (tx, rx) = mpsc::channel::<Result<DynamicMessage, Status>>(16);
                let log = Arc::clone(&self.chat_log);
                let ended = Arc::clone(&self.chat_ended);
                tokio::spawn(async move {
                    // Echo until the client half-closes or the gateway drops the reply.
                    while let Some(chat) = input.next().await {
                        log.lock().unwrap().push(string_field(&chat, "text"));
                        if tx.send(Ok(chat)).await.is_err() {
                            break;
                        }
                    }
                    drop(tx);
                    ended.notify_one();
                });
                Ok(StreamReply::new(
                    MetadataMap::new(),
                    Box::pin(ReceiverStream::new(rx)),
                ))
            }
            other => Err(Status::unimplemented(other.to_string())),
        }
    }
}

/// A gateway serving on an ephemeral port.
pub struct TestGateway {
    pub address: SocketAddr,
    pub upstream: Arc<MockUpstream>,
    pub shutdown: Shutdown,
    server: JoinHandle<()>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.address, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = self.server.await;
    }
}

pub async fn spawn(config: GatewayConfig) -> TestGateway {
    let catalog = ServiceCatalog::from_pool(
        fixtures::pool(),
        &config.descriptors.services,
        &config.descriptors.query_prefixes,
    )
    .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let upstream = Arc::new(MockUpstream::default());
    let shutdown = Shutdown::new();
    let server = assemble(
        &config,
        catalog,
        upstream.clone(),
        &shutdown,
        &address.to_string(),
    )
    .unwrap();
    let server = tokio::spawn(async move {
        server.run(listener).await.unwrap();
    });

    TestGateway {
        address,
        upstream,
        shutdown,
        server,
    }
}

pub async fn spawn_default() -> TestGateway {
    spawn(GatewayConfig::default()).await
}
