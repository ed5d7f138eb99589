//! Backend connection lifecycle.
//!
//! # Responsibilities
//! - Dial the gRPC backend once, at startup
//! - Hand the multiplexed channel to every call without locking
//! - Release the channel exactly once when the gateway shuts down
//!
//! # Design Decisions
//! - A dial failure is fatal: the gateway never serves without a backend
//! - The channel lives in an `ArcSwapOption`; readers clone it, `close` swaps it out
//! - Close problems are logged, never escalated

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};

/// The backend could not be reached at startup.
#[derive(Debug, Error)]
pub enum DialFailure {
    #[error("invalid backend endpoint {endpoint:?}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("failed to connect to backend {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },
}

/// Dial options.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    pub keepalive: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            keepalive: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug)]
struct Inner {
    endpoint: String,
    channel: ArcSwapOption<Channel>,
}

/// Shared handle to the single backend connection.
///
/// Cloning the manager is cheap; all clones observe the same channel and the same close.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Dial the backend and wait for the connection to be established.
    pub async fn connect(endpoint: &str, options: &ConnectOptions) -> Result<Self, DialFailure> {
        let target = Endpoint::from_shared(endpoint.to_string()).map_err(|source| {
            DialFailure::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                source,
            }
        })?;

        let target = target
            .connect_timeout(options.connect_timeout)
            .tcp_keepalive(options.keepalive);

        let channel = target.connect().await.map_err(|source| DialFailure::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;

        tracing::info!(endpoint = %endpoint, "Connected to backend");
        Ok(Self::from_channel(endpoint, channel))
    }

    /// Wrap an existing channel.
    pub fn from_channel(endpoint: &str, channel: Channel) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.to_string(),
                channel: ArcSwapOption::from_pointee(channel),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// A handle to the channel, or `None` once closed.
    pub fn channel(&self) -> Option<Channel> {
        self.inner.channel.load_full().map(|c| Channel::clone(&c))
    }

    pub fn is_open(&self) -> bool {
        self.inner.channel.load().is_some()
    }

    /// Release the channel. Returns `false` if it was already closed.
    ///
    /// In-flight calls keep their own channel clone and finish normally.
    pub fn close(&self) -> bool {
        match self.inner.channel.swap(None) {
            Some(_) => {
                tracing::info!(endpoint = %self.inner.endpoint, "Backend connection closed");
                true
            }
            None => {
                tracing::warn!(endpoint = %self.inner.endpoint, "Backend connection already closed");
                false
            }
        }
    }

    /// Close the connection once `token` is cancelled.
    pub fn close_on(&self, token: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            manager.close();
        })
    }
}
