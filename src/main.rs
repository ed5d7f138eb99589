//! rpc-gateway
//!
//! HTTP/JSON and WebSocket front door for a gRPC backend.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌───────────────────────────────────────────────────────┐
//!                    │                     RPC GATEWAY                        │
//!                    │                                                        │
//!   HTTP request     │  ┌─────────┐   ┌──────────┐   ┌──────────────┐         │
//!   ─────────────────┼─▶│  http   │──▶│ routing  │──▶│   request    │         │
//!                    │  │ server  │   │  table   │   │  translator  │         │
//!                    │  └────┬────┘   └──────────┘   └──────┬───────┘         │
//!                    │       │ upgrade                      ▼                  │
//!                    │  ┌────▼─────┐                 ┌──────────────┐         │
//!   WebSocket ◀──────┼─▶│  bridge  │◀───────────────▶│ rpc upstream │◀────────┼──▶ gRPC
//!                    │  └──────────┘                 │ + connection │         │    backend
//!   HTTP response    │  ┌──────────┐                 └──────┬───────┘         │
//!   ◀────────────────┼──│ response │◀──────────────────────┘                  │
//!                    │  │forwarder │                                          │
//!                    │  └──────────┘                                          │
//!                    │  ┌────────────────────────────────────────────────┐   │
//!                    │  │ config · observability · lifecycle             │   │
//!                    │  └────────────────────────────────────────────────┘   │
//!                    └───────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use rpc_gateway::config::{read_config, validated, ConfigError, GatewayConfig};
use rpc_gateway::lifecycle::{signals, startup, Shutdown};
use rpc_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "rpc-gateway")]
#[command(about = "HTTP/JSON and WebSocket gateway for gRPC services", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listener address, overrides listener.bind_address
    #[arg(long)]
    bind: Option<String>,

    /// Backend endpoint, overrides backend.endpoint
    #[arg(long)]
    backend: Option<String>,

    /// Descriptor set path, overrides descriptors.path
    #[arg(long)]
    descriptors: Option<String>,
}

fn load(cli: Cli) -> Result<GatewayConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(backend) = cli.backend {
        config.backend.endpoint = backend;
    }
    if let Some(descriptors) = cli.descriptors {
        config.descriptors.path = descriptors;
    }
    validated(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load(Cli::parse())?;

    logging::init(
        &config.observability.log_level,
        logging::LogFormat::from_name(&config.observability.log_format),
    );
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rpc-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backend = %config.backend.endpoint,
        descriptors = %config.descriptors.path,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let gateway = match startup::start(&config, &shutdown).await {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };
    tracing::info!(address = %gateway.local_addr(), "Listening for connections");

    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));
    gateway.run().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
