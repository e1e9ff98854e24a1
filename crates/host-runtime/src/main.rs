//! # Keystone Host
//!
//! Runs the chat demo: `POST /api/chat/send` publishes into the event bus
//! mounted on the websocket path, static files are served from the
//! configured root.

use anyhow::{Context, Result};
use clap::Parser;
use host_runtime::chat::{chat_api, ChatController};
use host_runtime::{Host, HostConfig};
use keystone_telemetry::{init_logging, TelemetryConfig};
use std::path::PathBuf;
use tracing::info;

/// Keystone application host.
#[derive(Debug, Parser)]
#[command(name = "keystone-host", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&TelemetryConfig::from_env()).context("failed to initialise logging")?;

    let config = HostConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    info!(
        addr = %config.http_addr(),
        websocket_path = %config.websocket.path,
        "starting keystone host"
    );

    let host = Host::builder(config)
        .with_middleware(chat_api())
        .require::<ChatController>()
        .build()?;

    let listener = host.bind().await?;
    info!("host is running. Press Ctrl+C to stop.");
    host.serve(listener).await
}
