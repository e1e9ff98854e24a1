//! # Keystone Host Runtime
//!
//! Bootstrap for a Keystone host.
//!
//! ## Startup Sequence
//!
//! 1. Initialise logging ([`keystone_telemetry`])
//! 2. Load [`HostConfig`] (file, then environment), validate
//! 3. Build the root container and register host services
//! 4. Assemble the middleware pipeline
//! 5. Serve until Ctrl+C, then close websocket connections
//!
//! ```rust,ignore
//! let config = HostConfig::load(None)?;
//! let host = Host::builder(config).with_middleware(chat::chat_api()).build()?;
//! let listener = host.bind().await?;
//! host.serve(listener).await?;
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod chat;
pub mod config;
pub mod host;

pub use config::{
    ConfigError, EventBusConfig, HostConfig, HttpConfig, StaticFilesConfig, WebSocketConfig,
};
pub use host::{Host, HostBuilder};
