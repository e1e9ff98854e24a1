//! # Event Bus
//!
//! Publish/subscribe over websocket connections. Each connection declares the
//! actions it wants with `UpdateList`; an `Emit` is relayed verbatim to every
//! connection currently subscribed to its action, the sender included.
//!
//! - [`EventBusServer`] is a [`ks_03_connections::ConnectionHandler`]; mount
//!   it behind a `WebSocketMiddleware`.
//! - [`EventBusClient`] keeps one outbound connection alive, re-dialling on
//!   a fixed interval and re-sending its subscription list each time.
//!
//! Action names compare case-insensitively. Malformed messages are dropped.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod client;
pub mod envelope;
pub mod server;

pub use client::{
    EventBusClient, EventBusClientConfig, DEFAULT_CLIENT_BUFFER, DEFAULT_RECONNECT_INTERVAL,
};
pub use envelope::{DecodeError, Emit, Envelope};
pub use server::{EventBusMetrics, EventBusServer};
