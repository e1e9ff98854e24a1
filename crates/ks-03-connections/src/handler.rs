//! Per-connection lifecycle callbacks.

use crate::connection::Connection;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Receives lifecycle events for every connection served by a registry.
///
/// Every method has a no-op default, so a handler only implements the
/// events it cares about. Callbacks for one connection run in arrival order
/// on that connection's receive loop; different connections run
/// concurrently.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// The connection reached `Open`.
    async fn on_open(&self, _connection: &Arc<Connection>) {}

    /// A text frame arrived.
    async fn on_message(&self, _connection: &Arc<Connection>, _text: String) {}

    /// A binary frame arrived.
    async fn on_binary(&self, _connection: &Arc<Connection>, _data: Bytes) {}

    /// The connection is closing; sends from here on are dropped.
    async fn on_close(&self, _connection: &Arc<Connection>) {}
}
