//! # Connection Registry
//!
//! Tracks open connections and drives each one:
//!
//! ```text
//!             ┌───────────── serve() ─────────────┐
//! transport ──► receive loop ──► handler.on_*()   │
//!             │                                   │
//! send() ──► outbound queue ──► writer task ──────┼──► transport
//!             └───────────────────────────────────┘
//! ```
//!
//! One receive loop and one writer task per connection. The registry entry
//! is removed before `on_close` runs, so anything iterating the registry
//! after that point no longer sees the connection.
//!
//! Once a connection starts closing, the peer has `close_timeout` to answer
//! the close handshake before the receive loop gives up, and the writer gets
//! the same bound to flush before it is aborted.

use crate::connection::{Connection, ConnectionId, ConnectionState};
use crate::error::TransportError;
use crate::frame::Frame;
use crate::handler::ConnectionHandler;
use dashmap::DashMap;
use futures::{Sink, SinkExt, Stream, StreamExt};
use ks_02_http_pipeline::HttpRequest;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Default outbound queue depth per connection.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Default wait for the peer's close frame and for the writer to flush.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Predicate deciding whether an upgrade request may become a connection.
pub type AcceptCheck = Arc<dyn Fn(&HttpRequest) -> bool + Send + Sync>;

/// Connection counters.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    pub connections_opened: AtomicU64,
    pub connections_closed: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub frames_received: AtomicU64,
    pub close_timeouts: AtomicU64,
}

/// Registry of open connections.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    accept_check: Option<AcceptCheck>,
    outbound_buffer: usize,
    close_timeout: Duration,
    metrics: ConnectionMetrics,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            accept_check: None,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            metrics: ConnectionMetrics::default(),
        }
    }

    /// Veto upgrade requests for which `check` returns `false`.
    #[must_use]
    pub fn with_accept_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&HttpRequest) -> bool + Send + Sync + 'static,
    {
        self.accept_check = Some(Arc::new(check));
        self
    }

    #[must_use]
    pub fn with_outbound_buffer(mut self, buffer: usize) -> Self {
        self.outbound_buffer = buffer.max(1);
        self
    }

    #[must_use]
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// Run the accept check; records a rejection when it fails.
    pub fn accepts(&self, request: &HttpRequest) -> bool {
        let accepted = self.accept_check.as_ref().map_or(true, |check| check(request));
        if !accepted {
            self.metrics
                .connections_rejected
                .fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    /// Drive one accepted transport until it closes.
    ///
    /// Opens the connection, calls `on_open`, dispatches every inbound frame
    /// to `handler`, then removes the connection and calls `on_close`.
    pub async fn serve<Tx, Rx>(
        &self,
        sink: Tx,
        mut stream: Rx,
        handler: Arc<dyn ConnectionHandler>,
        remote_addr: Option<SocketAddr>,
    ) -> ConnectionId
    where
        Tx: Sink<Frame, Error = TransportError> + Send + Unpin + 'static,
        Rx: Stream<Item = Result<Frame, TransportError>> + Send + Unpin,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_buffer);
        let connection = Arc::new(Connection::new(outbound_tx, remote_addr));
        let id = connection.id();

        let mut writer = tokio::spawn(write_loop(Arc::clone(&connection), sink, outbound_rx));

        connection.open();
        self.connections.insert(id, Arc::clone(&connection));
        self.metrics
            .connections_opened
            .fetch_add(1, Ordering::Relaxed);
        info!(connection_id = %id, remote_addr = ?remote_addr, "connection opened");

        handler.on_open(&connection).await;

        let mut closing = connection.closing_signal();
        let mut handshake_deadline: Option<Instant> = None;
        while connection.state() < ConnectionState::Closed {
            let next = match handshake_deadline {
                None => tokio::select! {
                    biased;
                    frame = stream.next() => frame,
                    _ = wait_closing(&mut closing) => {
                        handshake_deadline = Some(Instant::now() + self.close_timeout);
                        continue;
                    }
                },
                Some(deadline) => match timeout_at(deadline, stream.next()).await {
                    Ok(frame) => frame,
                    Err(_) => {
                        debug!(connection_id = %id, "peer did not answer close, giving up");
                        self.metrics.close_timeouts.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                },
            };
            let Some(frame) = next else {
                debug!(connection_id = %id, "transport ended");
                break;
            };
            self.metrics.frames_received.fetch_add(1, Ordering::Relaxed);

            match frame {
                Ok(Frame::Text(text)) => handler.on_message(&connection, text).await,
                Ok(Frame::Binary(data)) => handler.on_binary(&connection, data).await,
                Ok(Frame::Close) => {
                    debug!(connection_id = %id, "peer sent close");
                    break;
                }
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "receive failed");
                    break;
                }
            }
        }

        connection.close();
        self.connections.remove(&id);
        handler.on_close(&connection).await;

        match timeout(self.close_timeout, &mut writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(connection_id = %id, error = %e, "writer task failed"),
            Err(_) => {
                warn!(connection_id = %id, "writer did not finish, aborting");
                writer.abort();
            }
        }
        connection.advance(ConnectionState::Closed);
        self.metrics
            .connections_closed
            .fetch_add(1, Ordering::Relaxed);
        info!(connection_id = %id, "connection closed");

        id
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Begin closing a connection. Returns `false` if unknown or already closing.
    pub fn close(&self, id: &ConnectionId) -> bool {
        self.get(id).is_some_and(|connection| connection.close())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Queue `frame` on every open connection; returns how many accepted it.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        // Snapshot first so no map shard lock is held while sending.
        let targets: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        targets
            .iter()
            .filter(|connection| connection.send(frame.clone()))
            .count()
    }

    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.metrics
    }
}

/// Resolves once the connection has started closing.
async fn wait_closing(closing: &mut watch::Receiver<bool>) {
    if closing.wait_for(|closing| *closing).await.is_err() {
        // Sender lives in the connection, which outlives the loop.
        std::future::pending::<()>().await;
    }
}

/// Drain the outbound queue into the transport, then finish with a close frame.
///
/// Frames already queued when the connection starts closing are still
/// written; the loop ends at the close marker or, when the marker was
/// dropped on a full queue, at the close signal once the queue is empty.
async fn write_loop<Tx>(connection: Arc<Connection>, mut sink: Tx, mut outbound: mpsc::Receiver<Frame>)
where
    Tx: Sink<Frame, Error = TransportError> + Send + Unpin,
{
    let mut closing = connection.closing_signal();
    loop {
        let frame = tokio::select! {
            biased;
            frame = outbound.recv() => frame,
            _ = wait_closing(&mut closing) => None,
        };
        let Some(frame) = frame.filter(|frame| *frame != Frame::Close) else {
            break;
        };
        if let Err(e) = sink.send(frame).await {
            debug!(connection_id = %connection.id(), error = %e, "write failed, marking closed");
            connection.advance(ConnectionState::Closed);
            return;
        }
    }

    if let Err(e) = sink.send(Frame::Close).await {
        debug!(connection_id = %connection.id(), error = %e, "close frame not sent");
    }
    if let Err(e) = sink.close().await {
        debug!(connection_id = %connection.id(), error = %e, "transport close failed");
    }
}
