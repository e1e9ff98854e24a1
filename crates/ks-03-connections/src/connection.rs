//! # Connection
//!
//! A registered websocket connection. Outbound frames go through a bounded
//! queue drained by a single writer task, so at most one write is in flight
//! per connection regardless of how many tasks call [`Connection::send`].
//!
//! ```text
//! Connecting ──► Open ──► Closing ──► Closed
//! ```
//!
//! State only moves forward. Reaching `Closing` raises a close signal that
//! the receive loop and writer task watch, so neither depends on the close
//! marker finding room in the queue.

use crate::frame::Frame;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Unique id of a connection (UUID v7, time-ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// One accepted connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    state: AtomicU8,
    outbound: mpsc::Sender<Frame>,
    /// Held shared by `send`, exclusively by `close`: no frame is queued
    /// behind the close marker.
    send_gate: RwLock<()>,
    closing: watch::Sender<bool>,
    remote_addr: Option<SocketAddr>,
    opened_at: Instant,
}

impl Connection {
    /// New connection in `Connecting` with its outbound queue sender.
    pub fn new(outbound: mpsc::Sender<Frame>, remote_addr: Option<SocketAddr>) -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            id: ConnectionId::new(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            outbound,
            send_gate: RwLock::new(()),
            closing,
            remote_addr,
            opened_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// `Connecting` to `Open`. Returns `false` from any other state.
    pub fn open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move forward to `state`; earlier states are ignored.
    pub(crate) fn advance(&self, state: ConnectionState) -> ConnectionState {
        let previous = self.state.fetch_max(state as u8, Ordering::AcqRel);
        if state >= ConnectionState::Closing {
            self.closing.send_if_modified(|closing| !std::mem::replace(closing, true));
        }
        ConnectionState::from_u8(previous)
    }

    /// Receiver that turns `true` once the connection reaches `Closing`.
    pub(crate) fn closing_signal(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }

    /// Queue a frame for the writer task.
    ///
    /// Returns `false` without raising when the connection is not open or
    /// its queue is full; the peer may have gone away concurrently.
    pub fn send(&self, frame: Frame) -> bool {
        let _gate = self.send_gate.read();
        if !self.is_open() {
            debug!(
                connection_id = %self.id,
                state = ?self.state(),
                "dropping frame for connection that is not open"
            );
            return false;
        }

        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(connection_id = %self.id, "outbound queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection_id = %self.id, "writer gone, marking closed");
                self.advance(ConnectionState::Closed);
                false
            }
        }
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.send(Frame::Binary(data.into()))
    }

    /// Start closing: stop accepting sends and ask the writer to send a
    /// close frame. Returns `false` if already closing or closed.
    pub fn close(&self) -> bool {
        let _gate = self.send_gate.write();
        let previous = self.advance(ConnectionState::Closing);
        if previous >= ConnectionState::Closing {
            return false;
        }
        // A full queue loses the marker; the writer still ends on the close signal.
        if let Err(e) = self.outbound.try_send(Frame::Close) {
            debug!(connection_id = %self.id, error = %e, "close marker not queued");
        }
        debug!(connection_id = %self.id, "closing connection");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(buffer: usize) -> (Connection, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Connection::new(tx, None), rx)
    }

    #[test]
    fn test_send_before_open_is_dropped() {
        let (conn, mut rx) = connection(4);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.send_text("early"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_when_open() {
        let (conn, mut rx) = connection(4);
        assert!(conn.open());
        assert!(!conn.open());

        assert!(conn.send_text("hello"));
        assert_eq!(rx.try_recv().unwrap(), Frame::text("hello"));
    }

    #[test]
    fn test_state_never_moves_backwards() {
        let (conn, _rx) = connection(4);
        conn.advance(ConnectionState::Closed);
        conn.advance(ConnectionState::Open);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_close_queues_marker_once_and_blocks_sends() {
        let (conn, mut rx) = connection(4);
        conn.advance(ConnectionState::Open);

        assert!(conn.close());
        assert!(!conn.close());
        assert!(!conn.send_text("late"));

        assert_eq!(rx.try_recv().unwrap(), Frame::Close);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_raises_signal_even_when_queue_is_full() {
        let (conn, mut rx) = connection(1);
        conn.advance(ConnectionState::Open);
        let signal = conn.closing_signal();
        assert!(!*signal.borrow());

        assert!(conn.send_text("fills the queue"));
        assert!(conn.close());

        assert!(*signal.borrow());
        assert_eq!(rx.try_recv().unwrap(), Frame::text("fills the queue"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_write_failure_raises_close_signal() {
        let (conn, _rx) = connection(1);
        conn.advance(ConnectionState::Open);
        let signal = conn.closing_signal();

        conn.advance(ConnectionState::Closed);

        assert!(*signal.borrow());
    }

    #[test]
    fn test_full_queue_fails_soft() {
        let (conn, _rx) = connection(1);
        conn.advance(ConnectionState::Open);

        assert!(conn.send_text("one"));
        assert!(!conn.send_text("two"));
        assert!(conn.is_open());
    }

    #[test]
    fn test_dropped_writer_marks_closed() {
        let (conn, rx) = connection(1);
        conn.advance(ConnectionState::Open);
        drop(rx);

        assert!(!conn.send_text("nobody listening"));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
