//! # Connections
//!
//! Long-lived websocket connections layered on the HTTP pipeline.
//!
//! - [`WebSocketMiddleware`] claims upgrade requests on a path and vetoes
//!   them through the registry's accept check.
//! - [`ConnectionRegistry`] owns accepted connections, runs one receive loop
//!   and one writer task per connection, and dispatches lifecycle events to a
//!   [`ConnectionHandler`].
//! - [`Connection::send`] never fails loudly: frames for connections that are
//!   not open are dropped and logged.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod connection;
pub mod error;
pub mod frame;
pub mod handler;
pub mod registry;
pub mod upgrade;

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::TransportError;
pub use frame::{axum_transport, Frame};
pub use handler::ConnectionHandler;
pub use registry::{
    AcceptCheck, ConnectionMetrics, ConnectionRegistry, DEFAULT_CLOSE_TIMEOUT, DEFAULT_OUTBOUND_BUFFER,
};
pub use upgrade::{WebSocketMiddleware, DEFAULT_MAX_MESSAGE_SIZE};
