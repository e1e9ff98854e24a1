//! # Frames
//!
//! Transport-neutral view of a websocket message. Ping/pong are answered by
//! the websocket libraries themselves and never surface as frames.

use crate::error::TransportError;
use axum::extract::ws::{Message as AxumMessage, WebSocket};
use bytes::Bytes;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

/// One inbound or outbound websocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Close,
}

impl Frame {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Classify an axum message; `None` for control frames.
    pub fn from_axum(message: AxumMessage) -> Option<Self> {
        match message {
            AxumMessage::Text(text) => Some(Self::Text(text)),
            AxumMessage::Binary(data) => Some(Self::Binary(Bytes::from(data))),
            AxumMessage::Close(_) => Some(Self::Close),
            AxumMessage::Ping(_) | AxumMessage::Pong(_) => None,
        }
    }

    pub fn into_axum(self) -> AxumMessage {
        match self {
            Self::Text(text) => AxumMessage::Text(text),
            Self::Binary(data) => AxumMessage::Binary(data.to_vec()),
            Self::Close => AxumMessage::Close(None),
        }
    }

    /// Classify a tungstenite message; `None` for control frames.
    pub fn from_tungstenite(message: TungsteniteMessage) -> Option<Self> {
        match message {
            TungsteniteMessage::Text(text) => Some(Self::Text(text.as_str().to_string())),
            TungsteniteMessage::Binary(data) => Some(Self::Binary(data)),
            TungsteniteMessage::Close(_) => Some(Self::Close),
            TungsteniteMessage::Ping(_)
            | TungsteniteMessage::Pong(_)
            | TungsteniteMessage::Frame(_) => None,
        }
    }

    pub fn into_tungstenite(self) -> TungsteniteMessage {
        match self {
            Self::Text(text) => TungsteniteMessage::Text(text.into()),
            Self::Binary(data) => TungsteniteMessage::Binary(data),
            Self::Close => TungsteniteMessage::Close(None),
        }
    }
}

/// Split an upgraded axum socket into a frame sink and a frame stream.
pub fn axum_transport(
    socket: WebSocket,
) -> (
    impl Sink<Frame, Error = TransportError> + Send + Unpin + 'static,
    impl Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static,
) {
    let (sink, stream) = socket.split();

    let sink = sink
        .sink_map_err(TransportError::send)
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(frame.into_axum())));

    let stream = stream.filter_map(|message| {
        future::ready(match message {
            Ok(message) => Frame::from_axum(message).map(Ok),
            Err(e) => Some(Err(TransportError::receive(e))),
        })
    });

    (sink, stream)
}
