//! Mapping between WebSocket messages and tunnel payload
//!
//! A tunnel carries raw bytes. Binary and text messages both carry payload
//! (text is taken as its UTF-8 bytes), ping/pong are handled by the
//! WebSocket library and skipped here, a close message ends the stream.

use bytes::Bytes;
use tokio_tungstenite::tungstenite;

/// What an inbound message means for the byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Payload bytes, possibly empty
    Data(Bytes),
    /// Peer asked to close
    Close,
    /// Ping, pong or raw frame; carries no payload
    Control,
}

/// Message type of a WebSocket implementation
pub trait WsFrame: Send + Unpin + Sized + 'static {
    /// Error type of the socket carrying these messages
    type Error: std::fmt::Display + Send;

    fn binary(payload: Bytes) -> Self;

    fn close() -> Self;

    fn classify(self) -> FrameKind;
}

impl WsFrame for tungstenite::Message {
    type Error = tungstenite::Error;

    fn binary(payload: Bytes) -> Self {
        tungstenite::Message::Binary(payload.to_vec())
    }

    fn close() -> Self {
        tungstenite::Message::Close(None)
    }

    fn classify(self) -> FrameKind {
        use tungstenite::Message;
        match self {
            Message::Binary(data) => FrameKind::Data(Bytes::from(data)),
            Message::Text(text) => FrameKind::Data(Bytes::from(text.into_bytes())),
            Message::Close(_) => FrameKind::Close,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => FrameKind::Control,
        }
    }
}

#[cfg(feature = "axum")]
impl WsFrame for axum::extract::ws::Message {
    type Error = axum::Error;

    fn binary(payload: Bytes) -> Self {
        axum::extract::ws::Message::Binary(payload)
    }

    fn close() -> Self {
        axum::extract::ws::Message::Close(None)
    }

    fn classify(self) -> FrameKind {
        use axum::extract::ws::Message;
        match self {
            Message::Binary(data) => FrameKind::Data(data),
            Message::Text(text) => FrameKind::Data(Bytes::copy_from_slice(text.as_str().as_bytes())),
            Message::Close(_) => FrameKind::Close,
            Message::Ping(_) | Message::Pong(_) => FrameKind::Control,
        }
    }
}
