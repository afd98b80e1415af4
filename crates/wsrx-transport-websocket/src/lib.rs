//! WebSocket side of a tunnel session
//!
//! Adapts a WebSocket connection to the [`TransportStream`] byte-stream
//! capability so it can be bridged with a plain TCP connection.
//!
//! - [`WebSocketConnector`] dials `ws://` and `wss://` URLs (rustls)
//! - [`WebSocketStream`] wraps either a dialed tungstenite socket or, with
//!   the `axum` feature, a socket upgraded by an axum handler
//!
//! [`TransportStream`]: wsrx_transport::TransportStream

pub mod config;
pub mod connector;
pub mod frame;
pub mod stream;

pub use config::WebSocketConfig;
pub use connector::WebSocketConnector;
pub use frame::{FrameKind, WsFrame};
pub use stream::{ClientWebSocket, WebSocketStream};

#[cfg(feature = "axum")]
pub use stream::ServerWebSocket;
