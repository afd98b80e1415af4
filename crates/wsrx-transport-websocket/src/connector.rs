//! Outbound WebSocket dialing (ws:// and wss://)

use std::sync::Arc;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::Connector;
use tracing::debug;
use url::Url;
use wsrx_transport::{TransportError, TransportResult};

use crate::config::WebSocketConfig;
use crate::stream::{ClientWebSocket, WebSocketStream};

/// Dials tunnel URLs
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    config: Arc<WebSocketConfig>,
    tls: Arc<rustls::ClientConfig>,
}

impl WebSocketConnector {
    pub fn new(config: Arc<WebSocketConfig>) -> TransportResult<Self> {
        config.validate()?;
        let tls = config.build_tls_config()?;
        Ok(Self { config, tls })
    }

    /// Open a tunnel to `url`.
    ///
    /// Fails with `ConfigurationError` for anything but a ws/wss URL and
    /// `Timeout` when the configured limit elapses. TLS setup failures map
    /// to `TlsError`, every other handshake failure to `ConnectionError`.
    pub async fn connect(&self, url: &str) -> TransportResult<ClientWebSocket> {
        let parsed = Url::parse(url).map_err(|e| {
            TransportError::ConfigurationError(format!("Invalid tunnel URL '{}': {}", url, e))
        })?;
        match parsed.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::ConfigurationError(format!(
                    "Unsupported tunnel URL scheme '{}', expected ws or wss",
                    other
                )))
            }
        }

        debug!("Dialing tunnel {}", url);

        let handshake = tokio_tungstenite::connect_async_tls_with_config(
            parsed.as_str(),
            None,
            true,
            Some(Connector::Rustls(self.tls.clone())),
        );
        let result = match self.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => handshake.await,
        };

        let (socket, response) = result.map_err(|e| match e {
            WsError::Tls(e) => {
                TransportError::TlsError(format!("TLS setup for {} failed: {}", url, e))
            }
            e => TransportError::ConnectionError(format!(
                "WebSocket handshake with {} failed: {}",
                url, e
            )),
        })?;
        debug!("Tunnel {} established ({})", url, response.status());

        Ok(WebSocketStream::new(
            socket,
            url.to_string(),
            self.config.max_frame_size,
        ))
    }
}
