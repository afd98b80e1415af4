//! Local listener that opens one tunnel per accepted connection

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wsrx_control::{RegistryError, RegistryHandle, Role, Session, SessionMeta, SharedStream};
use wsrx_transport::{IoStream, TransportError};
use wsrx_transport_websocket::{WebSocketConfig, WebSocketConnector};

use crate::config::ClientConfig;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Tunnel error: {0}")]
    Transport(#[from] TransportError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bound tunnel client, ready to accept
pub struct TunnelClient {
    listener: TcpListener,
    connector: Arc<WebSocketConnector>,
    registry: RegistryHandle,
    remote_url: Arc<str>,
    /// Prepended to every session id this client registers
    session_prefix: Arc<str>,
}

impl TunnelClient {
    /// Bind the local listener and prepare the tunnel dialer
    pub async fn bind(config: ClientConfig, registry: RegistryHandle) -> Result<Self, ClientError> {
        let mut ws_config = WebSocketConfig::default().with_max_frame_size(config.max_frame_size);
        if config.insecure {
            warn!("TLS certificate verification is disabled for {}", config.remote_url);
            ws_config = ws_config.with_insecure_skip_verify();
        }
        if let Some(timeout) = config.connect_timeout {
            ws_config = ws_config.with_connect_timeout(timeout);
        }
        for der in &config.root_certs {
            ws_config = ws_config.with_root_cert(der.clone());
        }
        let connector = WebSocketConnector::new(Arc::new(ws_config))
            .map_err(|e| ClientError::Config(e.to_string()))?;

        let addr = config.local_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ClientError::Bind { addr, source })?;

        Ok(Self {
            listener,
            connector: Arc::new(connector),
            registry,
            remote_url: config.remote_url.into(),
            session_prefix: Arc::from(""),
        })
    }

    /// Register sessions as `{prefix}{uuid}` so they can be closed as a
    /// group with `force_close_by_prefix`
    pub fn with_session_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.session_prefix = Arc::from(prefix.into());
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) -> Result<(), ClientError> {
        info!(
            "Forwarding {} -> {}",
            self.local_addr()?,
            self.remote_url
        );

        loop {
            match self.listener.accept().await {
                Ok((socket, peer_addr)) => {
                    debug!("Accepted TCP connection from {}", peer_addr);
                    let connector = self.connector.clone();
                    let registry = self.registry.clone();
                    let remote_url = self.remote_url.clone();
                    let session_id = format!("{}{}", self.session_prefix, Uuid::new_v4());
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(
                            socket,
                            peer_addr,
                            connector,
                            registry,
                            &remote_url,
                            session_id,
                        )
                        .await
                        {
                            error!("Failed to tunnel connection from {}: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(
        mut socket: TcpStream,
        peer_addr: SocketAddr,
        connector: Arc<WebSocketConnector>,
        registry: RegistryHandle,
        remote_url: &str,
        session_id: String,
    ) -> Result<(), ClientError> {
        let tunnel = match connector.connect(remote_url).await {
            Ok(tunnel) => tunnel,
            Err(e) => {
                // Nothing was registered yet, so the socket is ours to close
                if let Err(shutdown) = socket.shutdown().await {
                    debug!("Shutdown of {} failed: {}", peer_addr, shutdown);
                }
                return Err(e.into());
            }
        };

        let tcp: SharedStream = Arc::new(IoStream::tcp(socket));
        let tunnel: SharedStream = Arc::new(tunnel);
        let meta = SessionMeta::new(Role::Client, peer_addr.to_string(), remote_url);
        let session = Session::new(session_id, tcp, tunnel, meta);

        registry.register(session).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use wsrx_control::{BridgeConfig, ConnectionRegistry};

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let (registry, _task) = ConnectionRegistry::spawn(BridgeConfig::default());
        let config = ClientConfig::builder()
            .remote_url("ws://127.0.0.1:1/traffic/abc")
            .build()
            .unwrap();

        let client = TunnelClient::bind(config, registry).await.unwrap();
        assert_ne!(client.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_invalid_root_cert_fails_bind() {
        let (registry, _task) = ConnectionRegistry::spawn(BridgeConfig::default());
        let config = ClientConfig::builder()
            .remote_url("wss://127.0.0.1:1/traffic/abc")
            .root_cert(b"not a certificate".to_vec())
            .build()
            .unwrap();

        let err = TunnelClient::bind(config, registry).await.err().unwrap();
        assert!(matches!(err, ClientError::Config(_)), "{}", err);
    }

    #[tokio::test]
    async fn test_dial_failure_closes_accepted_socket() {
        // Port of a listener that is already gone
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = unused.local_addr().unwrap();
        drop(unused);

        let (registry, _task) = ConnectionRegistry::spawn(BridgeConfig::default());
        let config = ClientConfig::builder()
            .remote_url(format!("ws://{}/traffic/abc", dead_addr))
            .build()
            .unwrap();
        let client = TunnelClient::bind(config, registry.clone()).await.unwrap();
        let local = client.local_addr().unwrap();
        tokio::spawn(client.run());

        let mut socket = TcpStream::connect(local).await.unwrap();
        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(2), socket.read(&mut buf))
            .await
            .expect("accepted socket should be closed")
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert!(registry.list().await.unwrap().is_empty());

        // Listener keeps accepting after a failed dial
        assert!(TcpStream::connect(local).await.is_ok());
    }
}
