//! Client configuration

use std::time::Duration;
use url::Url;
use wsrx_transport_websocket::config::DEFAULT_MAX_FRAME_SIZE;

/// Tunnel client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `ws://` or `wss://` URL of the remote `/traffic/{id}` endpoint
    pub remote_url: String,
    pub local_host: String,
    /// `0` picks an ephemeral port
    pub local_port: u16,
    /// Skip TLS certificate verification for wss:// (INSECURE)
    pub insecure: bool,
    /// Limit for each tunnel handshake, `None` waits for the OS
    pub connect_timeout: Option<Duration>,
    pub max_frame_size: usize,
    /// DER encoded roots trusted for wss:// on top of the web PKI roots
    pub root_certs: Vec<Vec<u8>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_url: String::new(),
            local_host: "127.0.0.1".to_string(),
            local_port: 0,
            insecure: false,
            connect_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            root_certs: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn local_addr(&self) -> String {
        if self.local_host.contains(':') && !self.local_host.starts_with('[') {
            format!("[{}]:{}", self.local_host, self.local_port)
        } else {
            format!("{}:{}", self.local_host, self.local_port)
        }
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn remote_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote_url = url.into();
        self
    }

    pub fn local_host(mut self, host: impl Into<String>) -> Self {
        self.config.local_host = host.into();
        self
    }

    pub fn local_port(mut self, port: u16) -> Self {
        self.config.local_port = port;
        self
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.config.insecure = insecure;
        self
    }

    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Trust an extra DER encoded root certificate
    pub fn root_cert(mut self, der: Vec<u8>) -> Self {
        self.config.root_certs.push(der);
        self
    }

    pub fn build(self) -> Result<ClientConfig, String> {
        if self.config.remote_url.is_empty() {
            return Err("remote_url is required".to_string());
        }
        let url = Url::parse(&self.config.remote_url)
            .map_err(|e| format!("invalid remote_url '{}': {}", self.config.remote_url, e))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(format!(
                "remote_url must use ws:// or wss://, got '{}'",
                url.scheme()
            ));
        }
        if self.config.local_host.is_empty() {
            return Err("local_host must not be empty".to_string());
        }
        Ok(self.config)
    }
}
