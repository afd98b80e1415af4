//! Config file and flag resolution
//!
//! Precedence is command line, then the YAML file, then built-in defaults.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wsrx_api::{ApiServerConfig, DEFAULT_PORT};
use wsrx_client::ClientConfig;
use wsrx_control::bridge::DEFAULT_BUFFER_SIZE;
use wsrx_control::BridgeConfig;
use wsrx_daemon::{DaemonConfig, TunnelDefaults};
use wsrx_transport_websocket::config::DEFAULT_MAX_FRAME_SIZE;

use crate::cli::{Cli, ConnectArgs, DaemonArgs, ServeArgs};

pub const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: ServerSection,
    pub client: ClientSection,
    pub daemon: DaemonSection,
    pub logger: LoggerSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind: Option<SocketAddr>,
    pub admin_token: Option<String>,
    pub database_url: Option<String>,
    /// Seconds
    pub connect_timeout: Option<u64>,
    pub buffer_size: Option<usize>,
    pub max_frame_size: Option<usize>,
    pub enable_cors: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub insecure: Option<bool>,
    /// Seconds
    pub connect_timeout: Option<u64>,
    /// DER encoded CA certificate for wss://
    pub ca_cert: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonSection {
    pub bind: Option<SocketAddr>,
    pub secret: Option<String>,
    pub allowed_origins: Option<Vec<String>>,
    /// Seconds without a heartbeat before exiting
    pub heartbeat: Option<u64>,
    pub insecure: Option<bool>,
    /// Seconds
    pub connect_timeout: Option<u64>,
    pub ca_cert: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggerSection {
    pub level: Option<String>,
    pub json: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Defaults when no file was given
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl LogSettings {
    pub fn resolve(cli: &Cli, file: &LoggerSection) -> Self {
        Self {
            level: cli
                .log_level
                .clone()
                .or_else(|| file.level.clone())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            json: cli.log_json || file.json.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub api: ApiServerConfig,
    pub database_url: String,
    pub bridge: BridgeConfig,
}

impl ServerSettings {
    pub fn resolve(args: &ServeArgs, file: &ServerSection) -> Result<Self> {
        let buffer_size = args
            .buffer_size
            .or(file.buffer_size)
            .unwrap_or(DEFAULT_BUFFER_SIZE);
        if buffer_size == 0 {
            bail!("buffer_size must be greater than zero");
        }

        let max_frame_size = args
            .max_frame_size
            .or(file.max_frame_size)
            .unwrap_or(DEFAULT_MAX_FRAME_SIZE);
        if max_frame_size == 0 {
            bail!("max_frame_size must be greater than zero");
        }

        // An empty token means the admin API is open
        let admin_token = args
            .admin_token
            .clone()
            .or_else(|| file.admin_token.clone())
            .filter(|token| !token.is_empty());

        let api = ApiServerConfig {
            bind_addr: args
                .bind
                .or(file.bind)
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))),
            admin_token,
            connect_timeout: seconds(args.connect_timeout.or(file.connect_timeout))?,
            max_frame_size,
            enable_cors: args.enable_cors || file.enable_cors.unwrap_or(false),
        };

        Ok(Self {
            api,
            database_url: args
                .database_url
                .clone()
                .or_else(|| file.database_url.clone())
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            bridge: BridgeConfig::default().with_buffer_size(buffer_size),
        })
    }
}

pub fn client_config(args: &ConnectArgs, file: &ClientSection) -> Result<ClientConfig> {
    let mut builder = ClientConfig::builder()
        .remote_url(args.url.clone())
        .local_port(args.port.or(file.port).unwrap_or(0))
        .insecure(args.insecure || file.insecure.unwrap_or(false))
        .connect_timeout(seconds(args.connect_timeout.or(file.connect_timeout))?);
    if let Some(host) = args.host.clone().or_else(|| file.host.clone()) {
        builder = builder.local_host(host);
    }
    if let Some(path) = args.ca_cert.as_deref().or(file.ca_cert.as_deref()) {
        builder = builder.root_cert(read_ca_cert(path)?);
    }
    builder.build().map_err(anyhow::Error::msg)
}

pub fn daemon_config(args: &DaemonArgs, file: &DaemonSection) -> Result<DaemonConfig> {
    let mut tunnel = TunnelDefaults {
        insecure: args.insecure || file.insecure.unwrap_or(false),
        connect_timeout: seconds(args.connect_timeout.or(file.connect_timeout))?,
        root_certs: Vec::new(),
    };
    if let Some(path) = args.ca_cert.as_deref().or(file.ca_cert.as_deref()) {
        tunnel.root_certs.push(read_ca_cert(path)?);
    }

    let heartbeat_timeout = match args.heartbeat.or(file.heartbeat) {
        Some(0) => bail!("heartbeat must be greater than zero"),
        other => other.map(Duration::from_secs),
    };

    let allowed_origins = if args.allowed_origins.is_empty() {
        file.allowed_origins.clone().unwrap_or_default()
    } else {
        args.allowed_origins.clone()
    };

    Ok(DaemonConfig {
        bind_addr: args
            .bind
            .or(file.bind)
            .unwrap_or_else(|| DaemonConfig::default().bind_addr),
        secret: args
            .secret
            .clone()
            .or_else(|| file.secret.clone())
            .filter(|secret| !secret.is_empty()),
        allowed_origins,
        heartbeat_timeout,
        tunnel,
    })
}

fn read_ca_cert(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read CA certificate: {}", path.display()))
}

fn seconds(value: Option<u64>) -> Result<Option<Duration>> {
    match value {
        Some(0) => bail!("connect_timeout must be greater than zero"),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
        None => Ok(None),
    }
}
