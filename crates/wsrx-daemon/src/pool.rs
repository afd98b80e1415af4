//! Tunnel pool
//!
//! Each entry is a local listener that forwards every accepted connection to
//! one remote tunnel URL. Entries are keyed by their bound local address.
//! All entries share one connection registry, and an entry registers its
//! sessions under `{key}/` so removing the entry closes them too.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use wsrx_client::{ClientConfig, ClientError, TunnelClient};
use wsrx_control::{RegistryError, RegistryHandle};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Invalid local address '{0}', expected host:port")]
    InvalidAddress(String),

    #[error("Invalid tunnel: {0}")]
    InvalidTunnel(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Client settings applied to every pool entry
#[derive(Debug, Clone, Default)]
pub struct TunnelDefaults {
    /// Skip TLS certificate verification for wss:// (INSECURE)
    pub insecure: bool,
    pub connect_timeout: Option<Duration>,
    /// Extra DER encoded roots trusted for wss://
    pub root_certs: Vec<Vec<u8>>,
}

/// Public view of a pool entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelInfo {
    /// Bound local address, also the entry key
    pub from: String,
    /// Remote `ws://` or `wss://` tunnel URL
    pub to: String,
    pub created_at: DateTime<Utc>,
}

/// Result of removing an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedTunnel {
    #[serde(flatten)]
    pub tunnel: TunnelInfo,
    pub closed_sessions: Vec<String>,
}

struct PoolEntry {
    info: TunnelInfo,
    /// Accept loop; owns the listener
    task: JoinHandle<()>,
}

pub struct TunnelPool {
    registry: RegistryHandle,
    defaults: TunnelDefaults,
    tunnels: RwLock<HashMap<String, PoolEntry>>,
}

impl TunnelPool {
    pub fn new(registry: RegistryHandle, defaults: TunnelDefaults) -> Self {
        Self {
            registry,
            defaults,
            tunnels: RwLock::new(HashMap::new()),
        }
    }

    /// Bind `from` and start forwarding its connections to `to`.
    ///
    /// Port 0 binds an ephemeral port; the returned entry carries the
    /// address actually bound.
    pub async fn create(&self, from: &str, to: &str) -> Result<TunnelInfo, PoolError> {
        let (host, port) = split_host_port(from)?;
        let mut builder = ClientConfig::builder()
            .remote_url(to)
            .local_host(host)
            .local_port(port)
            .insecure(self.defaults.insecure)
            .connect_timeout(self.defaults.connect_timeout);
        for der in &self.defaults.root_certs {
            builder = builder.root_cert(der.clone());
        }
        let config = builder.build().map_err(PoolError::InvalidTunnel)?;

        let mut tunnels = self.tunnels.write().await;
        let client = TunnelClient::bind(config, self.registry.clone()).await?;
        let key = client.local_addr()?.to_string();
        let client = client.with_session_prefix(session_prefix(&key));

        let info = TunnelInfo {
            from: key.clone(),
            to: to.to_string(),
            created_at: Utc::now(),
        };
        info!(from = %info.from, to = %info.to, "CREATE");

        let task = tokio::spawn(async move {
            if let Err(e) = client.run().await {
                error!("Pool tunnel stopped: {}", e);
            }
        });
        if let Some(stale) = tunnels.insert(key, PoolEntry { info: info.clone(), task }) {
            stale.task.abort();
        }
        Ok(info)
    }

    pub async fn list(&self) -> Vec<TunnelInfo> {
        let mut tunnels: Vec<TunnelInfo> = self
            .tunnels
            .read()
            .await
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        tunnels.sort_by(|a, b| a.from.cmp(&b.from));
        tunnels
    }

    /// Stop accepting on `key` and close the sessions it opened.
    ///
    /// Returns `None` when no such entry exists.
    pub async fn remove(&self, key: &str) -> Result<Option<RemovedTunnel>, PoolError> {
        let Some(entry) = self.tunnels.write().await.remove(key) else {
            return Ok(None);
        };
        entry.task.abort();
        info!(from = %entry.info.from, to = %entry.info.to, "REMOVE");

        let closed_sessions = self
            .registry
            .force_close_by_prefix(&session_prefix(key))
            .await?;
        Ok(Some(RemovedTunnel {
            tunnel: entry.info,
            closed_sessions,
        }))
    }

    /// Abort every accept loop, returning how many were running
    pub async fn close_all(&self) -> usize {
        let entries: Vec<(String, PoolEntry)> = self.tunnels.write().await.drain().collect();
        for (key, entry) in &entries {
            entry.task.abort();
            if let Err(e) = self.registry.force_close_by_prefix(&session_prefix(key)).await {
                warn!("Could not close sessions of {}: {}", key, e);
            }
        }
        entries.len()
    }
}

fn session_prefix(key: &str) -> String {
    format!("{}/", key)
}

/// Split `host:port`, accepting a bracketed IPv6 host
fn split_host_port(from: &str) -> Result<(String, u16), PoolError> {
    let invalid = || PoolError::InvalidAddress(from.to_string());
    let (host, port) = from.rsplit_once(':').ok_or_else(invalid)?;
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsrx_control::{BridgeConfig, ConnectionRegistry};

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("127.0.0.1:8080").unwrap(),
            ("127.0.0.1".to_string(), 8080)
        );
        assert_eq!(split_host_port("[::1]:0").unwrap(), ("::1".to_string(), 0));
        assert_eq!(
            split_host_port("localhost:22").unwrap(),
            ("localhost".to_string(), 22)
        );
        assert!(split_host_port("127.0.0.1").is_err());
        assert!(split_host_port(":80").is_err());
        assert!(split_host_port("host:99999").is_err());
    }

    #[tokio::test]
    async fn test_create_list_remove() {
        let (registry, _task) = ConnectionRegistry::spawn(BridgeConfig::default());
        let pool = TunnelPool::new(registry, TunnelDefaults::default());

        let created = pool
            .create("127.0.0.1:0", "ws://127.0.0.1:1/traffic/abc")
            .await
            .unwrap();
        assert!(!created.from.ends_with(":0"));
        assert_eq!(pool.list().await, vec![created.clone()]);

        let removed = pool.remove(&created.from).await.unwrap().unwrap();
        assert_eq!(removed.tunnel, created);
        assert!(removed.closed_sessions.is_empty());
        assert!(pool.list().await.is_empty());
        assert!(pool.remove(&created.from).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_entries_are_rejected() {
        let (registry, _task) = ConnectionRegistry::spawn(BridgeConfig::default());
        let pool = TunnelPool::new(registry, TunnelDefaults::default());

        assert!(matches!(
            pool.create("nowhere", "ws://127.0.0.1:1/traffic/abc").await,
            Err(PoolError::InvalidAddress(_))
        ));
        assert!(matches!(
            pool.create("127.0.0.1:0", "http://127.0.0.1:1/traffic/abc").await,
            Err(PoolError::InvalidTunnel(_))
        ));
        assert!(pool.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_stops_every_entry() {
        let (registry, _task) = ConnectionRegistry::spawn(BridgeConfig::default());
        let pool = TunnelPool::new(registry, TunnelDefaults::default());

        for _ in 0..2 {
            pool.create("127.0.0.1:0", "ws://127.0.0.1:1/traffic/abc")
                .await
                .unwrap();
        }
        assert_eq!(pool.close_all().await, 2);
        assert!(pool.list().await.is_empty());
    }
}
