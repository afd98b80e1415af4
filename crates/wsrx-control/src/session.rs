//! Session records and session keys

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use wsrx_transport::TransportStream;

/// Stream handle shared between the registry and the bridge
pub type SharedStream = Arc<dyn TransportStream>;

/// Separator between the parts of a server session key
pub const SESSION_KEY_SEPARATOR: char = '-';

/// Which entry point created a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// Descriptive data kept next to a live session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub role: Role,
    /// Remote address of the accepted or dialing peer
    pub peer: String,
    /// Remote tunnel URL (client) or backend address (server)
    pub target: String,
    pub created_at: DateTime<Utc>,
}

impl SessionMeta {
    pub fn new(role: Role, peer: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            role,
            peer: peer.into(),
            target: target.into(),
            created_at: Utc::now(),
        }
    }
}

/// A TCP connection paired with a tunnel connection
///
/// Once handed to the registry, the registry is the only party that closes
/// the two streams.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub tcp: SharedStream,
    pub tunnel: SharedStream,
    pub meta: SessionMeta,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        tcp: SharedStream,
        tunnel: SharedStream,
        meta: SessionMeta,
    ) -> Self {
        Self {
            id: id.into(),
            tcp,
            tunnel,
            meta,
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            meta: self.meta.clone(),
        }
    }

    /// Close both streams, tolerating streams that are already closed
    pub(crate) async fn close(&self) {
        let (tcp, tunnel) = tokio::join!(self.tcp.close(), self.tunnel.close());
        if let Err(e) = tcp {
            debug!(session_id = %self.id, "TCP close failed: {}", e);
        }
        if let Err(e) = tunnel {
            debug!(session_id = %self.id, "Tunnel close failed: {}", e);
        }
    }
}

/// Snapshot of a live session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(flatten)]
    pub meta: SessionMeta,
}

/// Key of a server-side session: `{mapping-id}-{client}-{address}`
///
/// `client` is the socket address (`ip:port`) of the tunnel peer, so two
/// concurrent connections from one host get distinct keys. Keys stay
/// best-effort unique: nothing stops a mapping id from containing `-`.
pub fn server_session_key(mapping_id: &str, client: &str, address: &str) -> String {
    format!(
        "{mapping_id}{sep}{client}{sep}{address}",
        sep = SESSION_KEY_SEPARATOR
    )
}

/// Prefix matching every server session of one mapping
pub fn mapping_prefix(mapping_id: &str) -> String {
    format!("{}{}", mapping_id, SESSION_KEY_SEPARATOR)
}
