use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use wsrx_control::SessionInfo;
use wsrx_relay_db::Mapping;

/// Tunnel id bound to a backend address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MappingEntry {
    /// Tunnel id, used as `/traffic/{id}`
    #[schema(example = "abc")]
    pub id: String,
    /// Backend TCP address
    #[schema(example = "127.0.0.1:9000")]
    pub address: String,
}

impl From<Mapping> for MappingEntry {
    fn from(mapping: Mapping) -> Self {
        Self {
            id: mapping.id,
            address: mapping.address,
        }
    }
}

/// Create or overwrite a mapping
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PutMappingRequest {
    #[schema(example = "abc")]
    pub id: String,
    #[schema(example = "127.0.0.1:9000")]
    pub address: String,
}

/// List of mappings
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MappingList {
    pub mappings: Vec<MappingEntry>,
    pub total: usize,
}

/// Result of deleting a mapping
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeleteMappingResponse {
    /// Deleted mapping id
    pub id: String,
    /// Sessions of this mapping that were force closed
    pub closed_sessions: Vec<String>,
}

/// Live tunnel session
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionEntry {
    /// Session key
    pub id: String,
    /// `client` or `server`
    pub role: String,
    /// Remote address of the peer
    pub peer: String,
    /// Backend address or tunnel URL
    pub target: String,
    /// When the session was registered
    pub created_at: DateTime<Utc>,
}

impl From<SessionInfo> for SessionEntry {
    fn from(info: SessionInfo) -> Self {
        Self {
            id: info.id,
            role: info.meta.role.to_string(),
            peer: info.meta.peer,
            target: info.meta.target,
            created_at: info.meta.created_at,
        }
    }
}

/// List of live sessions
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionList {
    pub sessions: Vec<SessionEntry>,
    pub total: usize,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// Live sessions count
    pub active_sessions: usize,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: &str) -> Self {
        Self {
            error: error.into(),
            code: Some(code.to_string()),
        }
    }
}
