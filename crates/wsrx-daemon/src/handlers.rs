use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};
use wsrx_api::models::ErrorResponse;
use wsrx_client::ClientError;

use crate::pool::{PoolError, RemovedTunnel, TunnelInfo};
use crate::DaemonState;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (status, Json(ErrorResponse::new(error, code)))
}

fn pool_error(e: PoolError) -> ApiError {
    match e {
        PoolError::InvalidAddress(_)
        | PoolError::InvalidTunnel(_)
        | PoolError::Client(ClientError::Config(_)) => {
            api_error(StatusCode::BAD_REQUEST, e.to_string(), "INVALID_TUNNEL")
        }
        PoolError::Client(ClientError::Bind { ref source, .. })
            if source.kind() == std::io::ErrorKind::AddrInUse =>
        {
            api_error(StatusCode::CONFLICT, e.to_string(), "ADDRESS_IN_USE")
        }
        PoolError::Registry(_) => {
            error!("Connection registry is not running");
            api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Connection registry is not running",
                "REGISTRY_UNAVAILABLE",
            )
        }
        e => {
            error!("Failed to start pool tunnel: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "TUNNEL_FAILED")
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTunnelRequest {
    /// Local `host:port` to listen on, port 0 picks one
    pub from: String,
    /// Remote `ws://` or `wss://` tunnel URL
    pub to: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CloseTunnelRequest {
    /// `from` of the entry, as returned on creation
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TunnelList {
    pub tunnels: Vec<TunnelInfo>,
    pub total: usize,
}

/// `GET /pool`
pub async fn list_tunnels(State(state): State<Arc<DaemonState>>) -> Json<TunnelList> {
    let tunnels = state.pool.list().await;
    let total = tunnels.len();
    Json(TunnelList { tunnels, total })
}

/// `POST /pool`
pub async fn create_tunnel(
    State(state): State<Arc<DaemonState>>,
    Json(req): Json<CreateTunnelRequest>,
) -> Result<(StatusCode, Json<TunnelInfo>), ApiError> {
    let tunnel = state.pool.create(&req.from, &req.to).await.map_err(|e| {
        warn!("Rejected pool entry {} -> {}: {}", req.from, req.to, e);
        pool_error(e)
    })?;
    Ok((StatusCode::CREATED, Json(tunnel)))
}

/// `DELETE /pool`
pub async fn close_tunnel(
    State(state): State<Arc<DaemonState>>,
    Json(req): Json<CloseTunnelRequest>,
) -> Result<Json<RemovedTunnel>, ApiError> {
    match state.pool.remove(&req.key).await.map_err(pool_error)? {
        Some(removed) => Ok(Json(removed)),
        None => {
            debug!("Pool entry does not exist: {}", req.key);
            Err(api_error(
                StatusCode::NOT_FOUND,
                format!("Tunnel '{}' not found", req.key),
                "TUNNEL_NOT_FOUND",
            ))
        }
    }
}

/// `GET /heartbeat`
pub async fn heartbeat(State(state): State<Arc<DaemonState>>) -> StatusCode {
    state.heartbeat.beat().await;
    StatusCode::OK
}
