use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use wsrx_control::{mapping_prefix, server_session_key, Role, Session, SessionMeta, SharedStream};
use wsrx_relay_db::{Mapping, StoreError};
use wsrx_transport::{connect_tcp, IoStream, TransportStream};
use wsrx_transport_websocket::ServerWebSocket;

use crate::models::*;
use crate::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (status, Json(ErrorResponse::new(error, code)))
}

fn mapping_not_found(id: &str) -> ApiError {
    api_error(
        StatusCode::NOT_FOUND,
        format!("Mapping '{}' not found", id),
        "MAPPING_NOT_FOUND",
    )
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::InvalidMapping(msg) => {
            api_error(StatusCode::BAD_REQUEST, msg, "INVALID_MAPPING")
        }
        StoreError::Database(e) => {
            error!("Mapping store failure: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Mapping store unavailable",
                "STORE_ERROR",
            )
        }
    }
}

fn registry_unavailable() -> ApiError {
    error!("Connection registry is not running");
    api_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "Connection registry is not running",
        "REGISTRY_UNAVAILABLE",
    )
}

/// Open a tunnel to the backend of a mapping
///
/// The mapping is resolved before the upgrade, so an unknown id is a plain
/// HTTP 404 rather than a WebSocket that closes right away.
#[utoipa::path(
    get,
    path = "/traffic/{id}",
    params(("id" = String, Path, description = "Mapping id")),
    responses(
        (status = 101, description = "Switching to WebSocket, bytes are relayed to the backend"),
        (status = 404, description = "Mapping not found", body = ErrorResponse)
    ),
    tag = "traffic"
)]
pub async fn traffic(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let address = match state.store.resolve(&id).await {
        Ok(Some(address)) => address,
        Ok(None) => {
            debug!("Rejecting tunnel from {} to unknown mapping {}", client, id);
            return mapping_not_found(&id).into_response();
        }
        Err(e) => return store_error(e).into_response(),
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    upgrade
        .on_upgrade(move |socket| attach_tunnel(state, id, client, address, socket))
        .into_response()
}

/// Dial the backend for an upgraded tunnel and hand the pair to the registry
async fn attach_tunnel(
    state: Arc<AppState>,
    mapping_id: String,
    client: SocketAddr,
    address: String,
    socket: WebSocket,
) {
    let peer = client.to_string();
    let tunnel: SharedStream = Arc::new(ServerWebSocket::new(
        socket,
        peer.clone(),
        state.max_frame_size,
    ));

    let tcp = match connect_tcp(&address, state.connect_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(mapping_id = %mapping_id, peer = %peer, "Backend {} unreachable: {}", address, e);
            if let Err(e) = tunnel.close().await {
                debug!("Closing tunnel from {} failed: {}", peer, e);
            }
            return;
        }
    };
    let tcp: SharedStream = Arc::new(IoStream::tcp(tcp));

    let key = server_session_key(&mapping_id, &peer, &address);
    let meta = SessionMeta::new(Role::Server, peer, address);
    if let Err(e) = state.registry.register(Session::new(key, tcp, tunnel, meta)).await {
        warn!(mapping_id = %mapping_id, "Tunnel not registered: {}", e);
    }
}

/// Check whether a mapping exists without opening a tunnel
#[utoipa::path(
    options,
    path = "/traffic/{id}",
    params(("id" = String, Path, description = "Mapping id")),
    responses(
        (status = 200, description = "Mapping exists"),
        (status = 404, description = "Mapping not found", body = ErrorResponse)
    ),
    tag = "traffic"
)]
pub async fn check_traffic(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.store.resolve(&id).await.map_err(store_error)? {
        Some(_) => Ok(StatusCode::OK),
        None => Err(mapping_not_found(&id)),
    }
}

/// List all mappings
#[utoipa::path(
    get,
    path = "/pool",
    responses(
        (status = 200, description = "List of mappings", body = MappingList),
        (status = 401, description = "Missing or invalid admin token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "mappings"
)]
pub async fn list_mappings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MappingList>, ApiError> {
    let mappings: Vec<MappingEntry> = state
        .store
        .list()
        .await
        .map_err(store_error)?
        .into_iter()
        .map(MappingEntry::from)
        .collect();
    let total = mappings.len();

    Ok(Json(MappingList { mappings, total }))
}

/// Get a mapping by id
#[utoipa::path(
    get,
    path = "/pool/{id}",
    params(("id" = String, Path, description = "Mapping id")),
    responses(
        (status = 200, description = "Mapping found", body = MappingEntry),
        (status = 401, description = "Missing or invalid admin token", body = ErrorResponse),
        (status = 404, description = "Mapping not found", body = ErrorResponse)
    ),
    tag = "mappings"
)]
pub async fn get_mapping(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MappingEntry>, ApiError> {
    match state.store.resolve(&id).await.map_err(store_error)? {
        Some(address) => Ok(Json(MappingEntry { id, address })),
        None => Err(mapping_not_found(&id)),
    }
}

/// Create or overwrite a mapping
///
/// Sessions already open keep their backend; only new tunnels use the new
/// address.
#[utoipa::path(
    post,
    path = "/pool",
    request_body = PutMappingRequest,
    responses(
        (status = 201, description = "Mapping stored", body = MappingEntry),
        (status = 400, description = "Invalid id or address", body = ErrorResponse),
        (status = 401, description = "Missing or invalid admin token", body = ErrorResponse)
    ),
    tag = "mappings"
)]
pub async fn put_mapping(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PutMappingRequest>,
) -> Result<(StatusCode, Json<MappingEntry>), ApiError> {
    let mapping = Mapping::new(req.id, req.address);
    mapping.validate().map_err(store_error)?;

    state
        .store
        .put(&mapping.id, &mapping.address)
        .await
        .map_err(store_error)?;

    info!("Mapping {} -> {}", mapping.id, mapping.address);
    Ok((StatusCode::CREATED, Json(MappingEntry::from(mapping))))
}

/// Delete a mapping and close its live sessions
#[utoipa::path(
    delete,
    path = "/pool/{id}",
    params(("id" = String, Path, description = "Mapping id")),
    responses(
        (status = 200, description = "Mapping deleted", body = DeleteMappingResponse),
        (status = 401, description = "Missing or invalid admin token", body = ErrorResponse),
        (status = 404, description = "Mapping not found", body = ErrorResponse)
    ),
    tag = "mappings"
)]
pub async fn delete_mapping(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteMappingResponse>, ApiError> {
    let existed = state.store.delete(&id).await.map_err(store_error)?;

    // Sessions may outlive their mapping row, close them either way
    let closed_sessions = state
        .registry
        .force_close_by_prefix(&mapping_prefix(&id))
        .await
        .map_err(|_| registry_unavailable())?;

    if !existed && closed_sessions.is_empty() {
        return Err(mapping_not_found(&id));
    }

    info!(
        "Deleted mapping {}, closed {} sessions",
        id,
        closed_sessions.len()
    );
    Ok(Json(DeleteMappingResponse {
        id,
        closed_sessions,
    }))
}

/// List live sessions
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "Live sessions", body = SessionList),
        (status = 401, description = "Missing or invalid admin token", body = ErrorResponse),
        (status = 503, description = "Registry not running", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionList>, ApiError> {
    let sessions: Vec<SessionEntry> = state
        .registry
        .list()
        .await
        .map_err(|_| registry_unavailable())?
        .into_iter()
        .map(SessionEntry::from)
        .collect();
    let total = sessions.len();

    Ok(Json(SessionList { sessions, total }))
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Registry not running", body = ErrorResponse)
    ),
    tag = "system"
)]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, ApiError> {
    let sessions = state
        .registry
        .list()
        .await
        .map_err(|_| registry_unavailable())?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_sessions: sessions.len(),
    }))
}
