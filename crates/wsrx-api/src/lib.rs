//! HTTP surface of the tunnel server
//!
//! - `GET /traffic/{id}`: WebSocket tunnel to the backend of mapping `id`
//!   (unauthenticated, the id is the capability)
//! - `/pool`, `/pool/{id}`, `/sessions`: admin API behind the bearer token
//! - `/health`, `/api-docs/openapi.json`

pub mod handlers;
pub mod middleware;
pub mod models;

use axum::{
    http::{header, Method},
    middleware as axum_middleware,
    routing::get,
    Json, Router,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;

use wsrx_control::RegistryHandle;
use wsrx_relay_db::MappingStore;
use wsrx_transport_websocket::config::DEFAULT_MAX_FRAME_SIZE;

/// Port the server listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 1145;

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<dyn MappingStore>,
    pub registry: RegistryHandle,
    /// Limit for dialing a backend, `None` waits for the OS
    pub connect_timeout: Option<Duration>,
    pub max_frame_size: usize,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "WSRX API",
        version = "0.1.0",
        description = "Tunnel mappings and live sessions of a WSRX server",
        contact(
            name = "WSRX Team",
            email = "team@wsrx.dev"
        )
    ),
    paths(
        handlers::traffic,
        handlers::check_traffic,
        handlers::list_mappings,
        handlers::get_mapping,
        handlers::put_mapping,
        handlers::delete_mapping,
        handlers::list_sessions,
        handlers::health_check,
    ),
    components(
        schemas(
            models::MappingEntry,
            models::PutMappingRequest,
            models::MappingList,
            models::DeleteMappingResponse,
            models::SessionEntry,
            models::SessionList,
            models::HealthResponse,
            models::ErrorResponse,
        )
    ),
    tags(
        (name = "traffic", description = "Tunnel endpoint"),
        (name = "mappings", description = "Mapping management endpoints"),
        (name = "sessions", description = "Live session endpoints"),
        (name = "system", description = "System health and info endpoints")
    )
)]
pub struct ApiDoc;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Address to bind the server
    pub bind_addr: SocketAddr,
    /// Bearer token for the admin API; `None` leaves it open
    pub admin_token: Option<String>,
    /// Limit for dialing a backend
    pub connect_timeout: Option<Duration>,
    /// Largest binary message sent on a tunnel
    pub max_frame_size: usize,
    /// Enable CORS (for browser based admin tools)
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            admin_token: None,
            connect_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            enable_cors: false,
        }
    }
}

/// API Server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(
        config: ApiServerConfig,
        store: Arc<dyn MappingStore>,
        registry: RegistryHandle,
    ) -> Self {
        let state = Arc::new(AppState {
            store,
            registry,
            connect_timeout: config.connect_timeout,
            max_frame_size: config.max_frame_size,
        });

        Self { config, state }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let auth = Arc::new(middleware::AdminAuth::new(self.config.admin_token.clone()));

        // PUBLIC routes (no authentication required)
        let public_router = Router::new()
            .route(
                "/traffic/{id}",
                get(handlers::traffic).options(handlers::check_traffic),
            )
            .route("/health", get(handlers::health_check))
            .route("/api-docs/openapi.json", get(openapi_json))
            .with_state(self.state.clone());

        // PROTECTED routes (admin token, when configured)
        let protected_router = Router::new()
            .route(
                "/pool",
                get(handlers::list_mappings).post(handlers::put_mapping),
            )
            .route(
                "/pool/{id}",
                get(handlers::get_mapping).delete(handlers::delete_mapping),
            )
            .route("/sessions", get(handlers::list_sessions))
            .with_state(self.state.clone())
            .layer(axum_middleware::from_fn_with_state(
                auth,
                middleware::require_admin_token,
            ));

        let mut router = public_router
            .merge(protected_router)
            .layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                    .allow_origin(tower_http::cors::Any),
            );
        }

        router
    }

    /// Bind the configured address and serve until the listener fails
    pub async fn serve(self) -> Result<(), anyhow::Error> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_with_listener(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve_with_listener(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        let router = self.build_router();
        let local_addr = listener.local_addr()?;

        info!("WSRX server listening on {}", local_addr);
        info!("OpenAPI spec: http://{}/api-docs/openapi.json", local_addr);
        if self.config.admin_token.is_none() {
            info!("Admin API is not protected, set an admin token to require one");
        }

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
