//! Client-side tunnel pool managed over HTTP
//!
//! - `GET /pool`: list entries
//! - `POST /pool`: `{"from": "127.0.0.1:0", "to": "wss://.../traffic/id"}`
//! - `DELETE /pool`: `{"key": "<from>"}`, stops the listener and its sessions
//! - `GET /heartbeat`: keeps a daemon started with a heartbeat timeout alive
//!
//! Every route sits behind the optional bearer secret. Browsers may only
//! call the API from the configured origins.

pub mod handlers;
pub mod heartbeat;
pub mod pool;

pub use heartbeat::Heartbeat;
pub use pool::{PoolError, RemovedTunnel, TunnelDefaults, TunnelInfo, TunnelPool};

use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Router,
};
use std::future::IntoFuture;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use wsrx_api::middleware::{require_admin_token, AdminAuth};
use wsrx_control::RegistryHandle;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Management API address
    pub bind_addr: SocketAddr,
    /// Bearer token for every route; `None` leaves the API open
    pub secret: Option<String>,
    /// Origins allowed to call the API from a browser; `*` allows any
    pub allowed_origins: Vec<String>,
    /// Stop when no heartbeat arrives for this long
    pub heartbeat_timeout: Option<Duration>,
    pub tunnel: TunnelDefaults,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            secret: None,
            allowed_origins: Vec::new(),
            heartbeat_timeout: None,
            tunnel: TunnelDefaults::default(),
        }
    }
}

/// State shared across handlers
pub struct DaemonState {
    pub pool: TunnelPool,
    pub heartbeat: Heartbeat,
}

pub struct Daemon {
    config: DaemonConfig,
    state: Arc<DaemonState>,
}

impl Daemon {
    pub fn new(config: DaemonConfig, registry: RegistryHandle) -> Self {
        let state = Arc::new(DaemonState {
            pool: TunnelPool::new(registry, config.tunnel.clone()),
            heartbeat: Heartbeat::new(),
        });
        Self { config, state }
    }

    pub fn state(&self) -> Arc<DaemonState> {
        self.state.clone()
    }

    /// Build the router with all routes
    ///
    /// Fails when an allowed origin is not a valid header value.
    pub fn build_router(&self) -> anyhow::Result<Router> {
        let auth = Arc::new(AdminAuth::new(self.config.secret.clone()));

        let mut router = Router::new()
            .route(
                "/pool",
                get(handlers::list_tunnels)
                    .post(handlers::create_tunnel)
                    .delete(handlers::close_tunnel),
            )
            .route("/heartbeat", get(handlers::heartbeat))
            .with_state(self.state.clone())
            .layer(axum_middleware::from_fn_with_state(auth, require_admin_token))
            .layer(TraceLayer::new_for_http());

        // Outermost, so preflight requests are answered before auth
        if let Some(origins) = self.allowed_origins()? {
            router = router.layer(
                CorsLayer::new()
                    .allow_methods([Method::GET, Method::POST, Method::DELETE])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                    .allow_origin(origins),
            );
        }

        Ok(router)
    }

    fn allowed_origins(&self) -> anyhow::Result<Option<AllowOrigin>> {
        let origins = &self.config.allowed_origins;
        if origins.is_empty() {
            return Ok(None);
        }
        if origins.iter().any(|origin| origin == "*") {
            return Ok(Some(AllowOrigin::any()));
        }
        let values = origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("Invalid allowed origin '{}'", origin))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Some(AllowOrigin::list(values)))
    }

    /// Bind the configured address and serve
    pub async fn serve(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_with_listener(listener).await
    }

    /// Serve until the listener fails or the heartbeat watchdog fires, then
    /// stop every pool entry
    pub async fn serve_with_listener(self, listener: TcpListener) -> anyhow::Result<()> {
        let router = self.build_router()?;
        let local_addr = listener.local_addr()?;

        info!("WSRX daemon listening on {}", local_addr);
        info!("Manage tunnels at http://{}/pool", local_addr);

        let server = axum::serve(listener, router).into_future();
        match self.config.heartbeat_timeout {
            Some(timeout) => {
                info!("Stopping after {:?} without a heartbeat", timeout);
                tokio::select! {
                    result = server => result.context("Daemon server error")?,
                    _ = self.state.heartbeat.clone().watchdog(timeout) => {}
                }
            }
            None => server.await.context("Daemon server error")?,
        }

        let stopped = self.state.pool.close_all().await;
        info!("Daemon stopped, closed {} pool tunnels", stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsrx_control::{BridgeConfig, ConnectionRegistry};

    fn daemon(origins: &[&str]) -> Daemon {
        let (registry, _task) = ConnectionRegistry::spawn(BridgeConfig::default());
        let config = DaemonConfig {
            allowed_origins: origins.iter().map(|o| o.to_string()).collect(),
            ..Default::default()
        };
        Daemon::new(config, registry)
    }

    #[tokio::test]
    async fn test_allowed_origins() {
        assert!(daemon(&[]).allowed_origins().unwrap().is_none());
        assert!(daemon(&["*"]).allowed_origins().unwrap().is_some());
        assert!(daemon(&["https://ctf.example.com"]).build_router().is_ok());
        assert!(daemon(&["bad\norigin"]).build_router().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:0".parse().unwrap());
        assert!(config.secret.is_none());
        assert!(config.heartbeat_timeout.is_none());
    }
}
