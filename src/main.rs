//! WSRX command line: `wsrx serve`, `wsrx connect <url>` and `wsrx daemon`

mod cli;
mod config;
mod logging;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use wsrx_api::ApiServer;
use wsrx_client::{ClientConfig, TunnelClient};
use wsrx_control::{BridgeConfig, ConnectionRegistry, RegistryHandle};
use wsrx_daemon::{Daemon, DaemonConfig};
use wsrx_relay_db::DbMappingStore;

use crate::cli::{Cli, Command};
use crate::config::{FileConfig, LogSettings, ServerSettings};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file = FileConfig::load_optional(cli.config.as_deref())?;

    let log = LogSettings::resolve(&cli, &file.logger);
    logging::init_logging(&log.level, log.json).context("Failed to initialize logging")?;

    match &cli.command {
        Command::Serve(args) => run_server(ServerSettings::resolve(args, &file.server)?).await,
        Command::Connect(args) => run_client(config::client_config(args, &file.client)?).await,
        Command::Daemon(args) => run_daemon(config::daemon_config(args, &file.daemon)?).await,
    }
}

async fn run_server(settings: ServerSettings) -> Result<()> {
    info!("Starting WSRX server {}", env!("GIT_TAG"));
    info!("Mapping database: {}", settings.database_url);

    let store = DbMappingStore::open(&settings.database_url)
        .await
        .with_context(|| format!("Failed to open mapping database {}", settings.database_url))?;

    let (registry, mut registry_task) = ConnectionRegistry::spawn(settings.bridge);
    let server = ApiServer::new(settings.api, Arc::new(store), registry.clone());

    tokio::select! {
        result = server.serve() => {
            result.context("Server stopped")?;
        }
        result = &mut registry_task => {
            return Err(registry_exited(result));
        }
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
        }
    }

    shutdown_registry(&registry).await;
    Ok(())
}

async fn run_client(config: ClientConfig) -> Result<()> {
    info!("Starting WSRX client {}", env!("GIT_TAG"));

    let (registry, mut registry_task) = ConnectionRegistry::spawn(BridgeConfig::default());
    let client = TunnelClient::bind(config, registry.clone())
        .await
        .context("Failed to start tunnel client")?;
    info!("Local endpoint: {}", client.local_addr()?);

    tokio::select! {
        result = client.run() => {
            result.context("Tunnel client stopped")?;
        }
        result = &mut registry_task => {
            return Err(registry_exited(result));
        }
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
        }
    }

    shutdown_registry(&registry).await;
    Ok(())
}

async fn run_daemon(config: DaemonConfig) -> Result<()> {
    info!("Starting WSRX daemon {}", env!("GIT_TAG"));

    let (registry, mut registry_task) = ConnectionRegistry::spawn(BridgeConfig::default());
    let daemon = Daemon::new(config, registry.clone());
    let state = daemon.state();

    tokio::select! {
        result = daemon.serve() => {
            result.context("Daemon stopped")?;
        }
        result = &mut registry_task => {
            return Err(registry_exited(result));
        }
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
            state.pool.close_all().await;
        }
    }

    shutdown_registry(&registry).await;
    Ok(())
}

/// The registry owns every live session; losing it ends the process
fn registry_exited(result: Result<(), JoinError>) -> anyhow::Error {
    let err = match result {
        Ok(()) => anyhow!("Connection registry stopped unexpectedly"),
        Err(e) => anyhow!("Connection registry panicked: {}", e),
    };
    error!("{}", err);
    err
}

async fn shutdown_registry(registry: &RegistryHandle) {
    match registry.shutdown().await {
        Ok(closed) => info!("Closed {} live sessions", closed),
        Err(e) => warn!("Registry was already gone during shutdown: {}", e),
    }
}
