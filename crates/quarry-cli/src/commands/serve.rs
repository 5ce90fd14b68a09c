//! `quarry serve` - run the MCP server until the carrier stops or the
//! process is interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use quarry_core::config::Transport;
use quarry_core::{DataStore, QuarryConfig};
use quarry_mcp::{DriverConnector, DynamicExecutor, McpServer};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TransportArg {
    Stdio,
    Sse,
    Http,
}

impl From<TransportArg> for Transport {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Stdio => Transport::Stdio,
            TransportArg::Sse => Transport::Sse,
            TransportArg::Http => Transport::Http,
        }
    }
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Carrier. Overrides `mcp.transport`.
    #[arg(long, value_enum)]
    pub transport: Option<TransportArg>,

    /// Listen port for the HTTP carriers. Overrides `mcp.port`.
    #[arg(long)]
    pub port: Option<u16>,
}

/// Apply command-line overrides to the file configuration.
fn apply_overrides(config: &mut QuarryConfig, args: &ServeArgs) {
    if let Some(transport) = args.transport {
        config.mcp.transport = transport.into();
    }
    if let Some(port) = args.port {
        config.mcp.port = port;
    }
}

pub async fn execute(mut config: QuarryConfig, args: ServeArgs) -> Result<()> {
    apply_overrides(&mut config, &args);
    let store = super::open_store(&config)?;
    let store: Arc<dyn DataStore> = store;

    let stats = store.get_stats().await.context("Failed to read store")?;
    info!(
        transport = ?config.mcp.transport,
        auth_mode = ?config.auth.mode,
        servers = stats.servers,
        tools = stats.tools,
        resources = stats.resources,
        "Starting Quarry MCP server"
    );

    let executor = Arc::new(DynamicExecutor::new(
        store.clone(),
        Arc::new(DriverConnector),
        config.executor.clone(),
    ));
    let reaper = executor.spawn_idle_reaper();
    let server = Arc::new(McpServer::new(
        config.mcp.clone(),
        config.auth.clone(),
        store.clone(),
        executor.clone(),
    ));

    let outcome = tokio::select! {
        result = quarry_mcp::serve(server) => result.context("MCP server failed"),
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            Ok(())
        }
    };

    reaper.abort();
    executor.close().await;
    if let Err(e) = store.close().await {
        warn!(error = %e, "Failed to close store");
    }
    info!("Quarry MCP server stopped");
    outcome
}
