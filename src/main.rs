//! parley - multi-room text chat server
//!
//! Listens on one or more TCP ports; every connection shares the same rooms.

use clap::Parser;
use parley_server::{Config, RoomRegistry, Server, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Multi-room text chat server")]
#[command(version)]
struct Args {
    /// Ports to listen on (overrides the configuration)
    ports: Vec<u16>,

    /// YAML configuration file
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(c) => {
                tracing::info!("Loaded config from {}", path.display());
                c
            }
            Err(e) => {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
        },
        None => {
            tracing::info!("Using default configuration");
            Config::default()
        }
    };
    config.apply_env_overrides();

    if !args.ports.is_empty() {
        config.network.ports = args.ports;
    }
    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    tracing::info!("Starting parley server");
    tracing::info!("  Host: {}", config.network.host);
    tracing::info!("  Ports: {:?}", config.network.ports);
    tracing::info!("  Default room: '{}'", config.rooms.default_room);
    tracing::info!("  History per room: {}", config.rooms.history_capacity);

    let registry = Arc::new(RoomRegistry::new(&config.rooms));
    let server = Arc::new(
        Server::bind(ServerConfig::from_network(&config.network), registry).await?,
    );

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
