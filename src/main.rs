//! Multi-room TCP Chat Server - Entry Point
//!
//! Parses the port, opens the history store, binds the listener and runs
//! until Ctrl+C or SIGTERM.

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use multiroom_chat::config::DEFAULT_PORT;
use multiroom_chat::{ChatServer, Listener, ServerConfig, ShutdownHandle};

/// Multi-room chat server
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Set server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=multiroom_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("multiroom_chat=info")),
        )
        .init();

    let config = ServerConfig {
        port: cli.port,
        ..ServerConfig::default()
    };
    info!("Chat Server starting on port {}...", config.port);

    let server = Arc::new(ChatServer::open(&config.history));
    let listener = Listener::bind(config, server).await?;
    info!("Chat Server is running on {}", listener.local_addr()?);
    info!("Press Ctrl+C to stop the server");
    log_stats("startup", &serde_json::to_string(&listener.stats())?);

    tokio::spawn(wait_for_signal(listener.shutdown_handle()));

    let stats = listener.run().await;
    log_stats("shutdown", &serde_json::to_string(&stats)?);

    info!("Server stopped");
    Ok(())
}

fn log_stats(phase: &str, json: &str) {
    info!(phase, stats = %json, "Server statistics");
}

/// Trigger shutdown on Ctrl+C, or SIGTERM on unix
async fn wait_for_signal(shutdown: ShutdownHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    shutdown.trigger();
}
