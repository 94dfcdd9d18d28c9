//! canopy-server binary entry point.
//!
//! Usage:
//! ```bash
//! canopy-server --config canopy.toml
//! canopy-server --config canopy.toml --bind 127.0.0.1:8675
//! ```

use std::path::PathBuf;

use anyhow::Context;
use canopy_server::{serve, AppState, Config};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "canopy-server")]
#[command(about = "Serve directory trees for manifest-driven sync")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "canopy.toml", env = "CANOPY_CONFIG")]
    config: PathBuf,

    /// Override the configured bind address
    #[arg(long, env = "CANOPY_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canopy_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)?;
    let state = AppState::from_config(&config).context("invalid configuration")?;
    for name in state.mounts.names() {
        if let Some(mount) = state.mounts.get(&name) {
            tracing::info!(
                "Mount {} -> {} (writable: {}, checksum: {})",
                name,
                mount.root.display(),
                mount.writable,
                mount.checksum
            );
        }
    }

    let bind = cli.bind.unwrap_or_else(|| config.server.bind_address.clone());
    serve(state, &bind, shutdown_signal()).await?;

    tracing::info!("canopy-server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Cannot listen for SIGTERM: {}", e);
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

    tracing::info!("Shutdown signal received");
}
