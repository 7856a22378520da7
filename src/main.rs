//! # Origin CA Issuer
//!
//! Controller binary. Parses flags, initializes the runtime and runs the
//! controllers until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use origin_ca_issuer::config::ControllerConfig;
use origin_ca_issuer::runtime::{initialize, run_watch_loop};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ControllerConfig::parse();
    config.validate().context("Invalid configuration")?;

    let init_result = initialize(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping controllers");
        // receivers may already be gone when the watch loop exited on its own
        let _ = shutdown_tx.send(true);
    });

    run_watch_loop(
        init_result.client,
        init_result.context,
        config.workers,
        shutdown_rx,
    )
    .await?;

    info!("Origin CA issuer stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
