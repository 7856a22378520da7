//! # Initialization
//!
//! Controller startup: rustls provider, tracing, metrics, HTTP server,
//! Kubernetes client and the shared reconciler context.

use crate::config::{ControllerConfig, ServerConfig};
use crate::controller::clock::SystemClock;
use crate::controller::reconciler::Context as ReconcilerContext;
use crate::controller::server::{start_server, ServerState};
use crate::controller::store::{KubeStore, RateLimiter};
use crate::crd::{CertificateRequest, ClusterOriginIssuer, OriginIssuer};
use crate::observability;
use crate::provider::origin_ca::OriginCaSignerFactory;
use anyhow::{Context, Result};
use kube::{
    api::{Api, ListParams},
    Client,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Components needed to run the controllers
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Shared reconciler context
    pub context: Arc<ReconcilerContext>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("context", &self.context)
            .field("server_state", &self.server_state)
            .finish_non_exhaustive()
    }
}

/// Install the tracing subscriber
///
/// `RUST_LOG` overrides the default `origin_ca_issuer=info` filter.
pub fn init_tracing() {
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "origin_ca_issuer=info".into()),
        )
        .try_init()
    {
        warn!("Tracing subscriber already initialized: {}", e);
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - tracing subscriber setup
/// - metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - CRD availability check
/// - reconciler context setup
pub async fn initialize(config: &ControllerConfig) -> Result<InitializationResult> {
    // Must run before anything opens a TLS connection
    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    init_tracing();
    if !provider_installed {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting Origin CA issuer v{}", env!("CARGO_PKG_VERSION"));
    info!(
        cluster_resource_namespace = %config.cluster_resource_namespace,
        disable_approved_check = config.disable_approved_check,
        ca_endpoint = %config.ca_endpoint,
        workers = config.workers,
        "Controller configuration"
    );

    observability::metrics::register_metrics()?;

    let server_config = ServerConfig::from_env();
    let server_state = Arc::new(ServerState::new());
    let server_state_clone = Arc::clone(&server_state);
    let server_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {:#}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    check_crds(&client).await;

    let store = KubeStore::new(
        client.clone(),
        RateLimiter::new(config.kube_api_qps, config.kube_api_burst),
        config.store_timeout(),
    );
    let context = Arc::new(ReconcilerContext {
        store: Arc::new(store),
        signers: Arc::new(OriginCaSignerFactory::new(config.ca_client_config())),
        clock: Arc::new(SystemClock),
        settings: config.reconciler_settings(),
    });

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        context,
        server_state,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
    config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let start_time = tokio::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Check that the watched resource types can be listed
///
/// A failure is logged, not fatal: the watches keep retrying until the CRDs
/// are installed or RBAC is fixed.
async fn check_crds(client: &Client) {
    let first_page = ListParams::default().limit(1);
    let checks = [
        (
            "OriginIssuer",
            Api::<OriginIssuer>::all(client.clone())
                .list(&first_page)
                .await
                .map(|list| list.items.len()),
        ),
        (
            "ClusterOriginIssuer",
            Api::<ClusterOriginIssuer>::all(client.clone())
                .list(&first_page)
                .await
                .map(|list| list.items.len()),
        ),
        (
            "CertificateRequest",
            Api::<CertificateRequest>::all(client.clone())
                .list(&first_page)
                .await
                .map(|list| list.items.len()),
        ),
    ];

    for (kind, result) in checks {
        match result {
            Ok(_) => info!("CRD {} is queryable", kind),
            Err(e) => {
                error!("CRD {} is not queryable; {}. Is the CRD installed?", kind, e);
                error!("Installation: crdgen | kubectl apply -f -");
                warn!(kind, error = %e, "Continuing despite CRD queryability check failure - watches will retry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_server_ready_times_out() {
        let state = ServerState::new();
        let handle = tokio::spawn(std::future::pending::<()>());
        let config = ServerConfig {
            metrics_port: 0,
            startup_timeout_secs: 1,
            poll_interval_ms: 100,
        };

        let error = wait_for_server_ready(&state, &handle, &config)
            .await
            .unwrap_err();

        assert!(error.to_string().contains("within 1 seconds"));
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_server_ready_returns_once_ready() {
        let state = ServerState::new();
        state.is_ready.store(true, Ordering::Relaxed);
        let handle = tokio::spawn(std::future::pending::<()>());

        wait_for_server_ready(&state, &handle, &ServerConfig::default())
            .await
            .unwrap();
        handle.abort();
    }
}
