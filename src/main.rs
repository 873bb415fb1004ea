//! Brew Cache - HTTP admin server
//!
//! Hosts the package cache, its cleanup task and the warm-up pool behind
//! a small administrative API.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use brew_cache::{create_router, spawn_cleanup_task, AppState, Config, PrePopulator};

/// Main entry point for the package cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the store, gateway and pre-populator
/// 4. Start background TTL cleanup task
/// 5. Warm the first installed packages in the background
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brew_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Brew Cache Server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: max_entries={}, port={}, cleanup_interval={}s, warmup_concurrency={}",
        config.max_entries, config.server_port, config.cleanup_interval, config.warmup_concurrency
    );

    let state = AppState::from_config(&config);
    info!("Cache gateway initialized");

    let cleanup_handle = spawn_cleanup_task(state.gateway.store().clone(), config.cleanup_interval);
    info!("Background cleanup task started");

    if config.warmup_startup_limit > 0 {
        // Detached; progress is logged by the pool
        if let Err(e) = state
            .populator
            .spawn_installed(Some(config.warmup_startup_limit), config.warmup_concurrency)
        {
            warn!("Startup pre-population not started: {}", e);
        }
    }

    let populator = state.populator.clone();
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cleanup_handle, populator))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown, stops the warm-up pool and aborts the cleanup task.
async fn shutdown_signal(cleanup_handle: tokio::task::JoinHandle<()>, populator: PrePopulator) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    populator.shutdown();
    cleanup_handle.abort();
    warn!("Cleanup task aborted");
}
