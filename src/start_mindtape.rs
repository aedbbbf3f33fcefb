//! Startup helpers for the MindTape sync server.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use crate::server::{self, AppState};
use crate::sync::core::config::SyncConfig;

/// Run the server (used by the `mindtape-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting MindTape sync v{}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve()) {
        tracing::error!("Server error: {e:#}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Load configuration, start the worker pool and serve until Ctrl-C.
///
/// The queue is stopped after the server has drained its connections.
///
/// # Errors
/// Returns an error if configuration, service construction or the server fails.
pub async fn serve() -> anyhow::Result<()> {
    let config = SyncConfig::from_env().context("failed to load configuration")?;
    let state = AppState::from_config(&config)
        .await
        .context("failed to build services")?;

    let queue = Arc::clone(state.orchestrator.queue());
    queue.start(config.queue.workers).await;

    let result = server::run_server_with_shutdown(state, config.server.port, shutdown_signal())
        .await
        .context("server stopped with an error");

    queue.stop().await;
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
