//! # proxitag-server
//!
//! HTTP server for the proxitag BLE proximity tagging engine.
//!
//! This binary provides:
//! - REST API for proximity state, devices, session control and identifiers
//! - Server-Sent Events stream of proximity changes
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development with a simulated radio
//! cargo run --package proxitag-server --features mock-bluetooth
//!
//! # Production (BlueZ)
//! PROXITAG_CONFIG=/etc/proxitag/config.toml ./proxitag-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::time::Duration;

use anyhow::Context;
use proxitag_core::Config;
use proxitag_server::state::{AppState, SharedState};
use proxitag_server::{create_app, logging, start_session};
use tokio::net::TcpListener;
use tracing::{info, warn};

const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    logging::init(&config.server)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting proxitag-server");

    let addr = config.bind_address()?;
    let (session, worker) = start_session(&config).await?;
    let state = AppState::new(session, config);
    let app = create_app(state.clone());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(state.clone()))
        .await?;

    // The worker exits once every session handle is gone.
    drop(state);
    match tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, worker).await {
        Ok(Ok(())) => info!("Session worker stopped"),
        Ok(Err(e)) => warn!(error = %e, "Session worker panicked"),
        Err(_) => warn!("Session worker did not stop in time"),
    }

    Ok(())
}

async fn shutdown(state: SharedState) {
    wait_for_signal().await;
    info!("Shutdown requested");

    state.begin_shutdown();
    if let Err(e) = state.session.stop().await {
        warn!(error = %e, "Failed to stop session");
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
