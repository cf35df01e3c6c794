//! # proxitag-server
//!
//! HTTP server library for proxitag.
//!
//! This library provides the API handlers, state management and process
//! wiring used by the `proxitag-server` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;

use axum::Router;
use proxitag_core::{
    event_channel, Config, EventSink, IdentityStore, ProximityStore, Radio, SessionController,
    SessionHandle, SessionSettings,
};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod api;
pub mod logging;
pub mod state;

use crate::state::SharedState;

/// Build the full application: API routes, Swagger UI at `/docs`, request
/// tracing and CORS.
pub fn create_app(state: SharedState) -> Router {
    api::create_router(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", api::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Create the radio backend, load the identity and spawn the session worker.
///
/// # Errors
///
/// Returns an error if the radio backend cannot be opened or the identity
/// path cannot be resolved.
pub async fn start_session(config: &Config) -> anyhow::Result<(SessionHandle, JoinHandle<()>)> {
    let (sink, events) = event_channel();
    let radio = build_radio(sink, config).await?;

    let identity_path = config.identity.resolved_path()?;
    info!(path = %identity_path.display(), "Using identity file");

    Ok(SessionController::spawn(
        radio,
        events,
        ProximityStore::new(),
        IdentityStore::new(identity_path),
        SessionSettings::from(&config.radio),
    ))
}

#[cfg(feature = "mock-bluetooth")]
#[allow(clippy::unused_async)]
async fn build_radio(sink: EventSink, config: &Config) -> anyhow::Result<Arc<dyn Radio>> {
    use proxitag_core::{MockDevice, MockRadio};

    tracing::warn!("Using simulated Bluetooth radio");
    let radio = Arc::new(MockRadio::new(sink));
    let _simulation = radio.spawn_simulation(
        vec![
            MockDevice::new("02:00:00:00:10:93", "BLE-1093", -45),
            MockDevice::new("02:00:00:00:77:01", "BLE-7701", -72),
        ],
        config.radio.scan_params().batch_window,
    );
    Ok(radio)
}

#[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
async fn build_radio(sink: EventSink, config: &Config) -> anyhow::Result<Arc<dyn Radio>> {
    let radio = proxitag_core::BluezRadio::new(sink, config.radio.adapter.as_deref()).await?;
    Ok(Arc::new(radio))
}

#[cfg(not(any(feature = "bluetooth", feature = "mock-bluetooth")))]
#[allow(clippy::unused_async)]
async fn build_radio(_sink: EventSink, _config: &Config) -> anyhow::Result<Arc<dyn Radio>> {
    anyhow::bail!("built without a radio backend; enable `bluetooth` or `mock-bluetooth`")
}
