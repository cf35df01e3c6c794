//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `proximity` - Observable proximity state and its event stream
//! - `devices` - Devices heard during the session
//! - `session` - Session start/stop/refresh commands
//! - `identity` - Own and target identifiers
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;

use crate::state::SharedState;

pub mod devices;
pub mod error;
pub mod health;
pub mod identity;
pub mod openapi;
pub mod proximity;
pub mod session;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};

// Re-export OpenAPI utilities for the gen-openapi binary
pub use openapi::{get_openapi_json, ApiDoc};

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                   - Health check
/// /api
/// ├── /proximity            - Current proximity state
/// ├── /proximity/events     - Proximity state as Server-Sent Events
/// ├── /devices              - List (GET) or clear (DELETE) observed devices
/// ├── /session              - start, stop, refresh
/// ├── /identity             - Own and target identifiers
/// └── /openapi.json         - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/proximity", get(proximity::get_proximity))
                .route("/proximity/events", get(proximity::stream_proximity))
                .route(
                    "/devices",
                    get(devices::list_devices).delete(devices::clear_devices),
                )
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/session", session::router())
                .nest("/identity", identity::router()),
        )
        .with_state(state)
}
