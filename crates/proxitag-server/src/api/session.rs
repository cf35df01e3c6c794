//! Session control endpoints.
//!
//! Radio failures do not fail these requests: they are reported in the
//! returned `message`, exactly as they appear in the proximity state.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use proxitag_core::ProximitySnapshot;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Session state after a command.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "scanning": true,
    "advertising": false,
    "message": null
}))]
pub struct SessionResponse {
    /// Whether the scan session is running.
    pub scanning: bool,

    /// Whether our advertisement is on air.
    pub advertising: bool,

    /// Status or error message for the user.
    #[schema(example = "Bluetooth is turned off.")]
    pub message: Option<String>,
}

impl From<ProximitySnapshot> for SessionResponse {
    fn from(snapshot: ProximitySnapshot) -> Self {
        Self {
            scanning: snapshot.scanning,
            advertising: snapshot.advertising,
            message: snapshot.message,
        }
    }
}

/// Creates the session router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/start", post(start_session))
        .route("/stop", post(stop_session))
        .route("/refresh", post(refresh_session))
}

/// Start scanning and advertising.
#[utoipa::path(
    post,
    path = "/session/start",
    tag = "session",
    operation_id = "startSession",
    summary = "Start the proximity session",
    description = "Starts scanning for the proximity service and advertising the own \
        identifier. Starting a running session does nothing. If Bluetooth is missing, \
        off or not permitted the session stays stopped and `message` says why.",
    responses(
        (status = 200, description = "Command applied", body = SessionResponse),
        (status = 503, description = "Session worker is not running", body = ErrorResponse)
    )
)]
pub async fn start_session(State(state): State<SharedState>) -> ApiResult<Json<SessionResponse>> {
    info!("Session start requested");
    state.session.start().await?;
    Ok(Json(state.store().snapshot().into()))
}

/// Stop scanning and advertising.
#[utoipa::path(
    post,
    path = "/session/stop",
    tag = "session",
    operation_id = "stopSession",
    summary = "Stop the proximity session",
    description = "Stops scanning and advertising and clears any tag in progress. \
        Always succeeds, including when no session is running.",
    responses(
        (status = 200, description = "Command applied", body = SessionResponse),
        (status = 503, description = "Session worker is not running", body = ErrorResponse)
    )
)]
pub async fn stop_session(State(state): State<SharedState>) -> ApiResult<Json<SessionResponse>> {
    info!("Session stop requested");
    state.session.stop().await?;
    Ok(Json(state.store().snapshot().into()))
}

/// Re-evaluate advertising.
#[utoipa::path(
    post,
    path = "/session/refresh",
    tag = "session",
    operation_id = "refreshSession",
    summary = "Refresh advertising",
    description = "Restarts advertising if the own identifier changed, without \
        interrupting the scan. Does nothing if the current identifier is already \
        on air.",
    responses(
        (status = 200, description = "Command applied", body = SessionResponse),
        (status = 503, description = "Session worker is not running", body = ErrorResponse)
    )
)]
pub async fn refresh_session(
    State(state): State<SharedState>,
) -> ApiResult<Json<SessionResponse>> {
    state.session.refresh().await?;
    Ok(Json(state.store().snapshot().into()))
}
