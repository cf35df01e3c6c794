//! Own and target identifier endpoints.

use axum::extract::State;
use axum::routing::{get, put};
use axum::{Json, Router};
use proxitag_core::{is_canonical, IDENTIFIER_MAX_LENGTH};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Longest raw input accepted before sanitization.
pub const MAX_INPUT_LENGTH: usize = 64;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Current identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "own_id": "BLE-4821",
    "target_id": "BLE-1093",
    "max_length": 12
}))]
pub struct IdentityResponse {
    /// Identifier this device advertises.
    #[schema(example = "BLE-4821")]
    pub own_id: String,

    /// Identifier being looked for; empty when none is selected.
    #[schema(example = "BLE-1093")]
    pub target_id: String,

    /// Maximum identifier length after sanitization.
    #[schema(example = 12)]
    pub max_length: usize,
}

/// Request to set an identifier.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"value": "BLE-1093"}))]
pub struct SetIdentifierRequest {
    /// Raw identifier. Whitespace is trimmed, characters outside
    /// `[A-Za-z0-9_-]` are removed and the result is cut to 12 characters.
    #[schema(example = "BLE-1093")]
    pub value: String,
}

/// Result of setting an identifier.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "value": "BLE-1093",
    "sanitized": false
}))]
pub struct SetIdentifierResponse {
    /// The canonical identifier that was stored.
    #[schema(example = "BLE-1093")]
    pub value: String,

    /// Whether sanitization changed the submitted value.
    pub sanitized: bool,
}

/// Creates the identity router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_identity))
        .route("/own", put(set_own_identifier))
        .route("/target", put(set_target_identifier))
}

fn validate_input(request: &SetIdentifierRequest) -> ApiResult<()> {
    if request.value.chars().count() > MAX_INPUT_LENGTH {
        return Err(ApiError::BadRequest {
            error_code: "IDENTIFIER_TOO_LONG".to_string(),
            message: format!("Identifier input must be at most {MAX_INPUT_LENGTH} characters"),
        });
    }
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the own and target identifiers.
#[utoipa::path(
    get,
    path = "/identity",
    tag = "identity",
    operation_id = "getIdentity",
    summary = "Get identifiers",
    responses(
        (status = 200, description = "Current identifiers", body = IdentityResponse)
    )
)]
pub async fn get_identity(State(state): State<SharedState>) -> Json<IdentityResponse> {
    let snapshot = state.store().snapshot();
    Json(IdentityResponse {
        own_id: snapshot.own_id.to_string(),
        target_id: snapshot.target_id.to_string(),
        max_length: IDENTIFIER_MAX_LENGTH,
    })
}

/// Set this device's own identifier.
#[utoipa::path(
    put,
    path = "/identity/own",
    tag = "identity",
    operation_id = "setOwnIdentifier",
    summary = "Set own identifier",
    description = "Sanitizes and persists the identifier this device advertises. If a \
        session is running, advertising restarts with the new value. A value that \
        sanitizes to empty is stored, but advertising then refuses to start.",
    request_body = SetIdentifierRequest,
    responses(
        (status = 200, description = "Identifier stored", body = SetIdentifierResponse),
        (status = 400, description = "Input too long", body = ErrorResponse),
        (status = 500, description = "Identifier could not be persisted", body = ErrorResponse),
        (status = 503, description = "Session worker is not running", body = ErrorResponse)
    )
)]
pub async fn set_own_identifier(
    State(state): State<SharedState>,
    Json(request): Json<SetIdentifierRequest>,
) -> ApiResult<Json<SetIdentifierResponse>> {
    validate_input(&request)?;
    let id = state.session.set_own_identifier(&request.value).await?;
    Ok(Json(SetIdentifierResponse {
        sanitized: !is_canonical(&request.value),
        value: id.to_string(),
    }))
}

/// Select the target identifier.
#[utoipa::path(
    put,
    path = "/identity/target",
    tag = "identity",
    operation_id = "setTargetIdentifier",
    summary = "Set target identifier",
    description = "Selects the identifier to tag. Any tag or hold in progress for the \
        previous target is cleared. An empty value deselects the target.",
    request_body = SetIdentifierRequest,
    responses(
        (status = 200, description = "Target selected", body = SetIdentifierResponse),
        (status = 400, description = "Input too long", body = ErrorResponse),
        (status = 503, description = "Session worker is not running", body = ErrorResponse)
    )
)]
pub async fn set_target_identifier(
    State(state): State<SharedState>,
    Json(request): Json<SetIdentifierRequest>,
) -> ApiResult<Json<SetIdentifierResponse>> {
    validate_input(&request)?;
    let id = state.session.set_target_identifier(&request.value).await?;
    Ok(Json(SetIdentifierResponse {
        sanitized: !is_canonical(&request.value),
        value: id.to_string(),
    }))
}
