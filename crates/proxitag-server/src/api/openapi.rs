//! OpenAPI specification generation for the proxitag API.
//!
//! The document is served at `/api/openapi.json`, rendered by Swagger UI at
//! `/docs`, and written to disk by the `gen-openapi` binary.

use axum::Json;
use proxitag_core::HealthResponse;
use utoipa::OpenApi;

use super::devices::{ClearDevicesResponse, DeviceResponse, DevicesResponse};
use super::error::ErrorResponse;
use super::identity::{IdentityResponse, SetIdentifierRequest, SetIdentifierResponse};
use super::proximity::ProximityResponse;
use super::session::SessionResponse;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty-printed JSON string.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for proxitag.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "proxitag API",
        version = "0.1.0",
        description = r#"
# proxitag API

proxitag tags a chosen nearby device using Bluetooth Low Energy.

## Overview

Every proxitag device advertises a short identifier under a fixed service UUID
while scanning for other devices doing the same. When the selected target is
heard at or above -50 dBm (roughly 10 cm) continuously for 2 seconds, it is
tagged and a `tagged` event is emitted once.

## Typical flow

1. **setOwnIdentifier** (optional): choose the identifier others will see.
2. **setTargetIdentifier**: choose who to tag.
3. **startSession**: begin scanning and advertising.
4. **getProximity** or **streamProximity**: watch for `tagged: true`.
5. **stopSession** when done.

Radio problems never fail a request. They show up in the `message` field of
the proximity state, with `scanning`/`advertising` reflecting what is running.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local proxitag server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "proximity", description = "Observable proximity and tagging state"),
        (name = "devices", description = "Devices heard during the session"),
        (name = "session", description = "Start, stop and refresh the radio session"),
        (name = "identity", description = "Own and target identifiers")
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        // Proximity endpoints
        super::proximity::get_proximity,
        super::proximity::stream_proximity,
        // Device endpoints
        super::devices::list_devices,
        super::devices::clear_devices,
        // Session endpoints
        super::session::start_session,
        super::session::stop_session,
        super::session::refresh_session,
        // Identity endpoints
        super::identity::get_identity,
        super::identity::set_own_identifier,
        super::identity::set_target_identifier,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Proximity types
            ProximityResponse,
            // Device types
            DeviceResponse,
            DevicesResponse,
            ClearDevicesResponse,
            // Session types
            SessionResponse,
            // Identity types
            IdentityResponse,
            SetIdentifierRequest,
            SetIdentifierResponse,
        )
    )
)]
pub struct ApiDoc;
