//! Observed device endpoints.

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use proxitag_core::{DeviceObservation, Identifier, NEAR_RSSI_THRESHOLD};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::ApiResult;
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Device list filter.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DevicesQuery {
    /// Only list devices advertising the current target identifier.
    #[serde(default)]
    pub target_only: bool,
}

/// An observed device.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "address": "AA:BB:CC:DD:EE:FF",
    "name": null,
    "advertised_id": "BLE-1093",
    "rssi_dbm": -48,
    "is_target": true,
    "last_seen_utc": "2025-01-15T03:30:00Z"
}))]
pub struct DeviceResponse {
    /// Bluetooth hardware address.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub address: String,

    /// Device name (if exposed by the platform).
    pub name: Option<String>,

    /// Identifier decoded from the advertisement.
    #[schema(example = "BLE-1093")]
    pub advertised_id: Option<String>,

    /// Signal strength in dBm.
    #[schema(example = -48)]
    pub rssi_dbm: i16,

    /// Whether this device advertises the current target identifier.
    pub is_target: bool,

    /// When the device was last heard.
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub last_seen_utc: String,
}

impl DeviceResponse {
    fn new(device: &DeviceObservation, target: &Identifier) -> Self {
        Self {
            address: device.address.clone(),
            name: device.name.clone(),
            advertised_id: device.advertised_id.clone(),
            rssi_dbm: device.rssi,
            is_target: target.matches(device.advertised_id.as_deref()),
            last_seen_utc: device.last_seen.to_rfc3339(),
        }
    }
}

/// Observed devices split by distance, most recently seen first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DevicesResponse {
    /// Devices at or above the near threshold.
    pub near: Vec<DeviceResponse>,

    /// Devices below the near threshold.
    pub far: Vec<DeviceResponse>,

    /// Total number of listed devices.
    pub total: usize,

    /// RSSI at which a device counts as near.
    #[schema(example = -55)]
    pub near_threshold_dbm: i16,

    /// UTC timestamp of this response.
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub listed_at_utc: String,
}

/// Result of clearing the device list.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClearDevicesResponse {
    /// How many observations were removed.
    #[schema(example = 4)]
    pub cleared: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// List observed devices.
#[utoipa::path(
    get,
    path = "/devices",
    tag = "devices",
    operation_id = "listDevices",
    summary = "List observed devices",
    description = "Returns every device heard during the session, split into near and \
        far by RSSI and sorted by last seen. Set `target_only=true` to list only \
        devices advertising the current target.",
    params(DevicesQuery),
    responses(
        (status = 200, description = "Observed devices", body = DevicesResponse)
    )
)]
pub async fn list_devices(
    State(state): State<SharedState>,
    Query(query): Query<DevicesQuery>,
) -> Json<DevicesResponse> {
    let snapshot = state.store().snapshot();
    let (near, far): (Vec<_>, Vec<_>) = snapshot
        .device_list(query.target_only)
        .into_iter()
        .partition(|device| device.is_near());

    let near: Vec<DeviceResponse> = near
        .into_iter()
        .map(|d| DeviceResponse::new(d, &snapshot.target_id))
        .collect();
    let far: Vec<DeviceResponse> = far
        .into_iter()
        .map(|d| DeviceResponse::new(d, &snapshot.target_id))
        .collect();

    Json(DevicesResponse {
        total: near.len() + far.len(),
        near,
        far,
        near_threshold_dbm: NEAR_RSSI_THRESHOLD,
        listed_at_utc: Utc::now().to_rfc3339(),
    })
}

/// Forget all observed devices.
#[utoipa::path(
    delete,
    path = "/devices",
    tag = "devices",
    operation_id = "clearDevices",
    summary = "Clear observed devices",
    description = "Removes every device observation. Scanning continues, so devices \
        still in range reappear with their next advertisement.",
    responses(
        (status = 200, description = "Devices cleared", body = ClearDevicesResponse),
        (status = 503, description = "Session worker is not running", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn clear_devices(
    State(state): State<SharedState>,
) -> ApiResult<Json<ClearDevicesResponse>> {
    let cleared = state.store().snapshot().devices.len();
    state.session.clear_devices().await?;
    Ok(Json(ClearDevicesResponse { cleared }))
}
