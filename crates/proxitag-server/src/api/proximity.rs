//! Proximity state endpoints.
//!
//! `GET /api/proximity` returns the current observable state.
//! `GET /api/proximity/events` streams it as Server-Sent Events: a `state`
//! event on every change, plus `tagged`/`released` events as they happen.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::Utc;
use futures::stream::{self, Stream};
use proxitag_core::{
    ProximityEvent, ProximitySnapshot, NEAR_RSSI_THRESHOLD, TARGET_HOLD_MS,
    TARGET_RSSI_THRESHOLD,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::state::SharedState;

// ============================================================================
// Response Types
// ============================================================================

/// Current proximity state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "scanning": true,
    "advertising": true,
    "own_id": "BLE-4821",
    "target_id": "BLE-1093",
    "tagged": false,
    "target_rssi_dbm": -58,
    "message": null,
    "device_count": 3,
    "near_count": 1,
    "tag_threshold_dbm": -50,
    "near_threshold_dbm": -55,
    "hold_ms": 2000,
    "checked_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct ProximityResponse {
    /// Whether the scan session is running.
    pub scanning: bool,

    /// Whether our advertisement is on air.
    pub advertising: bool,

    /// Identifier this device advertises.
    #[schema(example = "BLE-4821")]
    pub own_id: String,

    /// Identifier being looked for; empty when none is selected.
    #[schema(example = "BLE-1093")]
    pub target_id: String,

    /// Whether the target is currently tagged.
    pub tagged: bool,

    /// Last RSSI reported for the target in dBm.
    #[schema(example = -58)]
    pub target_rssi_dbm: Option<i16>,

    /// Status or error message for the user.
    pub message: Option<String>,

    /// Number of observed devices.
    pub device_count: usize,

    /// Number of observed devices within the near threshold.
    pub near_count: usize,

    /// RSSI the target must reach to count towards tagging.
    #[schema(example = -50)]
    pub tag_threshold_dbm: i16,

    /// RSSI at which a device is reported as near.
    #[schema(example = -55)]
    pub near_threshold_dbm: i16,

    /// How long the target must stay above the tag threshold.
    #[schema(example = 2000)]
    pub hold_ms: u64,

    /// UTC timestamp of this response.
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub checked_at_utc: String,
}

impl From<&ProximitySnapshot> for ProximityResponse {
    fn from(snapshot: &ProximitySnapshot) -> Self {
        Self {
            scanning: snapshot.scanning,
            advertising: snapshot.advertising,
            own_id: snapshot.own_id.to_string(),
            target_id: snapshot.target_id.to_string(),
            tagged: snapshot.tagged,
            target_rssi_dbm: snapshot.target_rssi,
            message: snapshot.message.clone(),
            device_count: snapshot.devices.len(),
            near_count: snapshot.devices.values().filter(|d| d.is_near()).count(),
            tag_threshold_dbm: TARGET_RSSI_THRESHOLD,
            near_threshold_dbm: NEAR_RSSI_THRESHOLD,
            hold_ms: TARGET_HOLD_MS,
            checked_at_utc: Utc::now().to_rfc3339(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the current proximity state.
#[utoipa::path(
    get,
    path = "/proximity",
    tag = "proximity",
    operation_id = "getProximity",
    summary = "Get proximity state",
    description = "Returns the session flags, own and target identifiers, whether the \
        target is tagged, its last RSSI and the current status message.",
    responses(
        (status = 200, description = "Current proximity state", body = ProximityResponse)
    )
)]
pub async fn get_proximity(State(state): State<SharedState>) -> Json<ProximityResponse> {
    Json(ProximityResponse::from(&state.store().snapshot()))
}

/// Stream proximity state changes.
#[utoipa::path(
    get,
    path = "/proximity/events",
    tag = "proximity",
    operation_id = "streamProximity",
    summary = "Stream proximity state",
    description = "Server-Sent Events. Sends a `state` event with a ProximityResponse \
        immediately and on every change, and a `tagged` or `released` event when the \
        target is tagged or released.",
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream", body = ProximityResponse)
    )
)]
pub async fn stream_proximity(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let updates = Updates {
        snapshots: state.store().subscribe(),
        events: state.store().events(),
        shutdown: state.shutdown_signal(),
        sent_initial: false,
    };
    Sse::new(stream::unfold(updates, Updates::next)).keep_alive(KeepAlive::default())
}

struct Updates {
    snapshots: watch::Receiver<ProximitySnapshot>,
    events: broadcast::Receiver<ProximityEvent>,
    shutdown: watch::Receiver<bool>,
    sent_initial: bool,
}

impl Updates {
    async fn next(mut self) -> Option<(Result<Event, Infallible>, Self)> {
        let stopping = *self.shutdown.borrow();
        if stopping {
            return None;
        }
        if !self.sent_initial {
            self.sent_initial = true;
            let event = self.current_state();
            return Some((Ok(event), self));
        }

        loop {
            tokio::select! {
                changed = self.snapshots.changed() => {
                    changed.ok()?;
                    let event = self.current_state();
                    return Some((Ok(event), self));
                }
                received = self.events.recv() => match received {
                    Ok(event) => return Some((Ok(proximity_event(&event)), self)),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Event stream lagged");
                    }
                    Err(RecvError::Closed) => return None,
                },
                // The flag only ever flips to true.
                _ = self.shutdown.changed() => return None,
            }
        }
    }

    fn current_state(&mut self) -> Event {
        let response = ProximityResponse::from(&*self.snapshots.borrow_and_update());
        json_event("state", &response)
    }
}

fn proximity_event(event: &ProximityEvent) -> Event {
    let name = match event {
        ProximityEvent::Tagged { .. } => "tagged",
        ProximityEvent::Released { .. } => "released",
    };
    json_event(name, event)
}

fn json_event(name: &str, data: &impl Serialize) -> Event {
    Event::default().event(name).json_data(data).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to serialize event");
        Event::default().event(name)
    })
}
