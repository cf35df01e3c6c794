//! Observable proximity state.
//!
//! [`ProximityStore`] is the single container the rest of the application
//! observes. Readers take snapshots or subscribe to changes; writes go through
//! crate-private mutators used only by the scan processor and the session
//! controller, which both run on the session worker.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use utoipa::ToSchema;

use crate::identifier::Identifier;

/// RSSI at or above which a target hit counts towards tagging (~10 cm).
pub const TARGET_RSSI_THRESHOLD: i16 = -50;

/// RSSI at or above which any device is reported as near.
pub const NEAR_RSSI_THRESHOLD: i16 = -55;

/// How long the target must stay above [`TARGET_RSSI_THRESHOLD`] to be tagged.
pub const TARGET_HOLD_MS: u64 = 2000;

const EVENT_CAPACITY: usize = 64;

/// Latest observation of one device, keyed by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "address": "AA:BB:CC:DD:EE:FF",
    "name": null,
    "advertised_id": "BLE-4821",
    "rssi": -48,
    "last_seen": "2025-01-15T03:30:00Z"
}))]
pub struct DeviceObservation {
    /// Hardware address.
    pub address: String,

    /// Device name, when the platform exposes it.
    pub name: Option<String>,

    /// Identifier decoded from the advertisement's service data.
    pub advertised_id: Option<String>,

    /// Signal strength in dBm.
    pub rssi: i16,

    /// Wall-clock time of the observation.
    pub last_seen: DateTime<Utc>,
}

impl DeviceObservation {
    /// Whether the device is within [`NEAR_RSSI_THRESHOLD`].
    #[must_use]
    pub const fn is_near(&self) -> bool {
        self.rssi >= NEAR_RSSI_THRESHOLD
    }
}

/// Point-in-time copy of everything collaborators can observe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProximitySnapshot {
    /// Observed devices keyed by address.
    pub devices: BTreeMap<String, DeviceObservation>,

    /// Whether the scan session is running.
    pub scanning: bool,

    /// Whether the platform confirmed our advertisement.
    pub advertising: bool,

    /// Identifier this device advertises.
    pub own_id: Identifier,

    /// Identifier being looked for; empty when none is selected.
    pub target_id: Identifier,

    /// Whether the target is currently tagged.
    pub tagged: bool,

    /// Last RSSI reported for the target.
    pub target_rssi: Option<i16>,

    /// Status or error message for the user.
    pub message: Option<String>,
}

impl ProximitySnapshot {
    /// Devices sorted by most recently seen, optionally only those advertising
    /// the current target.
    #[must_use]
    pub fn device_list(&self, target_only: bool) -> Vec<&DeviceObservation> {
        let mut list: Vec<&DeviceObservation> = self
            .devices
            .values()
            .filter(|d| !target_only || self.target_id.matches(d.advertised_id.as_deref()))
            .collect();
        list.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        list
    }
}

/// One-shot notifications that are not captured by the snapshot itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProximityEvent {
    /// The target held above threshold long enough and is now tagged.
    Tagged {
        /// The tagged identifier.
        target: Identifier,
        /// RSSI of the hit that completed the hold.
        rssi: i16,
        /// When the tag happened.
        at: DateTime<Utc>,
    },
    /// A tagged target dropped below threshold.
    Released {
        /// The released identifier.
        target: Identifier,
    },
}

/// Shared handle to the proximity state.
#[derive(Debug, Clone)]
pub struct ProximityStore {
    state: Arc<watch::Sender<ProximitySnapshot>>,
    events: broadcast::Sender<ProximityEvent>,
}

impl Default for ProximityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProximityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(ProximitySnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(state),
            events,
        }
    }

    // ========================================================================
    // Readers
    // ========================================================================

    /// Clone the current state.
    #[must_use]
    pub fn snapshot(&self) -> ProximitySnapshot {
        self.state.borrow().clone()
    }

    /// Receive every subsequent state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProximitySnapshot> {
        self.state.subscribe()
    }

    /// Receive tagged/released notifications.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ProximityEvent> {
        self.events.subscribe()
    }

    /// Current target identifier.
    #[must_use]
    pub fn target_id(&self) -> Identifier {
        self.state.borrow().target_id.clone()
    }

    /// Current own identifier.
    #[must_use]
    pub fn own_id(&self) -> Identifier {
        self.state.borrow().own_id.clone()
    }

    /// Whether the session is scanning.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.state.borrow().scanning
    }

    // ========================================================================
    // Mutators (session worker only)
    // ========================================================================

    pub(crate) fn upsert_device(&self, device: DeviceObservation) {
        self.state.send_modify(|s| {
            s.devices.insert(device.address.clone(), device);
        });
    }

    pub(crate) fn clear_devices(&self) {
        self.state.send_if_modified(|s| {
            let changed = !s.devices.is_empty();
            s.devices.clear();
            changed
        });
    }

    pub(crate) fn set_own_id(&self, id: Identifier) {
        self.state.send_if_modified(|s| replace(&mut s.own_id, id));
    }

    /// Selecting a new target always drops prior tag progress.
    pub(crate) fn set_target_id(&self, id: Identifier) {
        self.state.send_modify(|s| {
            s.target_id = id;
            s.tagged = false;
            s.target_rssi = None;
        });
    }

    pub(crate) fn set_tagged(&self, tagged: bool) {
        self.state.send_if_modified(|s| replace(&mut s.tagged, tagged));
    }

    pub(crate) fn set_target_rssi(&self, rssi: Option<i16>) {
        self.state.send_if_modified(|s| replace(&mut s.target_rssi, rssi));
    }

    pub(crate) fn set_scanning(&self, scanning: bool) {
        self.state.send_if_modified(|s| replace(&mut s.scanning, scanning));
    }

    pub(crate) fn set_advertising(&self, advertising: bool) {
        self.state
            .send_if_modified(|s| replace(&mut s.advertising, advertising));
    }

    pub(crate) fn set_message(&self, message: Option<String>) {
        self.state.send_if_modified(|s| replace(&mut s.message, message));
    }

    pub(crate) fn publish(&self, event: ProximityEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn observation(address: &str, id: Option<&str>, rssi: i16, age_secs: i64) -> DeviceObservation {
        DeviceObservation {
            address: address.to_string(),
            name: None,
            advertised_id: id.map(str::to_string),
            rssi,
            last_seen: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_upsert_is_last_write_wins() {
        let store = ProximityStore::new();
        store.upsert_device(observation("AA", Some("x"), -70, 10));
        store.upsert_device(observation("AA", Some("x"), -40, 0));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.devices.len(), 1);
        assert_eq!(snapshot.devices["AA"].rssi, -40);
    }

    #[test]
    fn test_set_target_clears_tag_progress() {
        let store = ProximityStore::new();
        store.set_tagged(true);
        store.set_target_rssi(Some(-45));

        store.set_target_id(Identifier::new("next"));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.target_id.as_str(), "next");
        assert!(!snapshot.tagged);
        assert_eq!(snapshot.target_rssi, None);
    }

    #[test]
    fn test_clear_devices() {
        let store = ProximityStore::new();
        store.upsert_device(observation("AA", None, -70, 0));
        store.upsert_device(observation("BB", None, -70, 0));
        store.clear_devices();
        assert!(store.snapshot().devices.is_empty());
    }

    #[test]
    fn test_device_list_sorted_and_filtered() {
        let store = ProximityStore::new();
        store.upsert_device(observation("old", Some("tgt"), -60, 30));
        store.upsert_device(observation("new", Some("tgt"), -60, 1));
        store.upsert_device(observation("other", Some("nope"), -60, 0));
        store.set_target_id(Identifier::new("tgt"));

        let snapshot = store.snapshot();
        let all: Vec<&str> = snapshot
            .device_list(false)
            .iter()
            .map(|d| d.address.as_str())
            .collect();
        assert_eq!(all, ["other", "new", "old"]);

        let targets: Vec<&str> = snapshot
            .device_list(true)
            .iter()
            .map(|d| d.address.as_str())
            .collect();
        assert_eq!(targets, ["new", "old"]);
    }

    #[test]
    fn test_is_near() {
        assert!(observation("a", None, NEAR_RSSI_THRESHOLD, 0).is_near());
        assert!(!observation("a", None, NEAR_RSSI_THRESHOLD - 1, 0).is_near());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes_only() {
        let store = ProximityStore::new();
        let mut rx = store.subscribe();

        store.set_scanning(false);
        assert!(!rx.has_changed().unwrap());

        store.set_scanning(true);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().scanning);
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let store = ProximityStore::new();
        let mut events = store.events();
        store.publish(ProximityEvent::Released {
            target: Identifier::new("t"),
        });
        assert_eq!(
            events.recv().await.unwrap(),
            ProximityEvent::Released {
                target: Identifier::new("t")
            }
        );
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&ProximityEvent::Released {
            target: Identifier::new("t"),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"released","target":"t"}"#);
    }
}
