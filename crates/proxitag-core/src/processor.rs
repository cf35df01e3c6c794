//! Scan batch processing and the tagging state machine.
//!
//! Each batch updates the device map and, for hits advertising the current
//! target, drives a hold timer:
//!
//! ```text
//! Idle --rssi >= threshold--> Holding --held >= TARGET_HOLD_MS--> Tagged
//!   ^                            |                                  |
//!   +-------rssi < threshold-----+----------rssi < threshold--------+
//! ```
//!
//! Any target change forces `Idle`. RSSI is not smoothed: each reading is
//! tested on its own.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::ProxitagError;
use crate::identifier::{decode, Identifier, SERVICE_UUID};
use crate::radio::ScanHit;
use crate::state::{
    DeviceObservation, ProximityEvent, ProximityStore, TARGET_HOLD_MS, TARGET_RSSI_THRESHOLD,
};

const HOLD: Duration = Duration::from_millis(TARGET_HOLD_MS);

/// Hold-timer phase for the current target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldPhase {
    /// No qualifying reading in progress.
    Idle,
    /// Above threshold since `since`.
    Holding {
        /// Monotonic time of the first qualifying reading.
        since: Instant,
    },
    /// Latched after holding long enough.
    Tagged {
        /// Monotonic time the hold started.
        since: Instant,
    },
}

/// Turns scan batches into state updates.
#[derive(Debug)]
pub struct ScanProcessor {
    store: ProximityStore,
    phase: HoldPhase,
    /// Target seen by the previous batch.
    current_target: Identifier,
    /// Read once per qualifying hit.
    now: fn() -> Instant,
}

impl ScanProcessor {
    /// Create a processor writing into `store`.
    #[must_use]
    pub const fn new(store: ProximityStore) -> Self {
        Self::with_clock(store, Instant::now)
    }

    pub(crate) const fn with_clock(store: ProximityStore, now: fn() -> Instant) -> Self {
        Self {
            store,
            phase: HoldPhase::Idle,
            current_target: Identifier::empty(),
            now,
        }
    }

    /// Current hold phase.
    #[must_use]
    pub const fn phase(&self) -> HoldPhase {
        self.phase
    }

    /// Process one batch of hits in delivery order.
    pub fn process_batch(&mut self, hits: Vec<ScanHit>) {
        let target = self.store.target_id();
        if target != self.current_target {
            debug!(from = %self.current_target, to = %target, "Target changed; resetting hold");
            self.current_target = target.clone();
            self.reset_target_state();
        }

        for hit in hits {
            let Some(address) = hit.address.clone() else {
                debug!("Skipping scan hit without an address");
                continue;
            };
            let advertised_id = hit.service_data_for(&SERVICE_UUID).and_then(decode);
            let is_target = target.matches(advertised_id.as_deref());

            self.store.upsert_device(DeviceObservation {
                address,
                name: hit.name,
                advertised_id,
                rssi: hit.rssi,
                last_seen: Utc::now(),
            });

            if is_target {
                let now = (self.now)();
                self.evaluate_hold(&target, hit.rssi, now);
            }
        }
    }

    /// Surface a platform scan error. Hold progress and devices are kept.
    pub fn handle_scan_error(&self, code: i32) {
        self.store
            .set_message(Some(ProxitagError::ScanFailed(code).to_string()));
    }

    /// Forget the previous target and drop hold progress.
    pub fn reset(&mut self) {
        self.current_target = Identifier::empty();
        self.reset_target_state();
    }

    fn reset_target_state(&mut self) {
        self.phase = HoldPhase::Idle;
        self.store.set_tagged(false);
        self.store.set_target_rssi(None);
    }

    fn evaluate_hold(&mut self, target: &Identifier, rssi: i16, now: Instant) {
        self.store.set_target_rssi(Some(rssi));

        if rssi < TARGET_RSSI_THRESHOLD {
            if matches!(self.phase, HoldPhase::Tagged { .. }) {
                info!(%target, rssi, "Target released");
                self.store.set_tagged(false);
                self.store.publish(ProximityEvent::Released {
                    target: target.clone(),
                });
            }
            self.phase = HoldPhase::Idle;
            return;
        }

        match self.phase {
            HoldPhase::Idle => {
                self.phase = HoldPhase::Holding { since: now };
                // A zero-length hold would complete on the same reading.
                self.complete_hold_if_due(target, rssi, now);
            }
            HoldPhase::Holding { .. } => self.complete_hold_if_due(target, rssi, now),
            HoldPhase::Tagged { .. } => {}
        }
    }

    fn complete_hold_if_due(&mut self, target: &Identifier, rssi: i16, now: Instant) {
        let HoldPhase::Holding { since } = self.phase else {
            return;
        };
        if now.duration_since(since) < HOLD {
            return;
        }

        self.phase = HoldPhase::Tagged { since };
        info!(%target, rssi, "Target tagged");
        self.store.set_tagged(true);
        self.store.set_message(Some("Target tagged.".to_string()));
        self.store.publish(ProximityEvent::Tagged {
            target: target.clone(),
            rssi,
            at: Utc::now(),
        });
    }
}
