//! Platform radio primitives.
//!
//! The [`Radio`] trait is the seam between the session controller and the
//! Bluetooth stack. Calls that the platform completes asynchronously
//! (advertising start, scan delivery, scan failure) report back as
//! [`RadioEvent`]s posted into an [`EventSink`], which the session worker
//! drains in arrival order.
//!
//! Backends:
//! - [`bluez`] - BlueZ through `bluer` (`bluetooth` feature, Linux)
//! - [`mock`] - in-process simulated radio (`mock-bluetooth` feature and tests)

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::identifier::SERVICE_UUID;

#[cfg(feature = "bluetooth")]
pub mod bluez;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub mod mock;

/// Platform scan failure codes.
pub mod scan_failure {
    /// A scan with the same settings is already running.
    pub const ALREADY_STARTED: i32 = 1;
    /// The scanner could not be registered with the stack.
    pub const APPLICATION_REGISTRATION_FAILED: i32 = 2;
    /// Internal stack error, including an unexpectedly closed discovery stream.
    pub const INTERNAL_ERROR: i32 = 3;
    /// The adapter does not support this scan.
    pub const FEATURE_UNSUPPORTED: i32 = 4;
}

/// Platform advertising failure codes.
pub mod advertise_failure {
    /// Payload does not fit in an advertisement.
    pub const DATA_TOO_LARGE: i32 = 1;
    /// No free advertising instance.
    pub const TOO_MANY_ADVERTISERS: i32 = 2;
    /// This advertisement is already registered.
    pub const ALREADY_STARTED: i32 = 3;
    /// Internal stack error.
    pub const INTERNAL_ERROR: i32 = 4;
    /// The adapter does not support advertising.
    pub const FEATURE_UNSUPPORTED: i32 = 5;
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised synchronously by radio calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RadioError {
    /// The platform refused access to the radio.
    #[error("Bluetooth permission denied")]
    PermissionDenied,

    /// No adapter is present.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// The adapter is powered off.
    #[error("Bluetooth adapter is powered off")]
    AdapterDisabled,

    /// The adapter lacks a required capability.
    #[error("Bluetooth {feature} is not supported")]
    Unsupported {
        /// The missing capability.
        feature: &'static str,
    },

    /// Anything else the stack reported.
    #[error("Bluetooth stack error: {message}")]
    Platform {
        /// Stack-provided description.
        message: String,
    },
}

/// Result type for radio calls.
pub type RadioResult<T> = std::result::Result<T, RadioError>;

// ============================================================================
// Parameters
// ============================================================================

/// Power state of the local adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// No adapter present.
    Missing,
    /// Present but powered off.
    Disabled,
    /// Ready.
    Enabled,
}

/// Scan duty cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanMode {
    /// Continuous scanning; highest power, lowest latency.
    #[default]
    LowLatency,
}

/// Scan session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanParams {
    /// Only advertisements carrying this service are reported.
    pub service_uuid: Uuid,
    /// Duty cycle.
    pub mode: ScanMode,
    /// How long the backend accumulates hits before delivering a batch.
    pub batch_window: Duration,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            service_uuid: SERVICE_UUID,
            mode: ScanMode::LowLatency,
            batch_window: Duration::from_millis(500),
        }
    }
}

/// A single advertising request.
///
/// `generation` is echoed back in the completion event so stale completions
/// can be told apart from the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseRequest {
    /// Monotonic request counter assigned by the controller.
    pub generation: u64,
    /// Advertised service.
    pub service_uuid: Uuid,
    /// Service data for `service_uuid`: the encoded own identifier.
    pub service_data: Vec<u8>,
    /// Always `false`; tagging never connects.
    pub connectable: bool,
    /// Always `false`; the device name would not fit and leaks identity.
    pub include_device_name: bool,
    /// Transmit power in dBm.
    pub tx_power_dbm: i16,
    /// Advertising interval.
    pub interval: Duration,
}

/// One advertisement report from the scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanHit {
    /// Hardware address; `None` when the platform withholds it.
    pub address: Option<String>,
    /// Device name; `None` when absent or withheld.
    pub name: Option<String>,
    /// Service data keyed by service UUID.
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Signal strength in dBm.
    pub rssi: i16,
}

impl ScanHit {
    /// Service data advertised under `uuid`, if any.
    #[must_use]
    pub fn service_data_for(&self, uuid: &Uuid) -> Option<&[u8]> {
        self.service_data.get(uuid).map(Vec::as_slice)
    }
}

// ============================================================================
// Events
// ============================================================================

/// Asynchronous notifications from the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A batch of scan hits, in platform order.
    ScanResults(Vec<ScanHit>),
    /// The scan session failed.
    ScanFailed {
        /// See [`scan_failure`].
        code: i32,
    },
    /// The advertisement with this generation is on air.
    AdvertiseStarted {
        /// Generation of the confirmed request.
        generation: u64,
    },
    /// The advertisement with this generation could not start.
    AdvertiseFailed {
        /// Generation of the failed request.
        generation: u64,
        /// See [`advertise_failure`].
        code: i32,
    },
}

/// Posting side of the radio event queue.
///
/// Never blocks, so it can be used from any callback context.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<RadioEvent>,
}

/// Receiving side of the radio event queue, owned by the session worker.
pub type EventReceiver = mpsc::UnboundedReceiver<RadioEvent>;

impl EventSink {
    /// Post an event. Events posted after the session worker exits are dropped.
    pub fn post(&self, event: RadioEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Radio event dropped; session worker has exited");
        }
    }
}

/// Create a connected sink/receiver pair.
#[must_use]
pub fn event_channel() -> (EventSink, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

// ============================================================================
// Trait
// ============================================================================

/// Bluetooth LE radio operations used by the session controller.
///
/// Start calls return once the request is accepted; completion and data
/// arrive through the [`EventSink`] the backend was built with.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Whether the process may use the radio at all.
    async fn permissions_granted(&self) -> bool;

    /// Current adapter power state.
    async fn adapter_state(&self) -> AdapterState;

    /// Whether LE scanning is available.
    async fn scanner_available(&self) -> bool;

    /// Whether LE advertising is available.
    async fn advertiser_available(&self) -> bool;

    /// Begin delivering [`RadioEvent::ScanResults`] matching `params`.
    async fn start_scan(&self, params: &ScanParams) -> RadioResult<()>;

    /// Stop the scan session. Stopping when no scan is running is not an error.
    async fn stop_scan(&self) -> RadioResult<()>;

    /// Request an advertisement; completion is reported by event.
    async fn start_advertising(&self, request: AdvertiseRequest) -> RadioResult<()>;

    /// Withdraw any advertisement, including one still pending.
    async fn stop_advertising(&self) -> RadioResult<()>;

    /// Keep the host from sleeping while scanning. Must be idempotent.
    async fn acquire_wake_lock(&self) -> RadioResult<()>;

    /// Release the wake lock. Must be idempotent.
    async fn release_wake_lock(&self);
}
