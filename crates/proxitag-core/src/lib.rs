//! # proxitag-core
//!
//! Core engine for BLE proximity tagging.
//!
//! Every device advertises a short identifier under a fixed service UUID while
//! scanning for the same service. When the selected target is heard above a
//! signal threshold for long enough, it is tagged.
//!
//! ## Architecture
//!
//! - [`identifier`] - Identifier sanitization and advertisement payload codec
//! - [`identity`] - Persistent storage for this device's own identifier
//! - [`state`] - Observable proximity state (devices, flags, tag status)
//! - [`processor`] - Scan batch processing and the RSSI hold state machine
//! - [`radio`] - Radio abstraction with BlueZ and simulated backends
//! - [`session`] - Session worker serializing commands and radio events
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod identifier;
pub mod identity;
pub mod processor;
pub mod radio;
pub mod session;
pub mod state;
pub mod types;

// Re-export primary types for convenience
pub use config::{Config, ConfigError, ConfigResult, IdentityConfig, RadioConfig, ServerConfig};
pub use error::{Error, ProxitagError, Result};
pub use identifier::{
    decode, encode, is_canonical, sanitize, Identifier, IDENTIFIER_MAX_LENGTH, SERVICE_UUID,
};
pub use identity::{default_data_dir, default_identity_path, IdentityStore};
pub use processor::{HoldPhase, ScanProcessor};
#[cfg(feature = "bluetooth")]
pub use radio::bluez::BluezRadio;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub use radio::mock::{MockDevice, MockRadio};
pub use radio::{
    event_channel, AdapterState, AdvertiseRequest, EventReceiver, EventSink, Radio, RadioError,
    RadioEvent, RadioResult, ScanHit, ScanMode, ScanParams,
};
pub use session::{SessionController, SessionHandle, SessionSettings};
pub use state::{
    DeviceObservation, ProximityEvent, ProximitySnapshot, ProximityStore, NEAR_RSSI_THRESHOLD,
    TARGET_HOLD_MS, TARGET_RSSI_THRESHOLD,
};
pub use types::HealthResponse;
