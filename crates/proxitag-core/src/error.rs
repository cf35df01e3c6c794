//! Unified error types for the proxitag core library.
//!
//! This module provides a unified error type [`ProxitagError`] that covers all
//! failure modes across the proxitag system. Modules keep their own specific
//! error types ([`ConfigError`](crate::config::ConfigError),
//! [`RadioError`](crate::radio::RadioError)) and convert into this one.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **User-facing messages**: `Display` output is what lands in the status message
//! - **HTTP-ready**: Error types include HTTP status codes and error codes
//!
//! # Example
//!
//! ```rust
//! use proxitag_core::error::{ProxitagError, Result};
//!
//! fn require_adapter(present: bool) -> Result<()> {
//!     if !present {
//!         return Err(ProxitagError::AdapterNotFound);
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all proxitag operations.
#[derive(Debug, Error)]
pub enum ProxitagError {
    // =========================================================================
    // RADIO ERRORS
    // =========================================================================
    /// Bluetooth scan/advertise permission has not been granted.
    #[error("Bluetooth scan permission is required.")]
    PermissionDenied,

    /// Advertising was refused for lack of permission.
    #[error("Bluetooth advertise permission is required.")]
    AdvertisePermissionDenied,

    /// No Bluetooth adapter was found on this system.
    #[error("Bluetooth is not supported on this device.")]
    AdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth is turned off.")]
    AdapterDisabled,

    /// The adapter cannot perform LE scanning.
    #[error("BLE scanner is not available.")]
    ScannerUnavailable,

    /// The adapter cannot perform LE advertising.
    #[error("BLE advertising is not supported.")]
    AdvertiserUnavailable,

    /// The local identifier is blank, so there is nothing to advertise.
    #[error("Set your own identifier before advertising.")]
    OwnIdentifierMissing,

    /// The platform radio stack reported a scan failure.
    #[error("Scan failed: {0}")]
    ScanFailed(i32),

    /// The platform radio stack reported an advertising failure.
    #[error("Advertising failed: {0}")]
    AdvertiseFailed(i32),

    /// Any other radio-level failure.
    #[error("Bluetooth error: {0}")]
    Radio(String),

    // =========================================================================
    // SESSION ERRORS
    // =========================================================================
    /// The session worker has shut down and no longer accepts commands.
    #[error("Proximity session is no longer running")]
    SessionClosed,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for proxitag operations.
pub type Result<T> = std::result::Result<T, ProxitagError>;

/// Short alias for [`ProxitagError`].
pub type Error = ProxitagError;

impl ProxitagError {
    /// Returns `true` if this error is related to the radio hardware.
    #[inline]
    #[must_use]
    pub const fn is_radio_error(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied
                | Self::AdvertisePermissionDenied
                | Self::AdapterNotFound
                | Self::AdapterDisabled
                | Self::ScannerUnavailable
                | Self::AdvertiserUnavailable
                | Self::ScanFailed(_)
                | Self::AdvertiseFailed(_)
                | Self::Radio(_)
        )
    }

    /// Returns `true` if this error is a missing permission.
    #[inline]
    #[must_use]
    pub const fn is_permission_error(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::AdvertisePermissionDenied)
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if retrying later may succeed without user intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ScanFailed(_) | Self::AdvertiseFailed(_) | Self::Radio(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 403 Forbidden - the platform refused access
            Self::PermissionDenied | Self::AdvertisePermissionDenied => 403,

            // 404 Not Found
            Self::ConfigNotFound(_) => 404,

            // 409 Conflict - the request needs state the user must set first
            Self::OwnIdentifierMissing => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 503 Service Unavailable - radio hardware issues
            Self::AdapterNotFound
            | Self::AdapterDisabled
            | Self::ScannerUnavailable
            | Self::AdvertiserUnavailable
            | Self::ScanFailed(_)
            | Self::AdvertiseFailed(_)
            | Self::Radio(_)
            | Self::SessionClosed => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::AdvertisePermissionDenied => "ADVERTISE_PERMISSION_DENIED",
            Self::AdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::AdapterDisabled => "BLUETOOTH_ADAPTER_DISABLED",
            Self::ScannerUnavailable => "SCANNER_UNAVAILABLE",
            Self::AdvertiserUnavailable => "ADVERTISER_UNAVAILABLE",
            Self::OwnIdentifierMissing => "OWN_IDENTIFIER_MISSING",
            Self::ScanFailed(_) => "SCAN_FAILED",
            Self::AdvertiseFailed(_) => "ADVERTISE_FAILED",
            Self::Radio(_) => "BLUETOOTH_ERROR",
            Self::SessionClosed => "SESSION_CLOSED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for ProxitagError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::Load(e) => match e {
                config::ConfigError::NotFound(path) => Self::ConfigNotFound(path.into()),
                other => Self::ConfigParseError(other.to_string()),
            },
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::radio::RadioError> for ProxitagError {
    fn from(err: crate::radio::RadioError) -> Self {
        use crate::radio::RadioError;
        match err {
            RadioError::PermissionDenied => Self::PermissionDenied,
            RadioError::AdapterNotFound => Self::AdapterNotFound,
            RadioError::AdapterDisabled => Self::AdapterDisabled,
            RadioError::Unsupported { .. } => Self::ScannerUnavailable,
            RadioError::Platform { message } => Self::Radio(message),
        }
    }
}

impl From<serde_json::Error> for ProxitagError {
    fn from(err: serde_json::Error) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::RadioError;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_radio_error_classification() {
        assert!(ProxitagError::PermissionDenied.is_radio_error());
        assert!(ProxitagError::AdapterDisabled.is_radio_error());
        assert!(ProxitagError::ScanFailed(3).is_radio_error());
        assert!(ProxitagError::AdvertiseFailed(1).is_radio_error());

        assert!(!ProxitagError::SessionClosed.is_radio_error());
        assert!(!ProxitagError::PersistenceError("x".into()).is_radio_error());
    }

    #[test]
    fn test_permission_classification() {
        assert!(ProxitagError::PermissionDenied.is_permission_error());
        assert!(ProxitagError::AdvertisePermissionDenied.is_permission_error());
        assert!(!ProxitagError::AdapterNotFound.is_permission_error());
    }

    #[test]
    fn test_config_and_io_classification() {
        assert!(ProxitagError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(ProxitagError::ConfigValidationError("bad".into()).is_config_error());
        assert!(ProxitagError::IoError(IoErr::new(ErrorKind::NotFound, "test")).is_io_error());
        assert!(!ProxitagError::AdapterNotFound.is_config_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(ProxitagError::ScanFailed(3).is_recoverable());
        assert!(!ProxitagError::AdapterNotFound.is_recoverable());
        assert!(!ProxitagError::PermissionDenied.is_recoverable());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(ProxitagError::PermissionDenied.http_status_code(), 403);
        assert_eq!(ProxitagError::OwnIdentifierMissing.http_status_code(), 409);
        assert_eq!(
            ProxitagError::ConfigValidationError("bad".into()).http_status_code(),
            422
        );
        assert_eq!(
            ProxitagError::PersistenceError("disk".into()).http_status_code(),
            500
        );
        assert_eq!(ProxitagError::AdapterDisabled.http_status_code(), 503);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ProxitagError::AdapterNotFound.error_code(),
            "BLUETOOTH_ADAPTER_NOT_FOUND"
        );
        assert_eq!(ProxitagError::ScanFailed(2).error_code(), "SCAN_FAILED");
        assert_eq!(ProxitagError::SessionClosed.error_code(), "SESSION_CLOSED");
    }

    #[test]
    fn test_status_messages_carry_platform_codes() {
        assert_eq!(ProxitagError::ScanFailed(2).to_string(), "Scan failed: 2");
        assert_eq!(
            ProxitagError::AdvertiseFailed(5).to_string(),
            "Advertising failed: 5"
        );
    }

    #[test]
    fn test_from_radio_error() {
        let err: ProxitagError = RadioError::PermissionDenied.into();
        assert!(matches!(err, ProxitagError::PermissionDenied));

        let err: ProxitagError = RadioError::Platform {
            message: "busy".into(),
        }
        .into();
        assert!(err.to_string().contains("busy"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoErr::new(ErrorKind::NotFound, "file not found");
        let err: ProxitagError = io_err.into();
        assert!(matches!(err, ProxitagError::IoError(_)));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ProxitagError>();
        assert_sync::<ProxitagError>();
    }
}
