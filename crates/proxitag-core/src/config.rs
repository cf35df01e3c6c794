//! Application configuration management.
//!
//! Configuration is layered with the `config` crate:
//!
//! 1. Built-in defaults
//! 2. Optional TOML file (`/etc/proxitag/config.toml` on Linux)
//! 3. Environment variables, e.g. `PROXITAG__RADIO__BATCH_WINDOW_MS=250`
//!
//! Tagging thresholds and the hold duration are deliberately not configurable;
//! they are part of the wire contract between peers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::default_identity_path;
use crate::radio::ScanParams;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "PROXITAG_CONFIG";

const ENV_PREFIX: &str = "PROXITAG";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A single field is invalid.
    #[error("Invalid {field}: {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Radio session settings.
    pub radio: RadioConfig,
    /// Identity persistence settings.
    pub identity: IdentityConfig,
    /// HTTP server and logging settings.
    pub server: ServerConfig,
}

/// Radio session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Adapter name (e.g. `hci0`); the default adapter when unset.
    pub adapter: Option<String>,

    /// Scan batch delivery window in milliseconds.
    pub batch_window_ms: u64,

    /// Advertising transmit power in dBm.
    pub tx_power_dbm: i16,

    /// Advertising interval in milliseconds.
    pub advertise_interval_ms: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            batch_window_ms: 500,
            tx_power_dbm: 1,
            advertise_interval_ms: 100,
        }
    }
}

impl RadioConfig {
    /// Scan parameters derived from this configuration.
    #[must_use]
    pub fn scan_params(&self) -> ScanParams {
        ScanParams {
            batch_window: Duration::from_millis(self.batch_window_ms),
            ..ScanParams::default()
        }
    }

    /// Advertising interval.
    #[must_use]
    pub const fn advertise_interval(&self) -> Duration {
        Duration::from_millis(self.advertise_interval_ms)
    }
}

/// Identity persistence settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Identity file; the platform data directory when unset.
    pub path: Option<PathBuf>,
}

impl IdentityConfig {
    /// Resolved identity file path.
    ///
    /// # Errors
    ///
    /// Returns an error if no path is configured and no data directory can be
    /// determined.
    pub fn resolved_path(&self) -> crate::Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => default_identity_path(),
        }
    }
}

/// HTTP server and logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind_address: String,

    /// Production logging (JSON files + compact stdout).
    pub production: bool,

    /// Fallback log filter when neither `RUST_LOG` nor `PROXITAG_LOG_LEVEL` is set.
    pub log_level: String,

    /// Directory for production log files; a platform default when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            production: false,
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from the default file location (or `PROXITAG_CONFIG`)
    /// and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load() -> ConfigResult<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(Self::default_path);
        Self::load_from(path.as_deref())
    }

    /// Load configuration from an optional file and the environment.
    ///
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load_from(path: Option<&Path>) -> ConfigResult<Self> {
        Self::load_with_env(path, None)
    }

    /// `env` replaces the process environment when given.
    fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration file path.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            Some(PathBuf::from("/etc/proxitag/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "proxitag")
                .map(|dirs| dirs.config_dir().join("config.toml"))
        }
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns the single error, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if !(50..=10_000).contains(&self.radio.batch_window_ms) {
            errors.push(ConfigError::ValidationError {
                field: "radio.batch_window_ms",
                message: format!("must be 50-10000, got {}", self.radio.batch_window_ms),
            });
        }
        if !(-127..=20).contains(&self.radio.tx_power_dbm) {
            errors.push(ConfigError::ValidationError {
                field: "radio.tx_power_dbm",
                message: format!("must be -127 to 20 dBm, got {}", self.radio.tx_power_dbm),
            });
        }
        if !(20..=10_240).contains(&self.radio.advertise_interval_ms) {
            errors.push(ConfigError::ValidationError {
                field: "radio.advertise_interval_ms",
                message: format!(
                    "must be 20-10240, got {}",
                    self.radio.advertise_interval_ms
                ),
            });
        }
        if self.radio.adapter.as_deref().is_some_and(str::is_empty) {
            errors.push(ConfigError::ValidationError {
                field: "radio.adapter",
                message: "must not be empty".to_string(),
            });
        }
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ConfigError::ValidationError {
                field: "server.bind_address",
                message: format!("'{}' is not a socket address", self.server.bind_address),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Parsed listen address.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the address does not parse.
    pub fn bind_address(&self) -> ConfigResult<SocketAddr> {
        self.server
            .bind_address
            .parse()
            .map_err(|_| ConfigError::ValidationError {
                field: "server.bind_address",
                message: format!("'{}' is not a socket address", self.server.bind_address),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Load without consulting the process environment.
    fn load_isolated(path: &Path) -> ConfigResult<Config> {
        Config::load_with_env(Some(path), Some(HashMap::new()))
    }

    fn env(vars: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            vars.iter()
                .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
                .collect(),
        )
    }

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.radio.batch_window_ms, 500);
        assert_eq!(config.bind_address().unwrap().port(), 3000);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_isolated(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.radio, RadioConfig::default());
    }

    #[test]
    fn test_file_values_override_defaults() {
        let file = toml_file(
            r#"
            [radio]
            adapter = "hci1"
            batch_window_ms = 250

            [server]
            bind_address = "127.0.0.1:8080"
            "#,
        );
        let config = load_isolated(file.path()).unwrap();
        assert_eq!(config.radio.adapter.as_deref(), Some("hci1"));
        assert_eq!(config.radio.batch_window_ms, 250);
        assert_eq!(config.radio.tx_power_dbm, 1);
        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
        assert_eq!(
            config.radio.scan_params().batch_window,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_invalid_file_is_reported() {
        let file = toml_file("[radio]\nbatch_window_ms = 1\n");
        let err = load_isolated(file.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError {
                field: "radio.batch_window_ms",
                ..
            }
        ));
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = toml_file("[radio]\nbatch_window_ms = 1000\n");
        let config = Config::load_with_env(
            Some(file.path()),
            env(&[
                ("PROXITAG__RADIO__BATCH_WINDOW_MS", "250"),
                ("PROXITAG__SERVER__LOG_LEVEL", "debug"),
                ("PROXITAG__SERVER__PRODUCTION", "true"),
                ("OTHER__RADIO__TX_POWER_DBM", "-20"),
            ]),
        )
        .unwrap();
        assert_eq!(config.radio.batch_window_ms, 250);
        assert_eq!(config.server.log_level, "debug");
        assert!(config.server.production);
        assert_eq!(config.radio.tx_power_dbm, 1);
    }

    #[test]
    fn test_invalid_environment_value_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_with_env(
            Some(&dir.path().join("absent.toml")),
            env(&[("PROXITAG__RADIO__TX_POWER_DBM", "99")]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError {
                field: "radio.tx_power_dbm",
                ..
            }
        ));
    }

    #[test]
    fn test_all_validation_errors_are_collected() {
        let mut config = Config::default();
        config.radio.tx_power_dbm = 50;
        config.server.bind_address = "nowhere".to_string();

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_explicit_identity_path_wins() {
        let config = IdentityConfig {
            path: Some(PathBuf::from("/tmp/id.json")),
        };
        assert_eq!(config.resolved_path().unwrap(), PathBuf::from("/tmp/id.json"));
    }

    #[test]
    fn test_validation_error_converts_to_proxitag_error() {
        let err: crate::ProxitagError = ConfigError::ValidationError {
            field: "server.bind_address",
            message: "bad".to_string(),
        }
        .into();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("server.bind_address"));
    }
}
