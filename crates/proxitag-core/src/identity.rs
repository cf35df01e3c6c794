//! Persistent storage for this device's own identifier.
//!
//! A single JSON file, by default `/var/lib/proxitag/identity.json` on Linux
//! and the platform data directory elsewhere.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::identifier::Identifier;

const IDENTITY_FILE: &str = "identity.json";

/// On-disk identity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityRecord {
    own_id: Identifier,
    updated_at_utc: DateTime<Utc>,
}

/// Get the default data directory.
///
/// On Linux: `/var/lib/proxitag/`
/// Elsewhere: the platform data directory for `proxitag`.
///
/// # Errors
///
/// Returns an error if no data directory can be determined.
pub fn default_data_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/var/lib/proxitag"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs = directories::ProjectDirs::from("", "", "proxitag").ok_or_else(|| {
            Error::PersistenceError("Cannot determine data directory".into())
        })?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Get the default identity file path.
///
/// # Errors
///
/// Returns an error if no data directory can be determined.
pub fn default_identity_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(IDENTITY_FILE))
}

/// File-backed store for the own identifier.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    /// Create a store backed by `path`.
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the stored identifier, generating and persisting `BLE-<nnnn>`
    /// if none is stored or the stored one is blank.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or written.
    pub fn get_or_create(&self) -> Result<Identifier> {
        if let Some(record) = self.load()? {
            if !record.own_id.is_empty() {
                return Ok(record.own_id);
            }
        }
        let generated = generate_identifier();
        self.save(&generated)?;
        info!(own_id = %generated, "Generated new own identifier");
        Ok(generated)
    }

    /// Sanitize and persist `value`, returning the canonical identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn set(&self, value: &str) -> Result<Identifier> {
        let id = Identifier::new(value);
        self.save(&id)?;
        Ok(id)
    }

    fn load(&self) -> Result<Option<IdentityRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let record: IdentityRecord = serde_json::from_str(&content).map_err(|e| {
            Error::PersistenceError(format!("Failed to parse {}: {e}", self.path.display()))
        })?;
        Ok(Some(record))
    }

    fn save(&self, id: &Identifier) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let record = IdentityRecord {
            own_id: id.clone(),
            updated_at_utc: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&record)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

fn generate_identifier() -> Identifier {
    let number: u16 = rand::thread_rng().gen_range(1000..=9999);
    Identifier::new(&format!("BLE-{number}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> IdentityStore {
        IdentityStore::new(dir.path().join("nested").join(IDENTITY_FILE))
    }

    #[test]
    fn test_get_or_create_generates_default() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let id = store.get_or_create().unwrap();
        let text = id.as_str();
        assert!(text.starts_with("BLE-"));
        let number: u16 = text["BLE-".len()..].parse().unwrap();
        assert!((1000..=9999).contains(&number));
        assert!(store.path().exists());
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let first = store.get_or_create().unwrap();
        let second = store_in(&dir).get_or_create().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_set_sanitizes_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let id = store.set("  my phone!! ").unwrap();
        assert_eq!(id.as_str(), "myphone");
        assert_eq!(store.get_or_create().unwrap().as_str(), "myphone");
    }

    #[test]
    fn test_blank_stored_identifier_is_regenerated() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert!(store.set("***").unwrap().is_empty());
        let id = store.get_or_create().unwrap();
        assert!(id.as_str().starts_with("BLE-"));
    }

    #[test]
    fn test_corrupt_file_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(IDENTITY_FILE);
        std::fs::write(&path, "not json").unwrap();

        let err = IdentityStore::new(path).get_or_create().unwrap_err();
        assert!(err.is_io_error());
    }

    #[test]
    fn test_default_identity_path_ends_with_file_name() {
        let path = default_identity_path().unwrap();
        assert!(path.ends_with(IDENTITY_FILE));
    }
}
