//! Persisted vault configuration.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use haven_common::{Capabilities, CustodianKind, CustodyMode, Error, Result};

use crate::atomic::{write_atomic, MODE_PRIVATE};
use crate::paths::StorePaths;

/// Current configuration format version.
pub const CONFIG_VERSION: u32 = 1;

fn default_version() -> u32 {
    CONFIG_VERSION
}

/// The small set of flags persisted alongside the secrets.
///
/// Read-modify-write through [`ConfigStore::update`]; no long-lived cache
/// is kept across invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Configuration format version.
    #[serde(default = "default_version")]
    pub version: u32,

    /// How the private key is persisted. Meaningful only while a key
    /// pair exists.
    pub custody: CustodyMode,

    /// Which custodian backend holds the key in custodian mode.
    #[serde(default)]
    pub custodian: CustodianKind,

    /// Opaque handle returned by the custodian's wrap operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custodian_handle: Option<String>,

    /// Free-form integration flags for outer tooling.
    #[serde(default)]
    pub integrations: BTreeMap<String, bool>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp.
    pub modified_at: DateTime<Utc>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            version: CONFIG_VERSION,
            custody: CustodyMode::Plaintext,
            custodian: CustodianKind::None,
            custodian_handle: None,
            integrations: BTreeMap::new(),
            created_at: now,
            modified_at: now,
        }
    }
}

/// Atomic persistence of [`VaultConfig`].
pub struct ConfigStore {
    paths: StorePaths,
    caps: Capabilities,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Create a config store over the given paths.
    pub fn new(paths: StorePaths, caps: Capabilities) -> Self {
        Self {
            paths,
            caps,
            write_lock: Mutex::new(()),
        }
    }

    /// Load the configuration; a missing file yields the defaults.
    pub fn load(&self) -> Result<VaultConfig> {
        let path = self.paths.config_file();
        if !path.exists() {
            return Ok(VaultConfig::default());
        }

        let data = std::fs::read_to_string(&path)?;
        serde_json::from_str(&data)
            .map_err(|e| Error::Storage(format!("configuration is corrupt: {}", e)))
    }

    /// Durably replace the configuration.
    pub fn save(&self, config: &VaultConfig) -> Result<()> {
        self.paths.ensure_base(&self.caps)?;
        let data = serde_json::to_vec_pretty(config)?;
        write_atomic(&self.paths.config_file(), &data, MODE_PRIVATE, &self.caps)
    }

    /// Read-modify-write under the instance lock; stamps `modified_at`.
    pub fn update(&self, mutate: impl FnOnce(&mut VaultConfig)) -> Result<VaultConfig> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut config = self.load()?;
        mutate(&mut config);
        config.modified_at = Utc::now();
        self.save(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config_store() -> (ConfigStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(StorePaths::new(temp.path()), Capabilities::detect());
        (store, temp)
    }

    #[test]
    fn test_load_missing_is_default() {
        let (store, _temp) = test_config_store();
        let config = store.load().unwrap();
        assert_eq!(config.custody, CustodyMode::Plaintext);
        assert_eq!(config.custodian, CustodianKind::None);
        assert!(config.custodian_handle.is_none());
    }

    #[test]
    fn test_update_persists() {
        let (store, _temp) = test_config_store();
        store
            .update(|c| {
                c.custody = CustodyMode::Custodian;
                c.custodian = CustodianKind::PlatformBiometric;
                c.custodian_handle = Some("item-1".to_string());
            })
            .unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.custody, CustodyMode::Custodian);
        assert_eq!(reloaded.custodian, CustodianKind::PlatformBiometric);
        assert_eq!(reloaded.custodian_handle.as_deref(), Some("item-1"));
    }

    #[test]
    fn test_update_stamps_modified_at() {
        let (store, _temp) = test_config_store();
        let first = store.update(|_| {}).unwrap();
        let second = store
            .update(|c| c.custody = CustodyMode::Passphrase)
            .unwrap();
        assert!(second.modified_at >= first.modified_at);
    }

    #[test]
    fn test_corrupt_config_is_storage_error() {
        let (store, temp) = test_config_store();
        std::fs::write(temp.path().join("config.json"), b"not json").unwrap();
        assert!(matches!(store.load(), Err(Error::Storage(_))));
    }
}
