//! The secret store: a name-to-record mapping with atomic durable saves.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use haven_common::{Capabilities, EncryptedSecret, Error, Result, SecretName};

use crate::atomic::{write_atomic, MODE_PRIVATE};
use crate::paths::StorePaths;

/// Atomic durable CRUD over the name → [`EncryptedSecret`] mapping.
///
/// The mapping lives in one JSON object file. A `BTreeMap` keeps listings
/// lexicographic without a separate sort of the persisted form. No
/// inter-process locking is provided; concurrent writers from separate
/// processes are last-write-wins. Within one process, an internal mutex
/// serializes each load-mutate-save sequence per store instance.
pub struct SecretStore {
    paths: StorePaths,
    caps: Capabilities,
    write_lock: Mutex<()>,
}

impl SecretStore {
    /// Create a store over the given paths.
    pub fn new(paths: StorePaths, caps: Capabilities) -> Self {
        Self {
            paths,
            caps,
            write_lock: Mutex::new(()),
        }
    }

    /// Load the full mapping.
    ///
    /// A missing backing file is an empty mapping; a present but malformed
    /// file is a `Storage` error.
    pub fn load(&self) -> Result<BTreeMap<String, EncryptedSecret>> {
        let path = self.paths.secrets_file();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let data = std::fs::read_to_string(&path)?;
        serde_json::from_str(&data)
            .map_err(|e| Error::Storage(format!("secret store is corrupt: {}", e)))
    }

    /// Durably replace the full mapping, all-or-nothing.
    pub fn save(&self, secrets: &BTreeMap<String, EncryptedSecret>) -> Result<()> {
        self.paths.ensure_base(&self.caps)?;
        let data = serde_json::to_vec_pretty(secrets)?;
        write_atomic(&self.paths.secrets_file(), &data, MODE_PRIVATE, &self.caps)
    }

    /// Add a record under `name`.
    ///
    /// # Errors
    /// - `Validation` if the name is already present and `overwrite` is false
    pub fn add(&self, name: &SecretName, record: EncryptedSecret, overwrite: bool) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut secrets = self.load()?;
        if secrets.contains_key(name.as_str()) && !overwrite {
            return Err(Error::Validation(format!(
                "Secret '{}' already exists; pass overwrite to replace it",
                name
            )));
        }

        secrets.insert(name.as_str().to_string(), record);
        self.save(&secrets)?;
        debug!(name = %name, "stored secret");
        Ok(())
    }

    /// Fetch the record for `name`.
    pub fn get(&self, name: &SecretName) -> Result<EncryptedSecret> {
        let secrets = self.load()?;
        secrets
            .get(name.as_str())
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Secret '{}' not found", name)))
    }

    /// Remove the record for `name`.
    pub fn delete(&self, name: &SecretName) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut secrets = self.load()?;
        if secrets.remove(name.as_str()).is_none() {
            return Err(Error::NotFound(format!("Secret '{}' not found", name)));
        }

        self.save(&secrets)?;
        debug!(name = %name, "deleted secret");
        Ok(())
    }

    /// All stored names, lexicographically sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self.load()?.into_keys().collect())
    }

    /// Names containing `query`, case-insensitive, sorted.
    pub fn search(&self, query: &str) -> Result<Vec<String>> {
        let needle = query.to_lowercase();
        Ok(self
            .load()?
            .into_keys()
            .filter(|name| name.to_lowercase().contains(&needle))
            .collect())
    }

    /// Number of stored secrets.
    pub fn count(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (SecretStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = SecretStore::new(StorePaths::new(temp.path()), Capabilities::detect());
        (store, temp)
    }

    fn record(tag: &str) -> EncryptedSecret {
        EncryptedSecret {
            enc_key: format!("k-{tag}"),
            nonce: format!("n-{tag}"),
            ciphertext: format!("c-{tag}"),
        }
    }

    fn name(s: &str) -> SecretName {
        SecretName::new(s).unwrap()
    }

    #[test]
    fn test_load_missing_is_empty() {
        let (store, _temp) = test_store();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_add_and_get() {
        let (store, _temp) = test_store();
        store.add(&name("API_KEY"), record("a"), false).unwrap();
        assert_eq!(store.get(&name("API_KEY")).unwrap(), record("a"));
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let (store, _temp) = test_store();
        store.add(&name("dup"), record("a"), false).unwrap();

        assert!(matches!(
            store.add(&name("dup"), record("b"), false),
            Err(Error::Validation(_))
        ));
        // The original record survives the rejected add.
        assert_eq!(store.get(&name("dup")).unwrap(), record("a"));
    }

    #[test]
    fn test_add_overwrite() {
        let (store, _temp) = test_store();
        store.add(&name("key"), record("old"), false).unwrap();
        store.add(&name("key"), record("new"), true).unwrap();
        assert_eq!(store.get(&name("key")).unwrap(), record("new"));
    }

    #[test]
    fn test_get_missing_not_found() {
        let (store, _temp) = test_store();
        assert!(matches!(
            store.get(&name("absent")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_delete() {
        let (store, _temp) = test_store();
        store.add(&name("gone"), record("a"), false).unwrap();
        store.delete(&name("gone")).unwrap();

        assert!(matches!(
            store.get(&name("gone")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_missing_not_found() {
        let (store, _temp) = test_store();
        assert!(matches!(
            store.delete(&name("absent")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_list_sorted() {
        let (store, _temp) = test_store();
        for n in ["zeta", "Alpha", "beta"] {
            store.add(&name(n), record(n), false).unwrap();
        }
        assert_eq!(store.list().unwrap(), vec!["Alpha", "beta", "zeta"]);
    }

    #[test]
    fn test_search_case_insensitive() {
        let (store, _temp) = test_store();
        for n in ["DB_PASSWORD", "db_host", "api_key"] {
            store.add(&name(n), record(n), false).unwrap();
        }
        assert_eq!(store.search("db").unwrap(), vec!["DB_PASSWORD", "db_host"]);
        assert!(store.search("missing").unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_store_is_storage_error() {
        let (store, temp) = test_store();
        std::fs::write(temp.path().join("secrets.json"), b"[1, 2, 3]").unwrap();
        assert!(matches!(store.load(), Err(Error::Storage(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_save_leaves_store_unchanged() {
        use std::os::unix::fs::PermissionsExt;

        let (store, temp) = test_store();
        store.add(&name("keep"), record("a"), false).unwrap();
        let before = std::fs::read(temp.path().join("secrets.json")).unwrap();

        std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o500)).unwrap();

        // Permission bits do not bind root; nothing to inject in that case.
        if std::fs::write(temp.path().join("probe"), b"").is_ok() {
            std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o700)).unwrap();
            return;
        }

        let result = store.add(&name("other"), record("b"), false);
        std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o700)).unwrap();

        assert!(result.is_err());
        let after = std::fs::read(temp.path().join("secrets.json")).unwrap();
        assert_eq!(before, after);
    }

    #[cfg(unix)]
    #[test]
    fn test_store_file_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (store, temp) = test_store();
        store.add(&name("perm"), record("a"), false).unwrap();

        let mode = std::fs::metadata(temp.path().join("secrets.json"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }
}
