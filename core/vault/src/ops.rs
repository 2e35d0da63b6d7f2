//! High-level operations over the engine, store, and vault.
//!
//! [`Haven`] is the surface command-line and embedding hosts talk to; it
//! wires validation, encryption, and persistence together so callers
//! never touch key material directly.

use std::path::Path;

use tracing::debug;

use haven_common::{Capabilities, CustodianKind, Error, Result, SecretBytes, SecretName};
use haven_crypto::{decrypt, encrypt};
use haven_storage::{SecretStore, StorePaths};

use crate::backup;
use crate::custodian::KeyCustodian;
use crate::keyvault::{CustodyState, KeyVault};
use crate::rotation::{KeyRotationCoordinator, RotationOutcome};

/// Snapshot of the vault for status reporting.
#[derive(Debug)]
pub struct VaultStatus {
    /// Current custody state.
    pub state: CustodyState,
    /// Configured custodian backend.
    pub custodian: CustodianKind,
    /// Number of stored secrets.
    pub secret_count: usize,
    /// Whether a private key file is on disk.
    pub private_key_on_disk: bool,
}

/// Facade over the secret store and the key vault.
pub struct Haven {
    paths: StorePaths,
    caps: Capabilities,
    store: SecretStore,
    vault: KeyVault,
}

impl Haven {
    /// Open a vault at the given paths.
    pub fn open(
        paths: StorePaths,
        caps: Capabilities,
        custodian: Option<Box<dyn KeyCustodian>>,
    ) -> Self {
        let store = SecretStore::new(paths.clone(), caps);
        let vault = KeyVault::new(paths.clone(), caps, custodian);
        Self {
            paths,
            caps,
            store,
            vault,
        }
    }

    /// The underlying secret store.
    pub fn store(&self) -> &SecretStore {
        &self.store
    }

    /// The underlying key vault.
    pub fn vault(&self) -> &KeyVault {
        &self.vault
    }

    /// Generate the key pair. See [`KeyVault::init`].
    pub fn init(&self, passphrase: Option<&str>) -> Result<()> {
        self.vault.init(passphrase)
    }

    /// Encrypt and store a secret value.
    ///
    /// # Errors
    /// - `Validation` for an empty value or a duplicate name without
    ///   `overwrite`
    /// - `NotFound` if no key pair exists
    pub fn add_secret(&self, name: &SecretName, value: &[u8], overwrite: bool) -> Result<()> {
        if value.is_empty() {
            return Err(Error::Validation(
                "Secret value cannot be empty".to_string(),
            ));
        }

        let public = self.vault.public_key()?;
        let record = encrypt(value, &public)?;
        self.store.add(name, record, overwrite)
    }

    /// Retrieve and decrypt a secret value.
    ///
    /// The record is looked up before the private key is loaded, so a
    /// missing name never triggers a custodian authentication ceremony.
    pub fn get_secret(&self, name: &SecretName, passphrase: Option<&str>) -> Result<SecretBytes> {
        let record = self.store.get(name)?;
        let private = self.vault.load_private_key(passphrase)?;
        Ok(SecretBytes::new(decrypt(&record, &private)?))
    }

    /// Delete a stored secret.
    pub fn delete_secret(&self, name: &SecretName) -> Result<()> {
        self.store.delete(name)
    }

    /// All stored names, sorted.
    pub fn list_secrets(&self) -> Result<Vec<String>> {
        self.store.list()
    }

    /// Names matching a case-insensitive substring, sorted.
    pub fn search_secrets(&self, query: &str) -> Result<Vec<String>> {
        self.store.search(query)
    }

    /// Rotate the key pair and re-encrypt every secret.
    pub fn rotate(&self, passphrase: Option<&str>) -> Result<RotationOutcome> {
        KeyRotationCoordinator::new(&self.store, &self.vault).rotate(passphrase)
    }

    /// Move the private key into custodian custody.
    pub fn enable_custodian(&self, passphrase: Option<&str>) -> Result<()> {
        self.vault.enable_custodian(passphrase)
    }

    /// Recover the private key from the custodian.
    pub fn disable_custodian(&self) -> Result<()> {
        self.vault.disable_custodian()
    }

    /// Securely erase all private key material.
    pub fn destroy_keys(&self) -> Result<()> {
        self.vault.destroy()
    }

    /// Export the vault files into a portable archive.
    pub fn export_archive(&self, dest: &Path) -> Result<()> {
        backup::export_archive(&self.paths, dest)
    }

    /// Import vault files from a portable archive.
    pub fn import_archive(&self, src: &Path, overwrite: bool) -> Result<Vec<String>> {
        backup::import_archive(&self.paths, &self.caps, src, overwrite)
    }

    /// Summarize the vault for status output.
    pub fn status(&self) -> Result<VaultStatus> {
        let state = self.vault.state()?;
        let config = self.vault.config().load()?;
        let secret_count = self.store.count()?;
        debug!(%state, secret_count, "collected status");

        Ok(VaultStatus {
            state,
            custodian: config.custodian,
            secret_count,
            private_key_on_disk: self.vault.private_key_on_disk(),
        })
    }
}
