//! Re-encryption of the full secret set under a fresh key pair.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::info;

use haven_common::{Error, Result, SecretBytes};
use haven_crypto::{decrypt, encrypt, generate_key_pair, serialize_private_key};
use haven_storage::SecretStore;

use crate::backup;
use crate::keyvault::{CustodyState, KeyVault, DEFAULT_RSA_BITS};

/// Result of a completed rotation.
#[derive(Debug)]
pub struct RotationOutcome {
    /// Number of secrets re-encrypted.
    pub rotated: usize,
    /// Where the previous key pair was backed up.
    pub backup_dir: PathBuf,
}

/// Orchestrates a full rotation: every stored secret is decrypted with
/// the current key and re-encrypted under a freshly generated pair.
pub struct KeyRotationCoordinator<'a> {
    store: &'a SecretStore,
    vault: &'a KeyVault,
}

impl<'a> KeyRotationCoordinator<'a> {
    /// Create a coordinator over the given store and vault.
    pub fn new(store: &'a SecretStore, vault: &'a KeyVault) -> Self {
        Self { store, vault }
    }

    /// Rotate the key pair and every stored secret.
    ///
    /// Nothing is modified until every secret has decrypted and the
    /// previous pair is backed up. The live key pair and the live secret
    /// store are then replaced by two individually atomic writes; a crash
    /// between them leaves a new key next to old records (or the
    /// reverse) and requires manual recovery from the backup directory.
    ///
    /// # Errors
    /// - `NotFound` if no key pair exists
    /// - `Validation` if the secret set is empty
    /// - `Crypto` if any record fails to decrypt; no state is modified
    /// - `Storage` if the backup cannot be written; the live pair is
    ///   untouched
    pub fn rotate(&self, passphrase: Option<&str>) -> Result<RotationOutcome> {
        if self.vault.state()? == CustodyState::NoKey {
            return Err(Error::NotFound(
                "No key pair to rotate; initialize the vault first".to_string(),
            ));
        }

        let secrets = self.store.load()?;
        if secrets.is_empty() {
            return Err(Error::Validation(
                "Refusing to rotate an empty secret set".to_string(),
            ));
        }

        let old_private = self.vault.load_private_key(passphrase)?;

        let mut plaintexts: BTreeMap<String, SecretBytes> = BTreeMap::new();
        for (name, record) in &secrets {
            let plain = decrypt(record, &old_private).map_err(|_| {
                Error::Crypto(format!(
                    "Rotation aborted: secret '{}' could not be decrypted with the current key",
                    name
                ))
            })?;
            plaintexts.insert(name.clone(), SecretBytes::new(plain));
        }

        let new_pair = generate_key_pair(DEFAULT_RSA_BITS)?;

        let mut reencrypted = BTreeMap::new();
        for (name, plain) in &plaintexts {
            reencrypted.insert(name.clone(), encrypt(plain.as_bytes(), new_pair.public())?);
        }
        // Plaintexts zeroize here, before anything is persisted.
        drop(plaintexts);

        let old_private_pem = serialize_private_key(&old_private, None)?;
        let backup_dir = backup::write_rotation_backup(
            self.vault.paths(),
            self.vault.caps(),
            old_private_pem.as_bytes(),
        )?;

        self.vault.replace_key_pair(&new_pair, passphrase)?;
        self.store.save(&reencrypted)?;

        info!(
            rotated = reencrypted.len(),
            backup = %backup_dir.display(),
            "key rotation complete"
        );
        Ok(RotationOutcome {
            rotated: reencrypted.len(),
            backup_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custodian::MemoryCustodian;
    use haven_common::{Capabilities, EncryptedSecret, SecretName};
    use haven_storage::StorePaths;
    use tempfile::TempDir;

    struct Fixture {
        store: SecretStore,
        vault: KeyVault,
        _temp: TempDir,
    }

    fn fixture(passphrase: Option<&str>, custodian: Option<Box<dyn crate::KeyCustodian>>) -> Fixture {
        let temp = TempDir::new().unwrap();
        let paths = StorePaths::new(temp.path());
        let caps = Capabilities::detect();
        let store = SecretStore::new(paths.clone(), caps);
        let vault = KeyVault::new(paths, caps, custodian);
        vault.init(passphrase).unwrap();
        Fixture {
            store,
            vault,
            _temp: temp,
        }
    }

    fn add_plain(fix: &Fixture, name: &str, value: &[u8]) {
        let public = fix.vault.public_key().unwrap();
        let record = encrypt(value, &public).unwrap();
        fix.store
            .add(&SecretName::new(name).unwrap(), record, false)
            .unwrap();
    }

    fn get_plain(fix: &Fixture, name: &str, passphrase: Option<&str>) -> Vec<u8> {
        let record = fix.store.get(&SecretName::new(name).unwrap()).unwrap();
        let private = fix.vault.load_private_key(passphrase).unwrap();
        decrypt(&record, &private).unwrap()
    }

    #[test]
    fn test_rotate_empty_set_rejected() {
        let fix = fixture(None, None);
        let coordinator = KeyRotationCoordinator::new(&fix.store, &fix.vault);
        assert!(matches!(
            coordinator.rotate(None),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_rotate_without_keys_rejected() {
        let temp = TempDir::new().unwrap();
        let paths = StorePaths::new(temp.path());
        let caps = Capabilities::detect();
        let store = SecretStore::new(paths.clone(), caps);
        let vault = KeyVault::new(paths, caps, None);

        let coordinator = KeyRotationCoordinator::new(&store, &vault);
        assert!(matches!(coordinator.rotate(None), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_rotate_reencrypts_all_secrets() {
        let fix = fixture(None, None);
        add_plain(&fix, "A", b"1");
        add_plain(&fix, "B", b"2");

        let before: Vec<EncryptedSecret> = fix.store.load().unwrap().into_values().collect();
        let old_public = fix.vault.public_key().unwrap();

        let coordinator = KeyRotationCoordinator::new(&fix.store, &fix.vault);
        let outcome = coordinator.rotate(None).unwrap();
        assert_eq!(outcome.rotated, 2);

        // Same values, new key pair, new ciphertexts.
        assert_eq!(get_plain(&fix, "A", None), b"1");
        assert_eq!(get_plain(&fix, "B", None), b"2");
        assert_ne!(fix.vault.public_key().unwrap(), old_public);
        let after: Vec<EncryptedSecret> = fix.store.load().unwrap().into_values().collect();
        assert!(before.iter().all(|record| !after.contains(record)));
    }

    #[test]
    fn test_rotate_backs_up_previous_pair() {
        let fix = fixture(None, None);
        add_plain(&fix, "A", b"1");

        let old_private = std::fs::read(fix._temp.path().join("private.pem")).unwrap();
        let old_public = std::fs::read(fix._temp.path().join("public.pem")).unwrap();

        let coordinator = KeyRotationCoordinator::new(&fix.store, &fix.vault);
        let outcome = coordinator.rotate(None).unwrap();

        // The previous pair sits unmodified in the backup directory.
        assert_eq!(
            std::fs::read(outcome.backup_dir.join("private.pem")).unwrap(),
            old_private
        );
        assert_eq!(
            std::fs::read(outcome.backup_dir.join("public.pem")).unwrap(),
            old_public
        );
        // And the live pair moved on.
        assert_ne!(
            std::fs::read(fix._temp.path().join("private.pem")).unwrap(),
            old_private
        );
    }

    #[test]
    fn test_rotate_is_all_or_nothing() {
        let fix = fixture(None, None);
        add_plain(&fix, "good", b"value");
        add_plain(&fix, "bad", b"value");

        // Corrupt one record behind the store's back.
        let mut secrets = fix.store.load().unwrap();
        let record = secrets.get_mut("bad").unwrap();
        record.ciphertext = record.ciphertext.replace(
            record.ciphertext.chars().next().unwrap(),
            if record.ciphertext.starts_with('A') { "B" } else { "A" },
        );
        fix.store.save(&secrets).unwrap();

        let store_before = std::fs::read(fix._temp.path().join("secrets.json")).unwrap();
        let private_before = std::fs::read(fix._temp.path().join("private.pem")).unwrap();
        let public_before = std::fs::read(fix._temp.path().join("public.pem")).unwrap();

        let coordinator = KeyRotationCoordinator::new(&fix.store, &fix.vault);
        let err = coordinator.rotate(None).unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
        assert!(err.to_string().contains("bad"));

        // No new pair installed, no record changed, no backup left behind.
        assert_eq!(
            std::fs::read(fix._temp.path().join("secrets.json")).unwrap(),
            store_before
        );
        assert_eq!(
            std::fs::read(fix._temp.path().join("private.pem")).unwrap(),
            private_before
        );
        assert_eq!(
            std::fs::read(fix._temp.path().join("public.pem")).unwrap(),
            public_before
        );
        assert!(!fix._temp.path().join("backups").exists());
    }

    #[test]
    fn test_rotate_with_passphrase_custody() {
        let fix = fixture(Some("correct horse"), None);
        add_plain(&fix, "A", b"1");

        let coordinator = KeyRotationCoordinator::new(&fix.store, &fix.vault);
        coordinator.rotate(Some("correct horse")).unwrap();

        assert_eq!(get_plain(&fix, "A", Some("correct horse")), b"1");
        // The new private key is still passphrase-protected.
        assert!(matches!(
            fix.vault.load_private_key(None),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_rotate_under_custodian_custody() {
        let fix = fixture(None, Some(Box::new(MemoryCustodian::new())));
        add_plain(&fix, "A", b"1");
        fix.vault.enable_custodian(None).unwrap();

        let coordinator = KeyRotationCoordinator::new(&fix.store, &fix.vault);
        coordinator.rotate(None).unwrap();

        assert_eq!(
            fix.vault.state().unwrap(),
            crate::keyvault::CustodyState::CustodianWrapped
        );
        // No plaintext private key was left on disk by the rotation.
        assert!(!fix.vault.private_key_on_disk());
        assert_eq!(get_plain(&fix, "A", None), b"1");
    }
}
