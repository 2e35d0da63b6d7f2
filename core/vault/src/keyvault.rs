//! The private-key custody state machine.
//!
//! The vault owns the private key exclusively. Its state is derived, not
//! cached: `NoKey` when the public key file is absent, otherwise the
//! persisted custody flag decides between the plaintext file, the
//! passphrase-protected file, and the custodian-wrapped mode.

use std::fmt;

use tracing::info;
use zeroize::Zeroizing;

use haven_common::{Capabilities, CustodianError, CustodianKind, CustodyMode, Error, Result};
use haven_crypto::{
    deserialize_private_key, deserialize_public_key, generate_key_pair, serialize_private_key,
    serialize_public_key, KeyPair, RsaPrivateKey, RsaPublicKey, MIN_RSA_BITS,
};
use haven_storage::{secure_delete, write_atomic, ConfigStore, StorePaths, MODE_PRIVATE, MODE_PUBLIC};

use crate::custodian::{CustodianHandle, KeyCustodian};

/// Modulus size used for newly generated key pairs.
pub const DEFAULT_RSA_BITS: usize = MIN_RSA_BITS;

/// Minimum accepted passphrase length in characters.
pub const MIN_PASSPHRASE_LEN: usize = 8;

/// Where the private key currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustodyState {
    /// No key pair exists.
    NoKey,
    /// Private key in a plaintext PEM file.
    PlaintextFile,
    /// Private key in a passphrase-encrypted PEM file.
    PassphraseProtectedFile,
    /// Private key held by the external custodian.
    CustodianWrapped,
}

impl fmt::Display for CustodyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustodyState::NoKey => write!(f, "no key pair"),
            CustodyState::PlaintextFile => write!(f, "plaintext file"),
            CustodyState::PassphraseProtectedFile => write!(f, "passphrase-protected file"),
            CustodyState::CustodianWrapped => write!(f, "custodian-wrapped"),
        }
    }
}

/// Owner of the private key and its custody transitions.
pub struct KeyVault {
    paths: StorePaths,
    config: ConfigStore,
    caps: Capabilities,
    custodian: Option<Box<dyn KeyCustodian>>,
}

impl KeyVault {
    /// Create a vault over the given paths.
    ///
    /// The custodian is injected by the caller; `None` disables the
    /// custodian-wrapped transitions.
    pub fn new(
        paths: StorePaths,
        caps: Capabilities,
        custodian: Option<Box<dyn KeyCustodian>>,
    ) -> Self {
        let config = ConfigStore::new(paths.clone(), caps);
        Self {
            paths,
            config,
            caps,
            custodian,
        }
    }

    /// The persisted configuration backing this vault.
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub(crate) fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub(crate) fn caps(&self) -> &Capabilities {
        &self.caps
    }

    /// Current custody state, derived from disk.
    pub fn state(&self) -> Result<CustodyState> {
        if !self.paths.public_key_file().exists() {
            return Ok(CustodyState::NoKey);
        }

        Ok(match self.config.load()?.custody {
            CustodyMode::Plaintext => CustodyState::PlaintextFile,
            CustodyMode::Passphrase => CustodyState::PassphraseProtectedFile,
            CustodyMode::Custodian => CustodyState::CustodianWrapped,
        })
    }

    /// Whether a private key file is currently on disk.
    pub fn private_key_on_disk(&self) -> bool {
        self.paths.private_key_file().exists()
    }

    /// Generate and persist a new key pair.
    ///
    /// With a passphrase the private key file is passphrase-protected,
    /// otherwise it is plaintext. The public key is always persisted
    /// unprotected.
    ///
    /// # Errors
    /// - `Validation` if a key pair already exists, or if the passphrase
    ///   is shorter than [`MIN_PASSPHRASE_LEN`]
    pub fn init(&self, passphrase: Option<&str>) -> Result<()> {
        if self.state()? != CustodyState::NoKey {
            return Err(Error::Validation(
                "A key pair already exists; destroy it before initializing a new one".to_string(),
            ));
        }
        if let Some(pass) = passphrase {
            check_passphrase(pass)?;
        }

        let pair = generate_key_pair(DEFAULT_RSA_BITS)?;
        self.paths.ensure_base(&self.caps)?;
        self.write_key_files(&pair, passphrase)?;
        self.config.update(|c| {
            c.custody = if passphrase.is_some() {
                CustodyMode::Passphrase
            } else {
                CustodyMode::Plaintext
            };
            c.custodian = CustodianKind::None;
            c.custodian_handle = None;
        })?;

        info!(bits = DEFAULT_RSA_BITS, "generated new key pair");
        Ok(())
    }

    /// Load the public key.
    pub fn public_key(&self) -> Result<RsaPublicKey> {
        let path = self.paths.public_key_file();
        if !path.exists() {
            return Err(Error::NotFound(
                "No key pair found; initialize the vault first".to_string(),
            ));
        }
        let pem = std::fs::read_to_string(path)?;
        deserialize_public_key(&pem)
    }

    /// Load the private key, whichever custody mode is active.
    ///
    /// In the passphrase mode a missing or wrong passphrase is a `Crypto`
    /// error; in the custodian mode the custodian's authentication outcome
    /// is surfaced unchanged.
    pub fn load_private_key(&self, passphrase: Option<&str>) -> Result<RsaPrivateKey> {
        match self.state()? {
            CustodyState::NoKey => Err(Error::NotFound(
                "No key pair found; initialize the vault first".to_string(),
            )),
            CustodyState::PlaintextFile => {
                let pem = self.read_private_pem()?;
                deserialize_private_key(&pem, None)
            }
            CustodyState::PassphraseProtectedFile => {
                let pass = passphrase.ok_or_else(|| {
                    Error::Crypto("passphrase required to unlock the private key".to_string())
                })?;
                let pem = self.read_private_pem()?;
                deserialize_private_key(&pem, Some(pass))
            }
            CustodyState::CustodianWrapped => {
                let custodian = self.custodian()?;
                let handle = self.wrapped_handle()?;
                let recovered = custodian.unwrap_key(&handle)?;
                let pem = std::str::from_utf8(recovered.as_bytes()).map_err(|_| {
                    Error::Crypto("custodian returned malformed key material".to_string())
                })?;
                deserialize_private_key(pem, None)
            }
        }
    }

    /// Hand the private key to the custodian and erase the local copy.
    pub fn enable_custodian(&self, passphrase: Option<&str>) -> Result<()> {
        match self.state()? {
            CustodyState::NoKey => Err(Error::NotFound(
                "No key pair found; initialize the vault first".to_string(),
            )),
            CustodyState::CustodianWrapped => Err(Error::Validation(
                "Custodian protection is already enabled".to_string(),
            )),
            CustodyState::PlaintextFile | CustodyState::PassphraseProtectedFile => {
                let custodian = self.custodian()?;
                if !custodian.is_available() {
                    return Err(CustodianError::Unavailable(
                        "custodian backend is not available".to_string(),
                    )
                    .into());
                }

                let private = self.load_private_key(passphrase)?;
                let pem = serialize_private_key(&private, None)?;
                let handle = custodian.wrap(pem.as_bytes())?;

                let kind = custodian.kind();
                self.config.update(|c| {
                    c.custody = CustodyMode::Custodian;
                    c.custodian = kind;
                    c.custodian_handle = Some(handle.as_str().to_string());
                })?;
                secure_delete(&self.paths.private_key_file())?;

                info!(custodian = %kind, "private key moved to custodian");
                Ok(())
            }
        }
    }

    /// Recover the private key from the custodian into a plaintext file
    /// and erase the custodian's copy.
    pub fn disable_custodian(&self) -> Result<()> {
        if self.state()? != CustodyState::CustodianWrapped {
            return Err(Error::Validation(
                "Custodian protection is not enabled".to_string(),
            ));
        }

        let custodian = self.custodian()?;
        let handle = self.wrapped_handle()?;
        let recovered = custodian.unwrap_key(&handle)?;

        write_atomic(
            &self.paths.private_key_file(),
            recovered.as_bytes(),
            MODE_PRIVATE,
            &self.caps,
        )?;
        self.config.update(|c| {
            c.custody = CustodyMode::Plaintext;
            c.custodian = CustodianKind::None;
            c.custodian_handle = None;
        })?;
        custodian.erase(&handle)?;

        info!("private key recovered from custodian");
        Ok(())
    }

    /// Securely erase all private key material, from any state.
    pub fn destroy(&self) -> Result<()> {
        let config = self.config.load()?;
        if let Some(handle) = &config.custodian_handle {
            let custodian = self.custodian()?;
            custodian.erase(&CustodianHandle::new(handle.clone()))?;
        }

        secure_delete(&self.paths.private_key_file())?;
        let public = self.paths.public_key_file();
        if public.exists() {
            std::fs::remove_file(&public)?;
        }

        self.config.update(|c| {
            c.custody = CustodyMode::Plaintext;
            c.custodian = CustodianKind::None;
            c.custodian_handle = None;
        })?;

        info!("key pair destroyed");
        Ok(())
    }

    /// Persist a freshly generated pair under the current custody mode.
    ///
    /// In custodian mode the new private key goes straight to the
    /// custodian; no plaintext copy touches disk.
    pub(crate) fn replace_key_pair(&self, pair: &KeyPair, passphrase: Option<&str>) -> Result<()> {
        match self.state()? {
            CustodyState::NoKey => Err(Error::NotFound(
                "No key pair found; initialize the vault first".to_string(),
            )),
            CustodyState::PlaintextFile => self.write_key_files(pair, None),
            CustodyState::PassphraseProtectedFile => {
                let pass = passphrase.ok_or_else(|| {
                    Error::Crypto("passphrase required to protect the new private key".to_string())
                })?;
                self.write_key_files(pair, Some(pass))
            }
            CustodyState::CustodianWrapped => {
                let custodian = self.custodian()?;
                let old_handle = self.wrapped_handle()?;

                let pem = serialize_private_key(pair.private(), None)?;
                let new_handle = custodian.wrap(pem.as_bytes())?;

                let public_pem = serialize_public_key(pair.public())?;
                write_atomic(
                    &self.paths.public_key_file(),
                    public_pem.as_bytes(),
                    MODE_PUBLIC,
                    &self.caps,
                )?;
                self.config
                    .update(|c| c.custodian_handle = Some(new_handle.as_str().to_string()))?;

                if old_handle != new_handle {
                    custodian.erase(&old_handle)?;
                }
                Ok(())
            }
        }
    }

    fn write_key_files(&self, pair: &KeyPair, passphrase: Option<&str>) -> Result<()> {
        let public_pem = serialize_public_key(pair.public())?;
        let private_pem = serialize_private_key(pair.private(), passphrase)?;

        write_atomic(
            &self.paths.public_key_file(),
            public_pem.as_bytes(),
            MODE_PUBLIC,
            &self.caps,
        )?;
        write_atomic(
            &self.paths.private_key_file(),
            private_pem.as_bytes(),
            MODE_PRIVATE,
            &self.caps,
        )
    }

    fn read_private_pem(&self) -> Result<Zeroizing<String>> {
        let path = self.paths.private_key_file();
        if !path.exists() {
            return Err(Error::NotFound("Private key file not found".to_string()));
        }
        Ok(Zeroizing::new(std::fs::read_to_string(path)?))
    }

    fn custodian(&self) -> Result<&dyn KeyCustodian> {
        self.custodian.as_deref().ok_or_else(|| {
            CustodianError::Unavailable("no custodian configured for this vault".to_string()).into()
        })
    }

    fn wrapped_handle(&self) -> Result<CustodianHandle> {
        self.config
            .load()?
            .custodian_handle
            .map(CustodianHandle::new)
            .ok_or_else(|| {
                Error::Storage(
                    "custody mode is custodian but no wrapped-key handle is recorded".to_string(),
                )
            })
    }
}

fn check_passphrase(pass: &str) -> Result<()> {
    if pass.chars().count() < MIN_PASSPHRASE_LEN {
        return Err(Error::Validation(format!(
            "Passphrase must be at least {} characters",
            MIN_PASSPHRASE_LEN
        )));
    }
    Ok(())
}
