//! External custody of the private key.
//!
//! A custodian holds a wrapped copy of the private key behind a platform
//! authentication ceremony. The ceremony, and the roughly 30-second
//! timeout behind it, belong to the platform; this module only surfaces
//! the outcome. Backend selection is an explicit factory over the closed
//! [`CustodianKind`] set rather than import-time detection.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use haven_common::{Capabilities, CustodianError, CustodianKind, SecretBytes};

/// Opaque reference to a wrapped key held by a custodian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustodianHandle(String);

impl CustodianHandle {
    /// Create a handle from its persisted string form.
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// The persisted string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CustodianHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contract between the vault and an external key custodian.
///
/// `wrap` and `unwrap_key` may invoke the platform's authentication
/// ceremony and block until it resolves; callers needing cancellation
/// must wrap these calls at their own boundary.
pub trait KeyCustodian: Send + Sync {
    /// Which closed backend kind this custodian implements.
    fn kind(&self) -> CustodianKind;

    /// Whether the backend can be used at all in this environment.
    fn is_available(&self) -> bool;

    /// Whether a wrapped key is currently held.
    fn is_enabled(&self) -> bool;

    /// Take custody of the given private key bytes.
    fn wrap(&self, private_key: &[u8]) -> Result<CustodianHandle, CustodianError>;

    /// Recover the private key bytes behind the handle.
    fn unwrap_key(&self, handle: &CustodianHandle) -> Result<SecretBytes, CustodianError>;

    /// Discard the wrapped copy behind the handle.
    fn erase(&self, handle: &CustodianHandle) -> Result<(), CustodianError>;
}

/// Resolve a custodian backend for the requested kind.
///
/// `CustodianKind::None` means "whichever the platform offers", with the
/// fallback order platform-biometric, then FIDO2. Requesting a specific
/// kind never falls back.
pub fn select_custodian(
    requested: CustodianKind,
    caps: &Capabilities,
) -> Result<Box<dyn KeyCustodian>, CustodianError> {
    match requested {
        CustodianKind::PlatformBiometric => platform_biometric(caps),
        CustodianKind::Fido2 => fido2(caps),
        CustodianKind::None => platform_biometric(caps).or_else(|_| fido2(caps)).map_err(|_| {
            CustodianError::Unavailable(
                "no custodian backend available on this platform".to_string(),
            )
        }),
    }
}

#[cfg(target_os = "macos")]
fn platform_biometric(caps: &Capabilities) -> Result<Box<dyn KeyCustodian>, CustodianError> {
    if caps.platform_biometric {
        Ok(Box::new(keychain::KeychainCustodian::new()))
    } else {
        Err(CustodianError::Unavailable(
            "platform biometric custody is disabled in this build".to_string(),
        ))
    }
}

#[cfg(not(target_os = "macos"))]
fn platform_biometric(_caps: &Capabilities) -> Result<Box<dyn KeyCustodian>, CustodianError> {
    Err(CustodianError::Unavailable(
        "platform biometric custody is only available on macOS".to_string(),
    ))
}

fn fido2(_caps: &Capabilities) -> Result<Box<dyn KeyCustodian>, CustodianError> {
    Err(CustodianError::Unavailable(
        "no FIDO2 backend compiled into this build".to_string(),
    ))
}

/// In-process custodian for tests and embedding hosts.
///
/// Holds wrapped keys in memory with no authentication ceremony; all
/// custody is lost when the instance drops.
#[derive(Default)]
pub struct MemoryCustodian {
    items: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCustodian {
    /// Create an empty in-memory custodian.
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyCustodian for MemoryCustodian {
    fn kind(&self) -> CustodianKind {
        CustodianKind::None
    }

    fn is_available(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        !self.items().is_empty()
    }

    fn wrap(&self, private_key: &[u8]) -> Result<CustodianHandle, CustodianError> {
        let mut items = self.items();
        let handle = format!("memory-{}", items.len());
        items.insert(handle.clone(), private_key.to_vec());
        Ok(CustodianHandle::new(handle))
    }

    fn unwrap_key(&self, handle: &CustodianHandle) -> Result<SecretBytes, CustodianError> {
        self.items()
            .get(handle.as_str())
            .map(|bytes| SecretBytes::new(bytes.clone()))
            .ok_or(CustodianError::AuthChanged)
    }

    fn erase(&self, handle: &CustodianHandle) -> Result<(), CustodianError> {
        self.items().remove(handle.as_str());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// macOS keychain backend
// ---------------------------------------------------------------------------

#[cfg(target_os = "macos")]
mod keychain {
    use super::{CustodianHandle, KeyCustodian};
    use haven_common::{CustodianError, CustodianKind, SecretBytes};
    use security_framework::passwords::{
        delete_generic_password, get_generic_password, set_generic_password,
    };

    const SERVICE_NAME: &str = "haven.private-key";
    const ACCOUNT_NAME: &str = "default";

    /// Keychain-backed custodian.
    ///
    /// The wrapped key is a generic-password item; the OS runs its own
    /// Touch ID / Face ID ceremony when the item is read.
    pub struct KeychainCustodian;

    impl KeychainCustodian {
        pub fn new() -> Self {
            Self
        }
    }

    /// Classify a Security.framework error into the closed custodian set.
    fn classify(err: security_framework::base::Error) -> CustodianError {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("cancel") || msg.contains("-128") {
            CustodianError::Cancelled
        } else if lower.contains("time") {
            CustodianError::Timeout
        } else if lower.contains("not found") || msg.contains("-25300") {
            CustodianError::AuthChanged
        } else if lower.contains("auth") {
            CustodianError::Failed
        } else {
            CustodianError::Unavailable(msg)
        }
    }

    impl KeyCustodian for KeychainCustodian {
        fn kind(&self) -> CustodianKind {
            CustodianKind::PlatformBiometric
        }

        fn is_available(&self) -> bool {
            true
        }

        fn is_enabled(&self) -> bool {
            get_generic_password(SERVICE_NAME, ACCOUNT_NAME).is_ok()
        }

        fn wrap(&self, private_key: &[u8]) -> Result<CustodianHandle, CustodianError> {
            // set_generic_password replaces any existing item.
            set_generic_password(SERVICE_NAME, ACCOUNT_NAME, private_key).map_err(classify)?;
            Ok(CustodianHandle::new(ACCOUNT_NAME))
        }

        fn unwrap_key(&self, handle: &CustodianHandle) -> Result<SecretBytes, CustodianError> {
            get_generic_password(SERVICE_NAME, handle.as_str())
                .map(SecretBytes::new)
                .map_err(classify)
        }

        fn erase(&self, handle: &CustodianHandle) -> Result<(), CustodianError> {
            match delete_generic_password(SERVICE_NAME, handle.as_str()) {
                Ok(()) => Ok(()),
                Err(err) => match classify(err) {
                    // Nothing stored is a successful erase.
                    CustodianError::AuthChanged => Ok(()),
                    other => Err(other),
                },
            }
        }
    }
}
