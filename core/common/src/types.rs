//! Common types used throughout Haven.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Maximum length of a secret name in characters.
pub const MAX_NAME_LEN: usize = 100;

/// Validated name of a stored secret.
///
/// Names are restricted to ASCII alphanumerics, underscore, and hyphen,
/// 1 to 100 characters. The restriction keeps names safe to embed in file
/// paths, shell output, and log lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretName(String);

impl SecretName {
    /// Create a new SecretName from a string.
    ///
    /// # Errors
    /// - Returns error if the name is empty, longer than 100 characters,
    ///   or contains characters outside `[A-Za-z0-9_-]`
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::Validation(
                "Secret name cannot be empty".to_string(),
            ));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(crate::Error::Validation(format!(
                "Secret name exceeds maximum length of {} characters",
                MAX_NAME_LEN
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(crate::Error::Validation(format!(
                "Secret name '{}' contains invalid characters (allowed: letters, digits, underscore, hyphen)",
                name
            )));
        }
        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {} bytes])", self.0.len())
    }
}

/// One encrypted secret value as persisted at rest.
///
/// All three components are base64-encoded. `enc_key` is decryptable only
/// by the private key matching the public key used at encryption time;
/// the nonce is unique per record because the wrapped symmetric key is
/// generated fresh for every encryption call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    /// RSA-OAEP wrapped AES-256 key.
    pub enc_key: String,
    /// AES-GCM nonce.
    pub nonce: String,
    /// AES-GCM ciphertext with the authentication tag appended.
    pub ciphertext: String,
}

/// How the private key is persisted and protected.
///
/// `NoKey` is not a persisted mode: it is derived from the absence of the
/// public key file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodyMode {
    /// Private key stored as a plaintext PEM file.
    Plaintext,
    /// Private key stored as a passphrase-encrypted PEM file.
    Passphrase,
    /// Private key held by an external custodian behind an
    /// authentication ceremony.
    Custodian,
}

impl fmt::Display for CustodyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustodyMode::Plaintext => write!(f, "plaintext"),
            CustodyMode::Passphrase => write!(f, "passphrase"),
            CustodyMode::Custodian => write!(f, "custodian"),
        }
    }
}

/// Closed set of custodian backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodianKind {
    /// No custodian; selection falls back to whatever the platform offers.
    None,
    /// Platform biometric store (Keychain with Touch ID / Face ID on macOS).
    PlatformBiometric,
    /// FIDO2/WebAuthn authenticator.
    Fido2,
}

impl Default for CustodianKind {
    fn default() -> Self {
        CustodianKind::None
    }
}

impl fmt::Display for CustodianKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustodianKind::None => write!(f, "none"),
            CustodianKind::PlatformBiometric => write!(f, "platform-biometric"),
            CustodianKind::Fido2 => write!(f, "fido2"),
        }
    }
}

/// Platform capabilities, detected once at startup and injected into
/// constructors instead of consulted as global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// POSIX permission bits can actually be applied here. Where false,
    /// permission hardening is advisory and skipped.
    pub permission_hardening: bool,
    /// A platform biometric custodian backend is compiled into this build.
    pub platform_biometric: bool,
    /// A FIDO2 custodian backend is compiled into this build.
    pub fido2: bool,
}

impl Capabilities {
    /// Detect capabilities of the current platform and build.
    pub fn detect() -> Self {
        Self {
            permission_hardening: cfg!(unix),
            platform_biometric: cfg!(target_os = "macos"),
            fido2: false,
        }
    }
}
