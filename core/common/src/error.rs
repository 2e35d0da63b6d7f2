//! Common error types for Haven.
//!
//! The taxonomy is closed: every failure from an underlying library is
//! classified into one of these kinds at the point where it surfaces.

use thiserror::Error;

/// Failure modes of the external key custodian.
///
/// These mirror the outcomes of a platform authentication ceremony; the
/// custodian itself owns the ceremony and any timeout behind it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CustodianError {
    /// The user dismissed the authentication prompt.
    #[error("authentication cancelled")]
    Cancelled,

    /// The platform authentication ceremony timed out.
    #[error("authentication timed out")]
    Timeout,

    /// Authentication ran but did not succeed.
    #[error("authentication failed")]
    Failed,

    /// No usable custodian backend on this platform or in this build.
    #[error("custodian unavailable: {0}")]
    Unavailable(String),

    /// The authenticator's enrollment changed; the wrapped key cannot be
    /// recovered through it anymore.
    #[error("authenticator enrollment changed, wrapped key is unrecoverable")]
    AuthChanged,
}

/// Top-level error type for Haven operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Input rejected before any state was touched.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested secret or key does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cryptographic operation failed. Wrong-key and tampered-data cases
    /// share one message so the error channel is not a decryption oracle.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Storage operation failed: I/O, corrupt structure, or a failed
    /// atomic replace.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The external key custodian reported a failure.
    #[error("Custodian error: {0}")]
    Custodian(#[from] CustodianError),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
