//! Key custody and secret lifecycle for Haven.
//!
//! This module provides:
//! - The private-key custody state machine (plaintext file,
//!   passphrase-protected file, custodian-wrapped)
//! - The `KeyCustodian` contract with its closed set of backends
//! - The key-rotation protocol over the full secret set
//! - Backup archive export and import
//! - A facade tying the engine, store, and vault together for callers
//!
//! # Architecture
//! The vault module sits between the command surface and the storage
//! layer; all key material passes through it and nowhere else.

pub mod backup;
pub mod custodian;
pub mod keyvault;
pub mod ops;
pub mod rotation;

pub use custodian::{select_custodian, CustodianHandle, KeyCustodian, MemoryCustodian};
pub use keyvault::{CustodyState, KeyVault, DEFAULT_RSA_BITS, MIN_PASSPHRASE_LEN};
pub use ops::{Haven, VaultStatus};
pub use rotation::{KeyRotationCoordinator, RotationOutcome};
