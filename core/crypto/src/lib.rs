//! Cryptographic engine for Haven.
//!
//! This module provides:
//! - RSA key pair generation (2048-bit minimum)
//! - Hybrid encryption: a fresh AES-256-GCM key per value, wrapped with
//!   RSA-OAEP (SHA-256)
//! - PEM key serialization, with an optional passphrase envelope for the
//!   private key
//!
//! # Security Guarantees
//! - Every encryption call draws a fresh symmetric key and nonce, so equal
//!   plaintexts never produce equal ciphertexts
//! - Decryption authenticates before returning; tampered data is rejected
//! - Wrong-key, tampered-data, and malformed-record failures are collapsed
//!   into a single error message
//! - Symmetric key material is zeroized after use

pub mod engine;
pub mod keys;

pub use engine::{decrypt, encrypt, generate_key_pair, KeyPair, MIN_RSA_BITS};
pub use haven_common::EncryptedSecret;
pub use rsa::{RsaPrivateKey, RsaPublicKey};
pub use keys::{
    deserialize_private_key, deserialize_public_key, serialize_private_key, serialize_public_key,
};
