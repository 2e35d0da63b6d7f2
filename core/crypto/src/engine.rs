//! Hybrid encryption of single secret values.
//!
//! Each value is encrypted with a fresh random AES-256-GCM key and a fresh
//! random 96-bit nonce; the symmetric key is then wrapped with RSA-OAEP
//! (SHA-256). Nonce uniqueness follows from the key being single-use.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

use haven_common::{EncryptedSecret, Error, Result};

/// Minimum accepted RSA modulus size in bits.
pub const MIN_RSA_BITS: usize = 2048;

/// AES-256 key size in bytes.
const AES_KEY_SIZE: usize = 32;

/// GCM nonce size in bytes (96 bits).
const NONCE_SIZE: usize = 12;

/// An RSA key pair. The private component never leaves this process
/// except through [`crate::keys::serialize_private_key`].
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    /// The private component.
    pub fn private(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// The public component.
    pub fn public(&self) -> &RsaPublicKey {
        &self.public
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair([REDACTED])")
    }
}

/// Generate a new RSA key pair.
///
/// # Errors
/// - `Validation` if `bits` is below [`MIN_RSA_BITS`]
/// - `Crypto` if the key-generation primitive fails
pub fn generate_key_pair(bits: usize) -> Result<KeyPair> {
    if bits < MIN_RSA_BITS {
        return Err(Error::Validation(format!(
            "RSA modulus must be at least {} bits, got {}",
            MIN_RSA_BITS, bits
        )));
    }

    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| Error::Crypto(format!("key generation failed: {}", e)))?;
    let public = RsaPublicKey::from(&private);

    Ok(KeyPair { private, public })
}

/// Encrypt a plaintext under the given public key.
///
/// Every call draws a fresh symmetric key and nonce: two calls with the
/// same plaintext and public key produce a different `enc_key`, `nonce`,
/// and `ciphertext`.
///
/// # Errors
/// - `Crypto` if the AEAD or the OAEP wrap fails
pub fn encrypt(plaintext: &[u8], public: &RsaPublicKey) -> Result<EncryptedSecret> {
    let mut rng = rand::thread_rng();

    let mut aes_key = Zeroizing::new([0u8; AES_KEY_SIZE]);
    rng.fill_bytes(aes_key.as_mut());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(aes_key.as_ref())
        .map_err(|e| Error::Crypto(format!("cipher initialization failed: {}", e)))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| Error::Crypto(format!("encryption failed: {}", e)))?;

    let wrapped = public
        .encrypt(&mut rng, Oaep::new::<Sha256>(), aes_key.as_ref())
        .map_err(|e| Error::Crypto(format!("key wrap failed: {}", e)))?;

    Ok(EncryptedSecret {
        enc_key: BASE64.encode(wrapped),
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// Decrypt a record with the given private key.
///
/// Key mismatch, a failed authentication tag, and a malformed record all
/// surface as the same `Crypto` error so callers cannot distinguish them.
pub fn decrypt(record: &EncryptedSecret, private: &RsaPrivateKey) -> Result<Vec<u8>> {
    let wrapped = BASE64
        .decode(&record.enc_key)
        .map_err(|_| decrypt_error())?;
    let nonce_bytes = BASE64.decode(&record.nonce).map_err(|_| decrypt_error())?;
    let ciphertext = BASE64
        .decode(&record.ciphertext)
        .map_err(|_| decrypt_error())?;

    if nonce_bytes.len() != NONCE_SIZE {
        return Err(decrypt_error());
    }

    let aes_key = Zeroizing::new(
        private
            .decrypt(Oaep::new::<Sha256>(), &wrapped)
            .map_err(|_| decrypt_error())?,
    );

    let cipher = Aes256Gcm::new_from_slice(&aes_key).map_err(|_| decrypt_error())?;
    cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| decrypt_error())
}

fn decrypt_error() -> Error {
    Error::Crypto("decryption failed: wrong key or corrupted record".to_string())
}
