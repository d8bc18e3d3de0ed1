//! End-to-end payload encryption.
//!
//! Change entries are sealed with AES-256-GCM before they leave the device,
//! so the relay only ever stores opaque ciphertext. Key derivation and
//! distribution live outside this crate; the engine consumes a symmetric
//! key handle.

use crate::{error::Result, Error};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};

/// Symmetric key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// A symmetric dataset key handle.
#[derive(Clone)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a random key (tests, first-run provisioning).
    pub fn generate() -> Self {
        Self(Aes256Gcm::generate_key(OsRng).into())
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        f.write_str("Key(..)")
    }
}

/// An encrypted payload with its unique nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
}

/// Encrypt a plaintext payload under a fresh random nonce.
pub fn encrypt(key: &Key, plaintext: &[u8]) -> Result<Sealed> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::Encryption)?;
    Ok(Sealed {
        ciphertext,
        nonce: nonce.into(),
    })
}

/// Decrypt a sealed payload. Fails with [`Error::Decryption`] on key
/// mismatch or corrupted ciphertext; callers must treat that as fatal for
/// the whole batch, not attempt partial recovery.
pub fn decrypt(key: &Key, sealed: &Sealed) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(&sealed.nonce);
    cipher
        .decrypt(nonce, sealed.ciphertext.as_slice())
        .map_err(|_| Error::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = Key::generate();
        let sealed = encrypt(&key, b"amount=75").unwrap();
        assert_ne!(sealed.ciphertext, b"amount=75");
        let plain = decrypt(&key, &sealed).unwrap();
        assert_eq!(plain, b"amount=75");
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = encrypt(&Key::generate(), b"secret").unwrap();
        let err = decrypt(&Key::generate(), &sealed).unwrap_err();
        assert!(matches!(err, Error::Decryption));
    }

    #[test]
    fn corrupted_ciphertext_fails() {
        let key = Key::generate();
        let mut sealed = encrypt(&key, b"secret").unwrap();
        sealed.ciphertext[0] ^= 0xFF;
        assert!(matches!(decrypt(&key, &sealed), Err(Error::Decryption)));
    }

    #[test]
    fn nonces_are_unique_per_seal() {
        let key = Key::generate();
        let a = encrypt(&key, b"x").unwrap();
        let b = encrypt(&key, b"x").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
