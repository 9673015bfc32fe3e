//! Root-key encryption of store passwords.
//!
//! Passwords handed over by clients are never persisted in clear. The
//! service encrypts them with a root key (AES-256-GCM) before saving the
//! secret key metadata, and decrypts them again when a store is reopened.

use aes_gcm::aead::{generic_array::GenericArray, Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{StoreError, StoreResult};

/// Size of the root key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Longest password the engine accepts.
pub const MAX_PASSWORD_LEN: usize = 128;

const ROOT_KEY_INFO: &[u8] = b"rdbsync-root-key-v1";

/// AES-256 root key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from exactly [`KEY_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            StoreError::crypto(format!("key must be {KEY_SIZE} bytes, got {}", bytes.len()))
        })?;
        Ok(Self { bytes })
    }

    /// Derives a key from high-entropy secret material with HKDF-SHA256.
    pub fn derive_from_secret(secret: &[u8], salt: &[u8]) -> StoreResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), secret);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(ROOT_KEY_INFO, &mut bytes)
            .map_err(|_| StoreError::crypto("HKDF expand failed"))?;
        Ok(Self { bytes })
    }

    /// Raw key bytes. Never log them.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts and decrypts store passwords with the root key.
pub struct CryptoManager {
    cipher: Aes256Gcm,
}

impl CryptoManager {
    /// Creates a manager for `key`.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        Self { cipher }
    }

    /// Encrypts `plaintext`. Output is `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> StoreResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| StoreError::crypto("encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend(ciphertext);
        Ok(out)
    }

    /// Decrypts data produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, data: &[u8]) -> StoreResult<Vec<u8>> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(StoreError::crypto("ciphertext too short"));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StoreError::crypto("decryption failed"))
    }
}

impl std::fmt::Debug for CryptoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoManager")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}

/// Store password handed to the engine, wiped on drop.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CipherPassword {
    bytes: Vec<u8>,
}

impl CipherPassword {
    /// Creates a password; at most [`MAX_PASSWORD_LEN`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        if bytes.len() > MAX_PASSWORD_LEN {
            return Err(StoreError::invalid_argument(format!(
                "password longer than {MAX_PASSWORD_LEN} bytes"
            )));
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    /// Raw password bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if no password is set.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for CipherPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherPassword")
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let manager = CryptoManager::new(&EncryptionKey::generate());
        let sealed = manager.encrypt(b"store-password").unwrap();
        assert_ne!(&sealed[NONCE_SIZE..], b"store-password");
        assert_eq!(manager.decrypt(&sealed).unwrap(), b"store-password");
    }

    #[test]
    fn fresh_nonce_per_call() {
        let manager = CryptoManager::new(&EncryptionKey::generate());
        assert_ne!(manager.encrypt(b"x").unwrap(), manager.encrypt(b"x").unwrap());
    }

    #[test]
    fn wrong_key_and_tampering() {
        let a = CryptoManager::new(&EncryptionKey::generate());
        let b = CryptoManager::new(&EncryptionKey::generate());
        let mut sealed = a.encrypt(b"pw").unwrap();
        assert!(b.decrypt(&sealed).is_err());
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(a.decrypt(&sealed).is_err());
        assert!(a.decrypt(&[0u8; 8]).is_err());
    }

    #[test]
    fn derived_keys_are_deterministic() {
        let k1 = EncryptionKey::derive_from_secret(b"device-secret", b"salt").unwrap();
        let k2 = EncryptionKey::derive_from_secret(b"device-secret", b"salt").unwrap();
        let k3 = EncryptionKey::derive_from_secret(b"device-secret", b"other").unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
        assert_ne!(k1.as_bytes(), k3.as_bytes());
    }

    #[test]
    fn key_size_checked() {
        assert!(EncryptionKey::from_bytes(&[0u8; 16]).is_err());
        assert!(EncryptionKey::from_bytes(&[7u8; KEY_SIZE]).is_ok());
    }

    #[test]
    fn password_limits() {
        assert!(CipherPassword::from_bytes(&[1u8; MAX_PASSWORD_LEN + 1]).is_err());
        let password = CipherPassword::from_bytes(b"abc").unwrap();
        assert_eq!(password.len(), 3);
        assert!(!format!("{password:?}").contains("abc"));
        assert!(CipherPassword::default().is_empty());
    }
}
