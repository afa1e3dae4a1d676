//! Symmetric cipher used to encrypt field values before they leave the device.
//!
//! The engine only needs `encrypt(bytes) -> bytes` and `decrypt(bytes) -> bytes`.
//! Applications can inject their own pair of functions through [`FnCipher`];
//! [`AesGcmCipher`] is the default, keyed from a passphrase.
//!
//! Wire format of [`AesGcmCipher`]: `nonce(12) || ciphertext || auth_tag(16)`

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Cipher failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("authentication failed")]
    AuthenticationFailed,
}

/// Symmetric encrypt/decrypt pair
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// AES-256-GCM with a key derived from a passphrase (SHA-256)
#[derive(Clone)]
pub struct AesGcmCipher {
    key: [u8; 32],
}

impl AesGcmCipher {
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self {
            key: Sha256::digest(passphrase.as_bytes()).into(),
        }
    }

    pub const fn from_key(key: [u8; 32]) -> Self {
        Self { key }
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AesGcmCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new((&self.key).into());
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext_with_tag = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext_with_tag.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext_with_tag);
        Ok(result)
    }

    fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::DecryptionFailed(
                "ciphertext too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext_with_tag) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new((&self.key).into());
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext_with_tag)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

/// Cipher built from two injected functions
pub struct FnCipher<E, D> {
    encrypt: E,
    decrypt: D,
}

impl<E, D> FnCipher<E, D>
where
    E: Fn(&[u8]) -> Result<Vec<u8>, CryptoError> + Send + Sync,
    D: Fn(&[u8]) -> Result<Vec<u8>, CryptoError> + Send + Sync,
{
    pub const fn new(encrypt: E, decrypt: D) -> Self {
        Self { encrypt, decrypt }
    }
}

impl<E, D> Cipher for FnCipher<E, D>
where
    E: Fn(&[u8]) -> Result<Vec<u8>, CryptoError> + Send + Sync,
    D: Fn(&[u8]) -> Result<Vec<u8>, CryptoError> + Send + Sync,
{
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        (self.encrypt)(plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        (self.decrypt)(ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_round_trip() {
        let cipher = AesGcmCipher::from_passphrase("app-key");
        let blob = cipher.encrypt(b"hello").unwrap();
        assert_ne!(&blob[NONCE_LEN..], b"hello");
        assert_eq!(cipher.decrypt(&blob).unwrap(), b"hello");
    }

    #[test]
    fn aes_encrypts_empty_plaintext() {
        let cipher = AesGcmCipher::from_passphrase("app-key");
        let blob = cipher.encrypt(b"").unwrap();
        assert_eq!(blob.len(), NONCE_LEN + TAG_LEN);
        assert!(cipher.decrypt(&blob).unwrap().is_empty());
    }

    #[test]
    fn aes_uses_fresh_nonce_per_call() {
        let cipher = AesGcmCipher::from_passphrase("app-key");
        assert_ne!(cipher.encrypt(b"x").unwrap(), cipher.encrypt(b"x").unwrap());
    }

    #[test]
    fn aes_rejects_wrong_key_and_short_input() {
        let cipher = AesGcmCipher::from_passphrase("app-key");
        let other = AesGcmCipher::from_passphrase("other-key");
        let blob = cipher.encrypt(b"secret").unwrap();
        assert_eq!(
            other.decrypt(&blob).unwrap_err(),
            CryptoError::AuthenticationFailed
        );
        assert!(cipher.decrypt(b"short").is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let cipher = AesGcmCipher::from_passphrase("app-key");
        assert!(format!("{cipher:?}").contains("[REDACTED]"));
    }

    #[test]
    fn fn_cipher_delegates_to_closures() {
        let cipher = FnCipher::new(
            |bytes: &[u8]| -> Result<Vec<u8>, CryptoError> { Ok(bytes.iter().rev().copied().collect()) },
            |bytes: &[u8]| -> Result<Vec<u8>, CryptoError> { Ok(bytes.iter().rev().copied().collect()) },
        );
        let encrypted = cipher.encrypt(b"abc").unwrap();
        assert_eq!(encrypted, b"cba");
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), b"abc");
    }
}
