//! Token encryption at rest
//!
//! Access tokens are never persisted in plaintext. A single 32-byte key is
//! generated on first use and written to a key file outside the normal
//! configuration surface; encryption is ChaCha20-Poly1305 with a fresh
//! random nonce per payload, stored as base64(nonce || ciphertext).
//!
//! There is no fallback mode: if the key file cannot be read or a payload
//! fails authentication, the operation errors and the caller treats the
//! credential as absent.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::Path;
use zeroize::Zeroize;

use crate::error::{CredentialError, Result};

/// Nonce size for ChaCha20-Poly1305.
const NONCE_SIZE: usize = 12;

const KEY_SIZE: usize = 32;

/// Symmetric cipher for credential payloads.
pub struct TokenCipher {
    cipher: ChaCha20Poly1305,
}

impl TokenCipher {
    /// Load the key from `key_path`, generating and persisting a new one if
    /// the file does not exist yet.
    ///
    /// Call this once at process start. Loading eagerly keeps two racing
    /// initializations from minting two different keys mid-request.
    pub fn load_or_generate(key_path: &Path) -> Result<Self> {
        let mut key_bytes = if key_path.exists() {
            let data = std::fs::read(key_path)
                .map_err(|e| CredentialError::Cipher(format!("failed to read key file: {}", e)))?;
            if data.len() != KEY_SIZE {
                return Err(CredentialError::Cipher(format!(
                    "key file has {} bytes, expected {}",
                    data.len(),
                    KEY_SIZE
                ))
                .into());
            }
            let mut key = [0u8; KEY_SIZE];
            key.copy_from_slice(&data);
            key
        } else {
            let mut key = [0u8; KEY_SIZE];
            OsRng.fill_bytes(&mut key);
            write_key_file(key_path, &key)?;
            tracing::info!(path = %key_path.display(), "Generated new token encryption key");
            key
        };

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));
        key_bytes.zeroize();
        Ok(Self { cipher })
    }

    /// Build a cipher from raw key bytes. Used by tests and key migration
    /// tooling; normal startup goes through `load_or_generate`.
    pub fn from_key(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Encrypt a payload into a base64 envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CredentialError::Cipher(format!("encryption failed: {}", e)))?;

        let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(envelope))
    }

    /// Decrypt a base64 envelope. Fails closed on any malformed or forged
    /// input.
    pub fn decrypt(&self, envelope: &str) -> Result<String> {
        let data = BASE64
            .decode(envelope)
            .map_err(|e| CredentialError::Cipher(format!("invalid envelope encoding: {}", e)))?;

        if data.len() <= NONCE_SIZE {
            return Err(
                CredentialError::Cipher("envelope too short to contain a nonce".to_string())
                    .into(),
            );
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CredentialError::Cipher("decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CredentialError::Cipher("decrypted payload is not UTF-8".to_string()).into())
    }
}

fn write_key_file(path: &Path, key: &[u8; KEY_SIZE]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CredentialError::Cipher(format!("failed to create key dir: {}", e)))?;
    }

    std::fs::write(path, key)
        .map_err(|e| CredentialError::Cipher(format!("failed to write key file: {}", e)))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .map_err(|e| CredentialError::Cipher(format!("failed to set key permissions: {}", e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = TokenCipher::from_key(&[7u8; 32]);
        let envelope = cipher.encrypt(r#"{"access_token":"EAAB...secret"}"#).unwrap();
        let plaintext = cipher.decrypt(&envelope).unwrap();
        assert_eq!(plaintext, r#"{"access_token":"EAAB...secret"}"#);
    }

    #[test]
    fn test_envelope_is_not_plaintext() {
        let cipher = TokenCipher::from_key(&[7u8; 32]);
        let envelope = cipher.encrypt("super-secret-token").unwrap();
        assert!(!envelope.contains("super-secret-token"));
        // Nor is it just base64 of the plaintext.
        assert_ne!(envelope, BASE64.encode("super-secret-token"));
    }

    #[test]
    fn test_each_encryption_uses_fresh_nonce() {
        let cipher = TokenCipher::from_key(&[7u8; 32]);
        let a = cipher.encrypt("same payload").unwrap();
        let b = cipher.encrypt("same payload").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_envelope_fails_closed() {
        let cipher = TokenCipher::from_key(&[7u8; 32]);
        let envelope = cipher.encrypt("payload").unwrap();

        let mut raw = BASE64.decode(&envelope).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = BASE64.encode(raw);

        assert!(cipher.decrypt(&tampered).is_err());
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let cipher_a = TokenCipher::from_key(&[1u8; 32]);
        let cipher_b = TokenCipher::from_key(&[2u8; 32]);
        let envelope = cipher_a.encrypt("payload").unwrap();
        assert!(cipher_b.decrypt(&envelope).is_err());
    }

    #[test]
    fn test_garbage_envelope_fails_closed() {
        let cipher = TokenCipher::from_key(&[7u8; 32]);
        assert!(cipher.decrypt("not base64 at all!!!").is_err());
        assert!(cipher.decrypt("").is_err());
        // Valid base64 but shorter than a nonce.
        assert!(cipher.decrypt(&BASE64.encode([0u8; 4])).is_err());
    }

    #[test]
    fn test_key_generated_once_and_reloaded() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("token.key");

        let cipher1 = TokenCipher::load_or_generate(&key_path).unwrap();
        let envelope = cipher1.encrypt("persisted").unwrap();

        // A second load must reuse the same key, not mint a new one.
        let cipher2 = TokenCipher::load_or_generate(&key_path).unwrap();
        assert_eq!(cipher2.decrypt(&envelope).unwrap(), "persisted");
    }

    #[test]
    fn test_corrupt_key_file_rejected() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("token.key");
        std::fs::write(&key_path, b"short").unwrap();
        assert!(TokenCipher::load_or_generate(&key_path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("token.key");
        TokenCipher::load_or_generate(&key_path).unwrap();

        let mode = std::fs::metadata(&key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
