//! Value encryption for warren
//!
//! Secret values are encrypted with AES-256-GCM under a shared key derived
//! from a master key with HKDF-SHA256. Ciphertext is framed as
//! `MAGIC || NONCE || CIPHERTEXT` so the read path can recognise sealed
//! payloads and pass anything else through untouched.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use std::path::Path;

use crate::common::{Error, Result};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of a GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Magic bytes identifying sealed payloads
const SEAL_MAGIC: &[u8] = b"WRNSEC01";

/// The process-wide symmetric key. Loaded once at startup and read-only
/// afterwards.
#[derive(Clone)]
pub struct SharedKey {
    cipher: Aes256Gcm,
}

impl SharedKey {
    /// Derive the value-encryption key from a base64-encoded master key.
    pub fn from_master(master_key: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(master_key.trim())
            .map_err(|e| Error::Crypto(format!("invalid base64 master key: {}", e)))?;
        if key_bytes.len() < KEY_SIZE {
            return Err(Error::Crypto(format!(
                "master key too short: {} bytes, minimum {} bytes",
                key_bytes.len(),
                KEY_SIZE
            )));
        }

        let hkdf = Hkdf::<Sha256>::new(None, &key_bytes);
        let mut derived = [0u8; KEY_SIZE];
        hkdf.expand(b"warren-kv-data", &mut derived)
            .map_err(|e| Error::Crypto(format!("key derivation failed: {}", e)))?;

        let cipher = Aes256Gcm::new_from_slice(&derived)
            .map_err(|e| Error::Crypto(format!("failed to create cipher: {}", e)))?;
        Ok(Self { cipher })
    }

    /// Load the master key from `path`, generating and persisting a fresh
    /// one (with parent directories) on first boot.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        let master = if path.exists() {
            std::fs::read_to_string(path)?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let master = Self::generate_master();
            std::fs::write(path, &master)?;
            tracing::info!(path = %path.display(), "generated new shared key");
            master
        };
        Self::from_master(&master)
    }

    /// Generate a new random base64-encoded master key.
    pub fn generate_master() -> String {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        BASE64.encode(key)
    }

    /// Seal a plaintext payload: `MAGIC || NONCE || CIPHERTEXT`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::Crypto(format!("encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(SEAL_MAGIC.len() + NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(SEAL_MAGIC);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open a sealed payload. Fails on missing magic, truncation, or a key
    /// mismatch; callers on the read path fall back to the raw bytes.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if !Self::is_sealed(data) {
            return Err(Error::Crypto("payload is not sealed".into()));
        }
        if data.len() < SEAL_MAGIC.len() + NONCE_SIZE {
            return Err(Error::Crypto("sealed payload too short".into()));
        }
        let (nonce_bytes, ciphertext) = data[SEAL_MAGIC.len()..].split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::Crypto("decryption failed (wrong key or tampered data)".into()))
    }

    /// Check whether a payload carries the seal framing.
    pub fn is_sealed(data: &[u8]) -> bool {
        data.len() >= SEAL_MAGIC.len() && &data[..SEAL_MAGIC.len()] == SEAL_MAGIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SharedKey {
        SharedKey::from_master(&SharedKey::generate_master()).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let plaintext = b"hello, warren";
        let sealed = key.encrypt(plaintext).unwrap();
        assert_ne!(sealed.as_slice(), plaintext.as_slice());
        assert!(SharedKey::is_sealed(&sealed));
        assert_eq!(key.decrypt(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let sealed = test_key().encrypt(b"secret").unwrap();
        assert!(test_key().decrypt(&sealed).is_err());
    }

    #[test]
    fn test_decrypt_rejects_unsealed_payload() {
        let key = test_key();
        assert!(key.decrypt(b"just plain bytes").is_err());
    }

    #[test]
    fn test_master_key_too_short() {
        assert!(SharedKey::from_master(&BASE64.encode(b"short")).is_err());
    }

    #[test]
    fn test_load_or_generate_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("keys/shared.key");
        let first = SharedKey::load_or_generate(&path).unwrap();
        assert!(path.exists());
        let second = SharedKey::load_or_generate(&path).unwrap();
        let sealed = first.encrypt(b"stable").unwrap();
        assert_eq!(second.decrypt(&sealed).unwrap(), b"stable");
    }
}
