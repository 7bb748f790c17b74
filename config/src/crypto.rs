//! Encryption of API keys at rest.
//!
//! Keys are sealed with AES-256-GCM. The default cipher derives its key from
//! the hostname and username, so a settings file copied to another machine
//! (or synced to the cloud) cannot be decrypted there; the cloud copy of a
//! secret always travels in plaintext over an authenticated channel instead.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::ConfigError;

const NONCE_SIZE: usize = 12;
const KEY_SALT: &[u8] = b"parley-api-key-encryption-v1";

pub struct KeyCipher {
    cipher: Aes256Gcm,
}

impl KeyCipher {
    /// Cipher bound to the current machine and user.
    pub fn for_machine() -> Result<Self, ConfigError> {
        let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string());
        let username = whoami::username();
        Self::from_secret(&format!("{hostname}:{username}"))
    }

    /// Cipher keyed by an arbitrary secret.
    pub fn from_secret(secret: &str) -> Result<Self, ConfigError> {
        let mut hasher = Sha256::new();
        hasher.update(KEY_SALT);
        hasher.update(secret.as_bytes());
        let key = hasher.finalize();

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| ConfigError::Crypto(format!("failed to create cipher: {e}")))?;
        Ok(Self { cipher })
    }

    /// Returns base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, ConfigError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| ConfigError::Crypto(format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(&sealed))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<String, ConfigError> {
        let bytes = BASE64
            .decode(sealed)
            .map_err(|e| ConfigError::Crypto(format!("invalid base64: {e}")))?;
        if bytes.len() < NONCE_SIZE {
            return Err(ConfigError::Crypto("sealed value too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| ConfigError::Crypto(format!("decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| ConfigError::Crypto(format!("invalid UTF-8 in decrypted data: {e}")))
    }
}
