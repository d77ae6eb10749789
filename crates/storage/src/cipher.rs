use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StorageError;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const DEFAULT_KEY_CONTEXT: &str = "planvault 2024-05 chunked store encryption key";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CipherConfig {
    /// Stable per-installation identifier supplied by the host.
    pub installation_id: String,
    /// BLAKE3 key-derivation context; changing it orphans existing data.
    pub key_context: String,
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            installation_id: String::new(),
            key_context: DEFAULT_KEY_CONTEXT.to_string(),
        }
    }
}

/// AES-256-GCM with a key derived from the installation id. The key lives
/// only in memory.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; 32],
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cipher(..)")
    }
}

/// Ciphertext plus the IV it was sealed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub iv: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct SealedText {
    iv: String,
    data: String,
}

impl Sealed {
    /// Text envelope for string-only substrates.
    pub fn to_text(&self) -> Result<String, StorageError> {
        let envelope = SealedText {
            iv: BASE64.encode(self.iv),
            data: BASE64.encode(&self.ciphertext),
        };
        serde_json::to_string(&envelope).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    pub fn from_text(text: &str) -> Result<Self, StorageError> {
        let envelope: SealedText = serde_json::from_str(text)
            .map_err(|e| StorageError::Serialization(format!("sealed envelope: {e}")))?;
        let iv_raw = BASE64
            .decode(envelope.iv.as_bytes())
            .map_err(|e| StorageError::Serialization(format!("iv: {e}")))?;
        let iv: [u8; NONCE_LEN] = iv_raw
            .try_into()
            .map_err(|v: Vec<u8>| StorageError::Serialization(format!("iv is {} bytes", v.len())))?;
        let ciphertext = BASE64
            .decode(envelope.data.as_bytes())
            .map_err(|e| StorageError::Serialization(format!("data: {e}")))?;
        Ok(Self { iv, ciphertext })
    }
}

/// Upper bound on the envelope length for `plaintext_len` bytes.
pub fn sealed_text_len_bound(plaintext_len: usize) -> usize {
    const ENVELOPE_OVERHEAD: usize = 32;
    base64_len(plaintext_len + TAG_LEN) + base64_len(NONCE_LEN) + ENVELOPE_OVERHEAD
}

fn base64_len(n: usize) -> usize {
    n.div_ceil(3) * 4
}

impl Cipher {
    pub fn derive(config: &CipherConfig) -> Result<Self, StorageError> {
        if config.installation_id.trim().is_empty() {
            return Err(StorageError::InvalidConfig(
                "cipher.installation_id must not be empty".into(),
            ));
        }
        let key = blake3::derive_key(&config.key_context, config.installation_id.as_bytes());
        Ok(Self { key })
    }

    pub fn from_key_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Sealed, StorageError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| StorageError::InvalidConfig(format!("AES key init failed: {e}")))?;
        let mut iv = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut iv);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| StorageError::Serialization(format!("AES-GCM encrypt failed: {e}")))?;
        Ok(Sealed { iv, ciphertext })
    }

    pub fn decrypt(&self, sealed: &Sealed) -> Result<Vec<u8>, StorageError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| StorageError::InvalidConfig(format!("AES key init failed: {e}")))?;
        cipher
            .decrypt(Nonce::from_slice(&sealed.iv), sealed.ciphertext.as_ref())
            .map_err(|_| StorageError::Decryption)
    }
}
