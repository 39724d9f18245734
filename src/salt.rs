use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::Opts;
use crate::error::{Result, TaskError};

/// Properties with this key suffix hold encrypted values.
pub const ENCRYPTED_SUFFIX: &str = "_enc";

const NONCE_LEN: usize = 12;

/// Credential decryption capability of a system configuration.
///
/// Encrypted values are `base64(nonce || ciphertext)` under AES-256-GCM with
/// the SHA-256 digest of the salt as key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Salt {
    /// Values are stored as plain text
    None,
    /// Values are decrypted with the given key
    Keyed(String),
}

impl Salt {
    pub fn keyed(key: impl Into<String>) -> Self {
        Self::Keyed(key.into())
    }

    /// `Keyed` for a non-blank value, `None` otherwise
    pub fn from_value(value: Option<String>) -> Self {
        match value {
            Some(key) if !key.trim().is_empty() => Self::Keyed(key),
            _ => Self::None,
        }
    }

    pub fn is_keyed(&self) -> bool {
        matches!(self, Self::Keyed(_))
    }

    fn cipher(key: &str) -> Result<Aes256Gcm> {
        let digest = Sha256::digest(key.as_bytes());
        Aes256Gcm::new_from_slice(&digest).map_err(|e| TaskError::Decryption {
            key: "salt".to_string(),
            reason: e.to_string(),
        })
    }

    /// Encrypt a plain value; `None` returns it unchanged
    pub fn encrypt(&self, plain: &str) -> Result<String> {
        let key = match self {
            Self::None => return Ok(plain.to_string()),
            Self::Keyed(key) => key,
        };
        let cipher = Self::cipher(key)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|_| TaskError::Decryption {
                key: "salt".to_string(),
                reason: "encryption failed".to_string(),
            })?;

        let mut out = nonce.to_vec();
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    /// Decrypt the value stored under `name`; `None` returns it unchanged
    pub fn decrypt(&self, name: &str, value: &str) -> Result<String> {
        let key = match self {
            Self::None => return Ok(value.to_string()),
            Self::Keyed(key) => key,
        };
        let failure = |reason: &str| TaskError::Decryption {
            key: name.to_string(),
            reason: reason.to_string(),
        };

        let raw = STANDARD
            .decode(value.trim())
            .map_err(|e| failure(&e.to_string()))?;
        if raw.len() <= NONCE_LEN {
            return Err(failure("value is too short"));
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plain = Self::cipher(key)?
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| failure("wrong salt or corrupted value"))?;

        String::from_utf8(plain).map_err(|e| failure(&e.to_string()))
    }

    /// Decrypt every `*_enc` property into the key without the suffix.
    ///
    /// Without a salt the encrypted keys are left untouched.
    pub fn decrypt_opts(&self, opts: &Opts) -> Result<Opts> {
        if !self.is_keyed() {
            return Ok(opts.clone());
        }
        let mut out = Opts::default();
        for (key, value) in opts.iter() {
            match (key.strip_suffix(ENCRYPTED_SUFFIX), value.as_str()) {
                (Some(plain_key), Some(encrypted)) if !plain_key.is_empty() => {
                    out.insert(plain_key, Value::String(self.decrypt(key, encrypted)?));
                    debug!(key = %plain_key, "Decrypted property");
                }
                _ => {
                    if !out.contains_key(key) {
                        out.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        Ok(out)
    }
}
