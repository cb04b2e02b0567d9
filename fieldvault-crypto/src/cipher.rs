//! Authenticated encryption.
//!
//! Two suites are supported, both with 96-bit nonces and 128-bit tags:
//! AES-256-GCM (the default for field values) and ChaCha20-Poly1305 (used
//! to seal key-store entries).

use crate::error::{CryptoError, CryptoResult};
use crate::key::SecretKey;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Nonce size in bytes for both suites.
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size in bytes for both suites.
pub const TAG_SIZE: usize = 16;

/// Canonical name of the AES-256-GCM suite.
pub const AES_GCM_NOPADDING: &str = "AES/GCM/NoPadding";

/// Canonical name of the ChaCha20-Poly1305 suite.
pub const CHACHA20_POLY1305: &str = "ChaCha20-Poly1305";

/// A supported cipher suite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CipherSuite {
    #[default]
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl CipherSuite {
    /// Canonical algorithm name, as written into envelopes.
    pub fn name(&self) -> &'static str {
        match self {
            CipherSuite::Aes256Gcm => AES_GCM_NOPADDING,
            CipherSuite::ChaCha20Poly1305 => CHACHA20_POLY1305,
        }
    }

    /// Encrypts `plaintext` under `key` with a fresh random nonce.
    ///
    /// `aad` is authenticated but not encrypted; the same bytes must be
    /// supplied to [`CipherSuite::decrypt`].
    pub fn encrypt(
        &self,
        key: &SecretKey,
        plaintext: &[u8],
        aad: &[u8],
    ) -> CryptoResult<EncryptedData> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);

        let ciphertext = match self {
            CipherSuite::Aes256Gcm => aes_gcm_seal(key, &nonce, plaintext, aad)?,
            CipherSuite::ChaCha20Poly1305 => chacha_seal(key, &nonce, plaintext, aad)?,
        };

        Ok(EncryptedData {
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    /// Decrypts and authenticates `data` under `key`.
    pub fn decrypt(
        &self,
        key: &SecretKey,
        data: &EncryptedData,
        aad: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        if data.nonce.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: data.nonce.len(),
            });
        }

        match self {
            CipherSuite::Aes256Gcm => aes_gcm_open(key, &data.nonce, &data.ciphertext, aad),
            CipherSuite::ChaCha20Poly1305 => chacha_open(key, &data.nonce, &data.ciphertext, aad),
        }
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherSuite {
    type Err = CryptoError;

    /// Accepts the canonical names case-insensitively, plus the short
    /// aliases `AES-256-GCM`, `AES/GCM` and `ChaCha20`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes/gcm/nopadding" | "aes/gcm" | "aes-256-gcm" => Ok(CipherSuite::Aes256Gcm),
            "chacha20-poly1305" | "chacha20poly1305" | "chacha20" => {
                Ok(CipherSuite::ChaCha20Poly1305)
            }
            _ => Err(CryptoError::UnsupportedCipher(s.to_string())),
        }
    }
}

/// Nonce plus ciphertext (ciphertext includes the authentication tag).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    pub fn new(nonce: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        Self { nonce, ciphertext }
    }

    /// Encodes `nonce || ciphertext` as standard base64.
    pub fn to_base64(&self) -> String {
        let combined = [self.nonce.as_slice(), self.ciphertext.as_slice()].concat();
        STANDARD.encode(combined)
    }

    /// Decodes the `nonce || ciphertext` form produced by [`Self::to_base64`].
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Encoding(format!("base64 decode error: {e}")))?;

        if decoded.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Encoding(format!(
                "encrypted payload too short: {} bytes",
                decoded.len()
            )));
        }

        let (nonce, ciphertext) = decoded.split_at(NONCE_SIZE);
        Ok(Self::new(nonce.to_vec(), ciphertext.to_vec()))
    }
}

/// Encrypts with ChaCha20-Poly1305 and no associated data.
pub fn encrypt(key: &SecretKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    CipherSuite::ChaCha20Poly1305.encrypt(key, plaintext, &[])
}

/// Decrypts data produced by [`encrypt`].
pub fn decrypt(key: &SecretKey, data: &EncryptedData) -> CryptoResult<Vec<u8>> {
    CipherSuite::ChaCha20Poly1305.decrypt(key, data, &[])
}

const AUTHENTICATION_FAILED: &str = "authentication failed (wrong key or tampered data)";

fn aes_gcm_seal(key: &SecretKey, nonce: &[u8], msg: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
    use aes_gcm::aead::{Aead, KeyInit, Payload};
    use aes_gcm::{Aes256Gcm, Nonce};

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("cipher init error: {e}")))?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg, aad })
        .map_err(|e| CryptoError::Encryption(format!("AES-GCM seal failed: {e}")))
}

fn aes_gcm_open(key: &SecretKey, nonce: &[u8], msg: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
    use aes_gcm::aead::{Aead, KeyInit, Payload};
    use aes_gcm::{Aes256Gcm, Nonce};

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Decryption(format!("cipher init error: {e}")))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg, aad })
        .map_err(|_| CryptoError::Decryption(AUTHENTICATION_FAILED.into()))
}

fn chacha_seal(key: &SecretKey, nonce: &[u8], msg: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
    use chacha20poly1305::aead::{Aead, KeyInit, Payload};
    use chacha20poly1305::{ChaCha20Poly1305, Nonce};

    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("cipher init error: {e}")))?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg, aad })
        .map_err(|e| CryptoError::Encryption(format!("ChaCha20-Poly1305 seal failed: {e}")))
}

fn chacha_open(key: &SecretKey, nonce: &[u8], msg: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
    use chacha20poly1305::aead::{Aead, KeyInit, Payload};
    use chacha20poly1305::{ChaCha20Poly1305, Nonce};

    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Decryption(format!("cipher init error: {e}")))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg, aad })
        .map_err(|_| CryptoError::Decryption(AUTHENTICATION_FAILED.into()))
}
