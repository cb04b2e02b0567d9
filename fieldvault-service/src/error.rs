//! Crypto service error types.

use fieldvault_crypto::CryptoError;
use fieldvault_keystore::KeyStoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for crypto service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced by the crypto service.
///
/// Startup errors (`Configuration`, `KeyStoreNotFound`, `KeyStoreInit`,
/// `ProviderRegistration`) abort activation. The rest are per-call and go
/// back to the caller. No variant carries key material.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("key store not found at {}", .0.display())]
    KeyStoreNotFound(PathBuf),

    #[error("key store initialization failed: {0}")]
    KeyStoreInit(String),

    #[error("security provider registration failed: {0}")]
    ProviderRegistration(String),

    #[error("encryption key {0} not found")]
    EncryptionKeyNotFound(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unable to decrypt value protected by key {0}")]
    DecryptionFailed(String),

    #[error("unsupported cipher: {0}")]
    UnsupportedCipher(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServiceError {
    /// Whether this error should abort service activation.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            ServiceError::Configuration(_)
                | ServiceError::KeyStoreNotFound(_)
                | ServiceError::KeyStoreInit(_)
                | ServiceError::ProviderRegistration(_)
        )
    }
}

impl From<KeyStoreError> for ServiceError {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::Configuration(msg) => ServiceError::Configuration(msg),
            KeyStoreError::KeyStoreNotFound(path) => ServiceError::KeyStoreNotFound(path),
            KeyStoreError::KeyStoreInit(msg) => ServiceError::KeyStoreInit(msg),
            KeyStoreError::ProviderRegistration(msg) => ServiceError::ProviderRegistration(msg),
        }
    }
}

impl From<CryptoError> for ServiceError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::UnsupportedCipher(name) => ServiceError::UnsupportedCipher(name),
            CryptoError::Encoding(_) | CryptoError::InvalidNonceLength { .. } => {
                ServiceError::MalformedEnvelope(err.to_string())
            }
            other => ServiceError::Crypto(other.to_string()),
        }
    }
}
