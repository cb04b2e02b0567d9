//! Key-store error types.

use fieldvault_crypto::CryptoError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for key-store operations.
pub type KeyStoreResult<T> = Result<T, KeyStoreError>;

/// Errors raised while configuring, opening or provisioning a key store.
///
/// `Configuration` means the supplied settings are malformed; every other
/// variant means the settings were usable but the backend could not be
/// reached or loaded.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("key store not found at {}", .0.display())]
    KeyStoreNotFound(PathBuf),

    #[error("key store initialization failed: {0}")]
    KeyStoreInit(String),

    #[error("security provider registration failed: {0}")]
    ProviderRegistration(String),
}

impl From<std::io::Error> for KeyStoreError {
    fn from(err: std::io::Error) -> Self {
        KeyStoreError::KeyStoreInit(format!("I/O error: {err}"))
    }
}

impl From<serde_json::Error> for KeyStoreError {
    fn from(err: serde_json::Error) -> Self {
        KeyStoreError::KeyStoreInit(format!("malformed key store document: {err}"))
    }
}

impl From<CryptoError> for KeyStoreError {
    fn from(err: CryptoError) -> Self {
        KeyStoreError::KeyStoreInit(err.to_string())
    }
}
