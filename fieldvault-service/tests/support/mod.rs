//! Shared helpers for crypto service integration tests.

#![allow(dead_code)]

use fieldvault_crypto::KdfParams;
use fieldvault_keystore::{
    KeyStoreConfig, KeyStoreFile, Password, ProviderRegistry, DEFAULT_STORE_TYPE,
};
use fieldvault_service::CryptoService;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub const PASSWORD: &str = "changeit";
pub const PRIMARY_ALIAS: &str = "openidm-sym-default";

/// Routes service logs to the test writer. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("fieldvault_service=debug,fieldvault_keystore=debug")
        }))
        .with_test_writer()
        .try_init();
}

/// Creates an empty key store with cheap KDF parameters.
pub fn empty_store(dir: &Path) -> PathBuf {
    let path = dir.join("ks.jceks");
    KeyStoreFile::create(
        &path,
        DEFAULT_STORE_TYPE,
        &Password::new(PASSWORD),
        KdfParams::insecure_fast(),
    )
    .expect("store creation must succeed");
    path
}

pub fn file_config(path: &Path) -> KeyStoreConfig {
    KeyStoreConfig::file(path, PASSWORD, PRIMARY_ALIAS)
}

/// A standalone service over a freshly provisioned store in `dir`.
pub fn standalone_service(dir: &Path) -> (CryptoService, PathBuf) {
    init_tracing();
    let path = empty_store(dir);
    let service = CryptoService::activate(&file_config(&path), Arc::new(ProviderRegistry::new()))
        .expect("activation must succeed");
    (service, path)
}
