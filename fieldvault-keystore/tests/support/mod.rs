//! Shared helpers for key-store integration tests.

#![allow(dead_code)]

use fieldvault_crypto::{KdfParams, SecretKey};
use fieldvault_keystore::{
    HsmProvider, HsmProviderFactory, HsmToken, KeyStoreError, KeyStoreFile, KeyStoreResult,
    Password, Pkcs11Config, DEFAULT_STORE_TYPE,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const PASSWORD: &str = "changeit";
pub const PRIMARY_ALIAS: &str = "openidm-sym-default";

/// Creates an empty store with cheap KDF parameters and returns its path.
pub fn empty_store(dir: &Path) -> PathBuf {
    let path = dir.join("keystore.jceks");
    KeyStoreFile::create(
        &path,
        DEFAULT_STORE_TYPE,
        &Password::new(PASSWORD),
        KdfParams::insecure_fast(),
    )
    .expect("store creation must succeed");
    path
}

/// Writes a PKCS#11 config for the in-memory token library.
pub fn write_pkcs11_config(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join("pkcs11.cfg");
    std::fs::write(
        &path,
        format!("# test token\nname = {name}\nlibrary = {MEMORY_LIBRARY}\nslot = 0\n"),
    )
    .expect("config write must succeed");
    path
}

pub const MEMORY_LIBRARY: &str = "/opt/test/libmemtoken.so";

/// In-memory stand-in for a PKCS#11 token.
pub struct MemoryToken {
    label: String,
    keys: BTreeMap<String, SecretKey>,
}

impl HsmToken for MemoryToken {
    fn label(&self) -> &str {
        &self.label
    }

    fn secret_key(&self, alias: &str) -> KeyStoreResult<Option<SecretKey>> {
        Ok(self.keys.get(alias).cloned())
    }

    fn aliases(&self) -> KeyStoreResult<Vec<String>> {
        Ok(self.keys.keys().cloned().collect())
    }
}

pub struct MemoryProvider {
    name: String,
    pin: String,
    keys: BTreeMap<String, SecretKey>,
}

impl HsmProvider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, password: &Password) -> KeyStoreResult<Arc<dyn HsmToken>> {
        if password.expose() != self.pin {
            return Err(KeyStoreError::KeyStoreInit("CKR_PIN_INCORRECT".into()));
        }
        Ok(Arc::new(MemoryToken {
            label: format!("{}-token", self.name),
            keys: self.keys.clone(),
        }))
    }
}

/// Factory that installs [`MemoryProvider`]s for [`MEMORY_LIBRARY`].
pub struct MemoryProviderFactory {
    pub pin: String,
    pub keys: BTreeMap<String, SecretKey>,
}

impl MemoryProviderFactory {
    pub fn with_key(alias: &str, key: SecretKey) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert(alias.to_string(), key);
        Self {
            pin: PASSWORD.to_string(),
            keys,
        }
    }
}

impl HsmProviderFactory for MemoryProviderFactory {
    fn supports(&self, config: &Pkcs11Config) -> bool {
        config.library == Path::new(MEMORY_LIBRARY)
    }

    fn install(&self, config: &Pkcs11Config) -> KeyStoreResult<Arc<dyn HsmProvider>> {
        Ok(Arc::new(MemoryProvider {
            name: config.provider_name(),
            pin: self.pin.clone(),
            keys: self.keys.clone(),
        }))
    }
}
