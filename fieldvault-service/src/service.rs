//! The crypto service façade.

use crate::decryptor::{decrypt_node, DecryptorChain, JsonDecryptor, SimpleDecryptor};
use crate::encryptor::{JsonEncryptor, SimpleEncryptor};
use crate::envelope::{is_envelope, CRYPTO_MARKER};
use crate::error::{ServiceError, ServiceResult};
use crate::walk::walk;
use fieldvault_crypto::CipherSuite;
use fieldvault_keystore::{
    open_key_store, KeySelector, KeyStoreConfig, KeyStoreHandle, ProviderRegistry,
};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info};

/// Encrypts and decrypts JSON values against the active key store.
///
/// Built once at startup by [`CryptoService::activate`]; all operations take
/// `&self` and may be called from any thread. Key rotation goes through
/// [`CryptoService::update_key_store`] or
/// [`CryptoService::update_key_selector`] and never blocks in-flight calls
/// for longer than an `Arc` swap.
pub struct CryptoService {
    selector: RwLock<Option<KeySelector>>,
    chain: DecryptorChain,
    registry: Arc<ProviderRegistry>,
}

impl CryptoService {
    /// Opens the key store described by `config` and registers the default
    /// decryptor for it.
    pub fn activate(
        config: &KeyStoreConfig,
        registry: Arc<ProviderRegistry>,
    ) -> ServiceResult<Self> {
        debug!("activating crypto service with {} key store", config.store_type);
        let handle = open_key_store(config, &registry).map_err(|e| {
            error!("failed to load crypto service configuration: {e}");
            ServiceError::from(e)
        })?;
        Ok(Self::with_handle(handle, registry))
    }

    /// Activates from `FIELDVAULT_*` environment variables.
    pub fn activate_from_env(registry: Arc<ProviderRegistry>) -> ServiceResult<Self> {
        let config = KeyStoreConfig::from_env()?;
        Self::activate(&config, registry)
    }

    /// Activates from `fieldvault.*` properties supplied by `lookup`.
    pub fn activate_with<F>(lookup: F, registry: Arc<ProviderRegistry>) -> ServiceResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = KeyStoreConfig::resolve(lookup)?;
        Self::activate(&config, registry)
    }

    /// Builds an active service around an already opened key store.
    pub fn with_handle(handle: KeyStoreHandle, registry: Arc<ProviderRegistry>) -> Self {
        let handle = Arc::new(handle);
        let chain = DecryptorChain::new();
        chain.register(Arc::new(SimpleDecryptor::new(KeySelector::from_shared(
            Arc::clone(&handle),
        ))));
        info!(
            "crypto service active with {} key store ({} aliases)",
            handle.store_type(),
            handle.aliases().len()
        );

        Self {
            selector: RwLock::new(Some(KeySelector::from_shared(handle))),
            chain,
            registry,
        }
    }

    pub fn is_active(&self) -> bool {
        self.selector
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The live key selector. Follows rotations.
    pub fn key_selector(&self) -> ServiceResult<KeySelector> {
        self.selector
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(not_active)
    }

    /// A stateless encryptor for `alias` using `cipher`.
    pub fn get_encryptor(&self, cipher: &str, alias: &str) -> ServiceResult<SimpleEncryptor> {
        let suite: CipherSuite = cipher.parse()?;
        let Some(key) = self.key_selector()?.select(alias) else {
            error!("encryption key {alias} not found");
            return Err(ServiceError::EncryptionKeyNotFound(alias.to_string()));
        };
        Ok(SimpleEncryptor::new(suite, key, alias))
    }

    /// Wraps `value` in an envelope under `alias`. Null stays null.
    pub fn encrypt(&self, value: &Value, cipher: &str, alias: &str) -> ServiceResult<Value> {
        self.ensure_active()?;
        if value.is_null() {
            return Ok(Value::Null);
        }
        self.get_encryptor(cipher, alias)?.encrypt(value)
    }

    /// Returns a copy of `document` with every envelope it contains
    /// decrypted. Envelopes of unregistered types are left as they are.
    pub fn decrypt(&self, document: &Value) -> ServiceResult<Value> {
        self.ensure_active()?;
        let decryptors = self.chain.snapshot();
        walk(document, &mut |node: &Value| decrypt_node(&decryptors, node))
    }

    /// Decrypts `document` only if it is itself an envelope.
    pub fn decrypt_if_necessary(&self, document: &Value) -> ServiceResult<Value> {
        self.ensure_active()?;
        if !self.is_encrypted(document) {
            return Ok(document.clone());
        }
        self.decrypt(document)
    }

    /// Whether `document` is an envelope. Doesn't look below the top level.
    pub fn is_encrypted(&self, document: &Value) -> bool {
        is_envelope(document)
    }

    /// [`CryptoService::decrypt`] for stringified JSON.
    pub fn decrypt_str(&self, value: &str) -> ServiceResult<Value> {
        self.decrypt(&parse_stringified(value)?)
    }

    pub fn decrypt_if_necessary_str(&self, value: &str) -> ServiceResult<Value> {
        self.decrypt_if_necessary(&parse_stringified(value)?)
    }

    /// Whether `value` is a stringified envelope. Unparseable input is not.
    pub fn is_encrypted_str(&self, value: &str) -> bool {
        value.contains(CRYPTO_MARKER)
            && serde_json::from_str::<Value>(value).is_ok_and(|v| is_envelope(&v))
    }

    /// Registers a simple-encryption decryptor for `type_tag` that resolves
    /// keys through `selector`. It takes precedence over existing entries.
    pub fn register_decryptor(&self, type_tag: &str, selector: KeySelector) -> ServiceResult<()> {
        self.add_decryptor(Arc::new(SimpleDecryptor::with_type(type_tag, selector)))
    }

    /// Registers a custom decryptor ahead of existing entries.
    pub fn add_decryptor(&self, decryptor: Arc<dyn JsonDecryptor>) -> ServiceResult<()> {
        self.ensure_active()?;
        self.chain.register(decryptor);
        Ok(())
    }

    /// Registered decryptors, newest first.
    pub fn decryption_chain(&self) -> Vec<Arc<dyn JsonDecryptor>> {
        self.chain.snapshot()
    }

    /// Reopens the key store from `config` and installs it.
    pub fn update_key_store(&self, config: &KeyStoreConfig) -> ServiceResult<()> {
        self.ensure_active()?;
        let handle = open_key_store(config, &self.registry)?;
        self.update_key_selector(handle)
    }

    /// Installs `handle` as the current key store.
    ///
    /// New encryptions use it immediately. A decryptor pinned to it is
    /// registered first, so anything encrypted under the new store is
    /// decryptable as soon as the swap is visible; earlier generations keep
    /// their own entries and stay decryptable.
    pub fn update_key_selector(&self, handle: KeyStoreHandle) -> ServiceResult<()> {
        let selector = self.key_selector()?;
        let handle = Arc::new(handle);

        self.chain
            .register(Arc::new(SimpleDecryptor::new(KeySelector::from_shared(
                Arc::clone(&handle),
            ))));
        let previous = selector.update_shared(Arc::clone(&handle));

        info!(
            "rotated key store: {} aliases now, {} before",
            handle.aliases().len(),
            previous.aliases().len()
        );
        Ok(())
    }

    /// Drops the key selector and every registered decryptor. Later calls
    /// fail with a configuration error.
    pub fn deactivate(&self) {
        self.chain.clear();
        *self.selector.write().unwrap_or_else(PoisonError::into_inner) = None;
        info!("crypto service stopped");
    }

    fn ensure_active(&self) -> ServiceResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(not_active())
        }
    }
}

impl std::fmt::Debug for CryptoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoService")
            .field("active", &self.is_active())
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

fn not_active() -> ServiceError {
    ServiceError::Configuration("service not active".into())
}

/// Parses stringified JSON. Text that isn't an object or array is taken as
/// a plain string value.
fn parse_stringified(value: &str) -> ServiceResult<Value> {
    let trimmed = value.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        Ok(serde_json::from_str(value)?)
    } else {
        Ok(Value::String(value.to_string()))
    }
}
