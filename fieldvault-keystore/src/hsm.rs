//! HSM-backed key stores.
//!
//! The HSM owns persistence: opening a token never writes local state.
//! Access goes through a PKCS#11 provider that must first be registered
//! with a [`ProviderRegistry`]. Registries are explicit values rather than
//! process globals; share one `Arc<ProviderRegistry>` per process. Build
//! with the `pkcs11` feature and use
//! [`ProviderRegistry::with_builtin_factories`] to drive vendor libraries.

use crate::backend::KeyStoreBackend;
use crate::config::{BackendKind, KeyStoreConfig, Password, PKCS11_STORE_TYPE};
use crate::error::{KeyStoreError, KeyStoreResult};
use crate::handle::KeyStoreHandle;
use fieldvault_crypto::SecretKey;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info};

/// Parsed PKCS#11 provider configuration.
///
/// The file uses `key = value` lines; blank lines and lines starting with
/// `#` are ignored. `name` and `library` are required.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pkcs11Config {
    pub name: String,
    pub library: PathBuf,
    pub slot: Option<u64>,
    /// Every attribute in the file, including the ones above.
    pub attributes: BTreeMap<String, String>,
}

impl Pkcs11Config {
    pub fn load(path: &Path) -> KeyStoreResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            KeyStoreError::ProviderRegistration(format!(
                "unable to read pkcs11 config {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> KeyStoreResult<Self> {
        let mut attributes = BTreeMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                KeyStoreError::ProviderRegistration(format!(
                    "pkcs11 config line {}: expected key = value",
                    lineno + 1
                ))
            })?;
            attributes.insert(key.trim().to_string(), value.trim().to_string());
        }

        let required = |key: &str| {
            attributes.get(key).cloned().ok_or_else(|| {
                KeyStoreError::ProviderRegistration(format!("pkcs11 config is missing {key}"))
            })
        };
        let name = required("name")?;
        let library = PathBuf::from(required("library")?);
        let slot = attributes
            .get("slot")
            .map(|s| {
                s.parse::<u64>().map_err(|_| {
                    KeyStoreError::ProviderRegistration(format!("invalid pkcs11 slot: {s}"))
                })
            })
            .transpose()?;

        Ok(Self {
            name,
            library,
            slot,
            attributes,
        })
    }

    /// Name under which the provider is registered.
    pub fn provider_name(&self) -> String {
        format!("PKCS11-{}", self.name)
    }
}

/// An opened, logged-in HSM token.
pub trait HsmToken: Send + Sync {
    /// Human-readable token label, safe to log.
    fn label(&self) -> &str;

    /// Returns the secret key stored under `alias`, if any.
    fn secret_key(&self, alias: &str) -> KeyStoreResult<Option<SecretKey>>;

    /// Lists every alias on the token.
    fn aliases(&self) -> KeyStoreResult<Vec<String>>;
}

/// An installed PKCS#11 provider.
pub trait HsmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Logs in to the token with `password`.
    fn open(&self, password: &Password) -> KeyStoreResult<Arc<dyn HsmToken>>;
}

/// Installs providers for PKCS#11 libraries it understands.
pub trait HsmProviderFactory: Send + Sync {
    /// Whether this factory can drive the library named in `config`.
    fn supports(&self, config: &Pkcs11Config) -> bool;

    fn install(&self, config: &Pkcs11Config) -> KeyStoreResult<Arc<dyn HsmProvider>>;
}

/// Registry of installed security providers.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: RwLock<Vec<Arc<dyn HsmProviderFactory>>>,
    providers: RwLock<BTreeMap<String, Arc<dyn HsmProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the factories compiled into this crate:
    /// the `cryptoki`-based PKCS#11 factory when the `pkcs11` feature is on.
    pub fn with_builtin_factories() -> Self {
        let registry = Self::new();
        #[cfg(feature = "pkcs11")]
        registry.add_factory(Arc::new(crate::pkcs11::Pkcs11ProviderFactory));
        registry
    }

    /// Adds a factory. Factories are consulted in insertion order.
    pub fn add_factory(&self, factory: Arc<dyn HsmProviderFactory>) {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(factory);
    }

    /// Installs the provider described by `config`.
    ///
    /// Registering the same provider name twice returns the already
    /// installed provider.
    pub fn register(&self, config: &Pkcs11Config) -> KeyStoreResult<Arc<dyn HsmProvider>> {
        let provider_name = config.provider_name();
        if let Some(existing) = self.provider(&provider_name) {
            debug!("security provider {provider_name} already registered");
            return Ok(existing);
        }

        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|f| f.supports(config))
            .cloned()
            .ok_or_else(|| {
                KeyStoreError::ProviderRegistration(format!(
                    "no provider factory supports pkcs11 library {}",
                    config.library.display()
                ))
            })?;

        let provider = factory.install(config)?;
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        let provider = providers
            .entry(provider_name.clone())
            .or_insert(provider)
            .clone();
        info!("registered security provider {provider_name}");
        Ok(provider)
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn HsmProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

/// Backend over a PKCS#11 token.
pub struct HsmBackend {
    config: KeyStoreConfig,
    registry: Arc<ProviderRegistry>,
}

impl HsmBackend {
    pub fn new(config: KeyStoreConfig, registry: Arc<ProviderRegistry>) -> Self {
        Self { config, registry }
    }
}

impl KeyStoreBackend for HsmBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hsm
    }

    fn init(&self) -> KeyStoreResult<KeyStoreHandle> {
        let config_path = self.config.resolved_pkcs11_config().ok_or_else(|| {
            KeyStoreError::Configuration("no pkcs11 config file provided".into())
        })?;
        let password = self.config.require_password()?;

        let pkcs11 = Pkcs11Config::load(&config_path)?;
        let provider = self.registry.register(&pkcs11)?;

        let token = provider.open(password).map_err(|e| {
            error!("unable to load pkcs11 keystore via {}: {e}", provider.name());
            match e {
                KeyStoreError::KeyStoreInit(msg) => {
                    KeyStoreError::KeyStoreInit(format!("unable to load pkcs11 keystore: {msg}"))
                }
                other => other,
            }
        })?;
        info!("opened pkcs11 token {}", token.label());

        Ok(KeyStoreHandle::from_token(
            PKCS11_STORE_TYPE,
            token,
            password.clone(),
        ))
    }
}
