//! Key stores for fieldvault.
//!
//! Opens the key material that field encryption runs on and keeps it
//! swappable at runtime:
//! - [`KeyStoreConfig`]: backend selection and credentials, resolved from
//!   `fieldvault.*` properties
//! - [`FileBackend`]: password-protected key-store files, with first-boot
//!   provisioning of the primary key
//! - [`HsmBackend`]: PKCS#11 tokens reached through a [`ProviderRegistry`];
//!   the `pkcs11` feature adds a `cryptoki`-backed provider factory
//! - [`KeySelector`]: alias lookup against the current [`KeyStoreHandle`],
//!   with atomic rotation

mod backend;
mod config;
mod error;
mod file;
mod handle;
mod hsm;
#[cfg(feature = "pkcs11")]
mod pkcs11;
mod selector;

pub use backend::{backend_for, open_key_store, KeyStoreBackend};
pub use config::{
    env_var_name, BackendKind, InstanceRole, KeyStoreConfig, Password, DEFAULT_PRIMARY_ALIAS,
    DEFAULT_STORE_TYPE, PKCS11_STORE_TYPE, PROP_CRYPTO_ALIAS, PROP_INSTALL_LOCATION,
    PROP_INSTANCE_TYPE, PROP_KEYSTORE_LOCATION, PROP_KEYSTORE_PASSWORD, PROP_KEYSTORE_PROVIDER,
    PROP_KEYSTORE_TYPE, PROP_PKCS11_CONFIG,
};
pub use error::{KeyStoreError, KeyStoreResult};
pub use file::{
    FileBackend, KeyStoreFile, SecretKeyEntry, FORMAT_VERSION, MAX_KDF_PARAMS,
    SECRET_KEY_ALGORITHM, SOFTWARE_PROVIDER,
};
pub use handle::KeyStoreHandle;
pub use hsm::{
    HsmBackend, HsmProvider, HsmProviderFactory, HsmToken, Pkcs11Config, ProviderRegistry,
};
#[cfg(feature = "pkcs11")]
pub use pkcs11::{Pkcs11Provider, Pkcs11ProviderFactory, Pkcs11Token};
pub use selector::KeySelector;
