//! Key-store configuration.
//!
//! Settings are resolved from flat `fieldvault.*` properties supplied by the
//! host (a properties file, a config service, the environment). Nothing here
//! reads global state: callers pass a lookup function or use
//! [`KeyStoreConfig::from_env`].

use crate::error::{KeyStoreError, KeyStoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const PROP_KEYSTORE_TYPE: &str = "fieldvault.keystore.type";
pub const PROP_KEYSTORE_PROVIDER: &str = "fieldvault.keystore.provider";
pub const PROP_KEYSTORE_LOCATION: &str = "fieldvault.keystore.location";
pub const PROP_KEYSTORE_PASSWORD: &str = "fieldvault.keystore.password";
pub const PROP_CRYPTO_ALIAS: &str = "fieldvault.config.crypto.alias";
pub const PROP_INSTANCE_TYPE: &str = "fieldvault.instance.type";
pub const PROP_PKCS11_CONFIG: &str = "fieldvault.security.pkcs11.config";
pub const PROP_INSTALL_LOCATION: &str = "fieldvault.install.location";

/// Store type used when none is configured.
pub const DEFAULT_STORE_TYPE: &str = "jceks";

/// Store type that selects the HSM backend.
pub const PKCS11_STORE_TYPE: &str = "pkcs11";

/// Primary key alias used when none is configured.
pub const DEFAULT_PRIMARY_ALIAS: &str = "fieldvault-sym-default";

/// Which backend a store type maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    File,
    Hsm,
}

impl BackendKind {
    /// `pkcs11` (any case) selects the HSM backend; every other value,
    /// including an empty one, selects the file backend.
    pub fn for_store_type(store_type: &str) -> Self {
        if store_type.trim().eq_ignore_ascii_case(PKCS11_STORE_TYPE) {
            BackendKind::Hsm
        } else {
            BackendKind::File
        }
    }
}

/// Role of this process within a deployment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceRole {
    #[default]
    Standalone,
    ClusteredFirst,
    ClusteredAdditional,
}

impl InstanceRole {
    /// Whether this instance may generate a missing primary key.
    ///
    /// Only the node that owns the key store on first boot provisions keys;
    /// additional cluster nodes wait for the store to be distributed.
    pub fn may_provision_keys(&self) -> bool {
        matches!(self, InstanceRole::Standalone | InstanceRole::ClusteredFirst)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceRole::Standalone => "standalone",
            InstanceRole::ClusteredFirst => "clustered-first",
            InstanceRole::ClusteredAdditional => "clustered-additional",
        }
    }
}

impl fmt::Display for InstanceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceRole {
    type Err = KeyStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standalone" => Ok(InstanceRole::Standalone),
            "clustered-first" => Ok(InstanceRole::ClusteredFirst),
            "clustered-additional" => Ok(InstanceRole::ClusteredAdditional),
            other => Err(KeyStoreError::Configuration(format!(
                "unknown instance type: {other}"
            ))),
        }
    }
}

/// Key-store password. Zeroized on drop, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Everything needed to select and open a key-store backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// Store type. `pkcs11` selects the HSM backend.
    pub store_type: String,

    /// Optional provider name for the file backend.
    pub provider: Option<String>,

    /// Key-store file location (file backend).
    pub location: Option<PathBuf>,

    /// Store password. Required by both backends.
    pub password: Option<Password>,

    /// Alias of the primary symmetric key.
    pub primary_alias: String,

    /// Controls whether a missing primary key is generated on startup.
    pub instance_role: InstanceRole,

    /// PKCS#11 provider configuration file (HSM backend).
    pub pkcs11_config: Option<PathBuf>,

    /// Base directory for relative locations.
    pub install_dir: Option<PathBuf>,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            store_type: DEFAULT_STORE_TYPE.to_string(),
            provider: None,
            location: None,
            password: None,
            primary_alias: DEFAULT_PRIMARY_ALIAS.to_string(),
            instance_role: InstanceRole::Standalone,
            pkcs11_config: None,
            install_dir: None,
        }
    }
}

impl KeyStoreConfig {
    /// Builds a file-backed configuration.
    pub fn file(location: impl Into<PathBuf>, password: &str, primary_alias: &str) -> Self {
        Self {
            location: Some(location.into()),
            password: Some(Password::new(password)),
            primary_alias: primary_alias.to_string(),
            ..Self::default()
        }
    }

    /// Builds an HSM-backed configuration.
    pub fn pkcs11(config_path: impl Into<PathBuf>, password: &str) -> Self {
        Self {
            store_type: PKCS11_STORE_TYPE.to_string(),
            password: Some(Password::new(password)),
            pkcs11_config: Some(config_path.into()),
            ..Self::default()
        }
    }

    /// Resolves configuration from `fieldvault.*` properties.
    ///
    /// Blank values count as absent. An unparseable instance type is a
    /// configuration error.
    pub fn resolve<F>(lookup: F) -> KeyStoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let instance_role = match get(PROP_INSTANCE_TYPE) {
            Some(raw) => raw.parse()?,
            None => defaults.instance_role,
        };

        Ok(Self {
            store_type: get(PROP_KEYSTORE_TYPE).unwrap_or(defaults.store_type),
            provider: get(PROP_KEYSTORE_PROVIDER),
            location: get(PROP_KEYSTORE_LOCATION).map(PathBuf::from),
            password: get(PROP_KEYSTORE_PASSWORD).map(Password::new),
            primary_alias: get(PROP_CRYPTO_ALIAS).unwrap_or(defaults.primary_alias),
            instance_role,
            pkcs11_config: get(PROP_PKCS11_CONFIG).map(PathBuf::from),
            install_dir: get(PROP_INSTALL_LOCATION).map(PathBuf::from),
        })
    }

    /// Resolves configuration from environment variables
    /// (`fieldvault.keystore.type` → `FIELDVAULT_KEYSTORE_TYPE`).
    pub fn from_env() -> KeyStoreResult<Self> {
        Self::resolve(|name| std::env::var(env_var_name(name)).ok())
    }

    pub fn backend_kind(&self) -> BackendKind {
        BackendKind::for_store_type(&self.store_type)
    }

    /// Location with relative paths resolved against `install_dir`.
    pub fn resolved_location(&self) -> Option<PathBuf> {
        self.location
            .as_deref()
            .map(|loc| resolve_path(loc, self.install_dir.as_deref()))
    }

    /// PKCS#11 config path with relative paths resolved against `install_dir`.
    pub fn resolved_pkcs11_config(&self) -> Option<PathBuf> {
        self.pkcs11_config
            .as_deref()
            .map(|p| resolve_path(p, self.install_dir.as_deref()))
    }

    /// Returns the password or the standard configuration error.
    pub fn require_password(&self) -> KeyStoreResult<&Password> {
        self.password.as_ref().ok_or_else(|| {
            KeyStoreError::Configuration("no keystore password provided in configuration".into())
        })
    }
}

/// Environment variable name for a `fieldvault.*` property.
pub fn env_var_name(property: &str) -> String {
    property.to_ascii_uppercase().replace('.', "_")
}

fn resolve_path(path: &Path, base: Option<&Path>) -> PathBuf {
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}
