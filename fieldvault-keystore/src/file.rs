//! Password-protected key-store files.
//!
//! A key-store file is a JSON document. Each secret key is sealed with
//! ChaCha20-Poly1305 under a store key derived from the password with
//! Argon2id; the salt and cost parameters live in the file header. A sealed
//! verification token lets a wrong password be detected even when the store
//! holds no entries.

use crate::backend::KeyStoreBackend;
use crate::config::{BackendKind, KeyStoreConfig, Password};
use crate::error::{KeyStoreError, KeyStoreResult};
use crate::handle::KeyStoreHandle;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use fieldvault_crypto::{
    derive_key, generate_secret_key, CipherSuite, EncryptedData, KdfParams, Salt, SecretKey,
    SALT_SIZE,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Name of the built-in software provider. The only provider accepted by
/// the file backend.
pub const SOFTWARE_PROVIDER: &str = "fieldvault-software";

/// Algorithm label recorded for generated secret keys.
pub const SECRET_KEY_ALGORITHM: &str = "AES";

const VERIFICATION_PLAINTEXT: &[u8] = b"fieldvault-keystore-verification-token-v1";
const VERIFICATION_AAD: &[u8] = b"fieldvault:verification";
const STORE_CIPHER: CipherSuite = CipherSuite::ChaCha20Poly1305;

/// Upper bounds on the Argon2id costs a store header may ask for. A header
/// beyond these is treated as corrupted rather than derived.
pub const MAX_KDF_PARAMS: KdfParams = KdfParams {
    memory_kib: 1024 * 1024,
    iterations: 64,
    parallelism: 16,
};

#[derive(Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    store_type: String,
    kdf: KdfHeader,
    verification: String,
    #[serde(default)]
    entries: BTreeMap<String, EntryDocument>,
}

#[derive(Serialize, Deserialize)]
struct KdfHeader {
    salt: String,
    #[serde(flatten)]
    params: KdfParams,
}

#[derive(Serialize, Deserialize)]
struct EntryDocument {
    algorithm: String,
    created_at: DateTime<Utc>,
    sealed: String,
}

/// A secret-key entry held in memory.
#[derive(Clone, Debug)]
pub struct SecretKeyEntry {
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub key: SecretKey,
}

/// An unlocked key-store file.
pub struct KeyStoreFile {
    path: PathBuf,
    store_type: String,
    salt: Salt,
    params: KdfParams,
    store_key: SecretKey,
    entries: BTreeMap<String, SecretKeyEntry>,
}

impl KeyStoreFile {
    /// Creates a new, empty key store at `path` and writes it.
    ///
    /// Refuses to overwrite an existing file.
    pub fn create(
        path: impl Into<PathBuf>,
        store_type: &str,
        password: &Password,
        params: KdfParams,
    ) -> KeyStoreResult<Self> {
        let path = path.into();
        if path.exists() {
            return Err(KeyStoreError::KeyStoreInit(format!(
                "refusing to overwrite existing key store at {}",
                path.display()
            )));
        }

        let salt = Salt::random();
        let store_key = derive_key(password.expose(), &salt, &params)?;
        let store = Self {
            path,
            store_type: store_type.to_string(),
            salt,
            params,
            store_key,
            entries: BTreeMap::new(),
        };
        store.save()?;
        debug!("created key store {} at {}", store.store_type, store.path.display());
        Ok(store)
    }

    /// Opens and unlocks the key store at `path`.
    pub fn open(path: impl AsRef<Path>, password: &Password) -> KeyStoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            error!("key store not found under location {}", path.display());
            return Err(KeyStoreError::KeyStoreNotFound(path.to_path_buf()));
        }

        let raw = std::fs::read(path)?;
        let doc: StoreDocument = serde_json::from_slice(&raw)?;
        if doc.version != FORMAT_VERSION {
            return Err(KeyStoreError::KeyStoreInit(format!(
                "unsupported key store format version {}",
                doc.version
            )));
        }

        check_kdf_params(&doc.kdf.params)?;
        let salt = decode_salt(&doc.kdf.salt)?;
        let store_key = derive_key(password.expose(), &salt, &doc.kdf.params)?;

        let token = EncryptedData::from_base64(&doc.verification)?;
        let verified = STORE_CIPHER
            .decrypt(&store_key, &token, VERIFICATION_AAD)
            .map_err(|_| wrong_password(path))?;
        if verified != VERIFICATION_PLAINTEXT {
            return Err(wrong_password(path));
        }

        let mut entries = BTreeMap::new();
        for (alias, entry) in doc.entries {
            let sealed = EncryptedData::from_base64(&entry.sealed)?;
            let bytes = STORE_CIPHER
                .decrypt(&store_key, &sealed, alias.as_bytes())
                .map_err(|_| {
                    KeyStoreError::KeyStoreInit(format!("key store entry {alias} is corrupted"))
                })?;
            let key = SecretKey::from_slice(&bytes)?;
            entries.insert(
                alias,
                SecretKeyEntry {
                    algorithm: entry.algorithm,
                    created_at: entry.created_at,
                    key,
                },
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            store_type: doc.store_type,
            salt,
            params: doc.kdf.params,
            store_key,
            entries,
        })
    }

    /// Writes the store back to its path.
    ///
    /// The document is written to a sibling temp file and renamed into
    /// place, so readers never see a partially written store.
    pub fn save(&self) -> KeyStoreResult<()> {
        let verification =
            STORE_CIPHER.encrypt(&self.store_key, VERIFICATION_PLAINTEXT, VERIFICATION_AAD)?;

        let mut entries = BTreeMap::new();
        for (alias, entry) in &self.entries {
            let sealed =
                STORE_CIPHER.encrypt(&self.store_key, entry.key.as_bytes(), alias.as_bytes())?;
            entries.insert(
                alias.clone(),
                EntryDocument {
                    algorithm: entry.algorithm.clone(),
                    created_at: entry.created_at,
                    sealed: sealed.to_base64(),
                },
            );
        }

        let doc = StoreDocument {
            version: FORMAT_VERSION,
            store_type: self.store_type.clone(),
            kdf: KdfHeader {
                salt: STANDARD.encode(self.salt.as_bytes()),
                params: self.params,
            },
            verification: verification.to_base64(),
            entries,
        };

        let bytes = serde_json::to_vec_pretty(&doc)?;
        let tmp = tmp_path(&self.path);
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store_type(&self) -> &str {
        &self.store_type
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.entries.contains_key(alias)
    }

    pub fn get(&self, alias: &str) -> Option<&SecretKeyEntry> {
        self.entries.get(alias)
    }

    pub fn aliases(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores `key` under `alias`, replacing any existing entry. Not
    /// persisted until [`KeyStoreFile::save`].
    pub fn set_secret_key(&mut self, alias: &str, key: SecretKey) {
        self.entries.insert(
            alias.to_string(),
            SecretKeyEntry {
                algorithm: SECRET_KEY_ALGORITHM.to_string(),
                created_at: Utc::now(),
                key,
            },
        );
    }

    /// Generates a fresh AES-256 key under `alias`. Not persisted until
    /// [`KeyStoreFile::save`].
    pub fn generate_secret_key(&mut self, alias: &str) {
        self.set_secret_key(alias, generate_secret_key());
    }

    pub fn remove(&mut self, alias: &str) -> Option<SecretKeyEntry> {
        self.entries.remove(alias)
    }

    /// Consumes the store into an immutable handle.
    pub fn into_handle(self, password: Password) -> KeyStoreHandle {
        let entries = self
            .entries
            .iter()
            .map(|(alias, entry)| (alias.clone(), entry.key.clone()))
            .collect();
        KeyStoreHandle::from_entries(self.store_type.clone(), entries, password)
    }
}

fn decode_salt(encoded: &str) -> KeyStoreResult<Salt> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| KeyStoreError::KeyStoreInit(format!("malformed key store salt: {e}")))?;
    let arr: [u8; SALT_SIZE] = bytes.try_into().map_err(|b: Vec<u8>| {
        KeyStoreError::KeyStoreInit(format!("invalid key store salt length {}", b.len()))
    })?;
    Ok(Salt::from_bytes(arr))
}

fn check_kdf_params(params: &KdfParams) -> KeyStoreResult<()> {
    let max = MAX_KDF_PARAMS;
    if params.memory_kib > max.memory_kib
        || params.iterations > max.iterations
        || params.parallelism > max.parallelism
    {
        return Err(KeyStoreError::KeyStoreInit(format!(
            "key store kdf parameters out of range: {} KiB, {} iterations, parallelism {}",
            params.memory_kib, params.iterations, params.parallelism
        )));
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn wrong_password(path: &Path) -> KeyStoreError {
    KeyStoreError::KeyStoreInit(format!(
        "unable to unlock key store at {} (wrong password or corrupted file)",
        path.display()
    ))
}

/// Backend over a key-store file on the local file system.
///
/// On first boot of a standalone or first cluster node, a missing primary
/// key is generated and written back to the file.
pub struct FileBackend {
    config: KeyStoreConfig,
}

impl FileBackend {
    pub fn new(config: KeyStoreConfig) -> Self {
        Self { config }
    }

    fn check_provider(&self) -> KeyStoreResult<()> {
        match self.config.provider.as_deref().map(str::trim) {
            None | Some("") => Ok(()),
            Some(p) if p.eq_ignore_ascii_case(SOFTWARE_PROVIDER) => Ok(()),
            Some(p) => Err(KeyStoreError::KeyStoreInit(format!(
                "provider {p} not available for key store type {}",
                self.config.store_type
            ))),
        }
    }
}

impl KeyStoreBackend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn init(&self) -> KeyStoreResult<KeyStoreHandle> {
        let config = &self.config;
        let password = config.require_password()?;
        let location = config.resolved_location().ok_or_else(|| {
            KeyStoreError::Configuration("no keystore location provided in configuration".into())
        })?;
        self.check_provider()?;

        let describe = || {
            format!(
                "type: {} provider: {} location: {}",
                config.store_type,
                config.provider.as_deref().unwrap_or("default"),
                location.display()
            )
        };

        let mut store = KeyStoreFile::open(&location, password).map_err(|e| match e {
            KeyStoreError::KeyStoreInit(msg) => {
                error!("failed loading key store file of {}: {msg}", describe());
                KeyStoreError::KeyStoreInit(format!("{msg} ({})", describe()))
            }
            other => other,
        })?;

        if !store.store_type().eq_ignore_ascii_case(&config.store_type) {
            return Err(KeyStoreError::KeyStoreInit(format!(
                "key store has type {}, expected {} ({})",
                store.store_type(),
                config.store_type,
                describe()
            )));
        }

        if config.instance_role.may_provision_keys() && !store.contains(&config.primary_alias) {
            debug!("initializing secret key entry {} in the key store", config.primary_alias);
            store.generate_secret_key(&config.primary_alias);
            store.save().inspect_err(|e| {
                error!("failed persisting generated key to {}: {e}", location.display());
            })?;
        }

        for alias in store.aliases() {
            info!("available cryptography key: {alias}");
        }

        Ok(store.into_handle(password.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tmp_path_is_a_sibling() {
        let tmp = tmp_path(Path::new("/var/lib/ks.jceks"));
        assert_eq!(tmp, PathBuf::from("/var/lib/ks.jceks.tmp"));
    }

    #[test]
    fn kdf_params_are_bounded() {
        assert!(check_kdf_params(&KdfParams::default()).is_ok());
        assert!(check_kdf_params(&MAX_KDF_PARAMS).is_ok());

        let base = KdfParams::default();
        for params in [
            KdfParams {
                memory_kib: u32::MAX,
                ..base
            },
            KdfParams {
                iterations: 4_000_000_000,
                ..base
            },
            KdfParams {
                parallelism: 1024,
                ..base
            },
        ] {
            let err = check_kdf_params(&params).unwrap_err();
            assert!(matches!(err, KeyStoreError::KeyStoreInit(_)), "{params:?}");
        }
    }

    #[test]
    fn salt_of_wrong_length_is_rejected() {
        let err = decode_salt(&STANDARD.encode([1u8; 4])).unwrap_err();
        assert!(matches!(err, KeyStoreError::KeyStoreInit(_)));
    }
}
