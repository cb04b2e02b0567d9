//! Loaded key-store contents.

use crate::config::Password;
use crate::hsm::HsmToken;
use fieldvault_crypto::SecretKey;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// An opened key store: its key entries plus the password that unlocks it.
///
/// Handles are immutable once built. Rotation replaces the whole handle
/// (see [`crate::KeySelector`]), so a reader holding an `Arc<KeyStoreHandle>`
/// always sees one consistent generation of keys.
pub struct KeyStoreHandle {
    store_type: String,
    source: KeySource,
    password: Password,
}

enum KeySource {
    /// Entries decrypted from a key-store file.
    Entries(BTreeMap<String, SecretKey>),
    /// Keys held by a hardware token; looked up on demand.
    Token(Arc<dyn HsmToken>),
}

impl KeyStoreHandle {
    /// Builds a handle over in-memory key entries.
    pub fn from_entries(
        store_type: impl Into<String>,
        entries: BTreeMap<String, SecretKey>,
        password: Password,
    ) -> Self {
        Self {
            store_type: store_type.into(),
            source: KeySource::Entries(entries),
            password,
        }
    }

    /// Builds a handle whose keys live on an HSM token.
    pub fn from_token(
        store_type: impl Into<String>,
        token: Arc<dyn HsmToken>,
        password: Password,
    ) -> Self {
        Self {
            store_type: store_type.into(),
            source: KeySource::Token(token),
            password,
        }
    }

    /// Looks up the key stored under `alias`.
    ///
    /// Token failures are logged and reported as a missing key.
    pub fn select(&self, alias: &str) -> Option<SecretKey> {
        match &self.source {
            KeySource::Entries(entries) => entries.get(alias).cloned(),
            KeySource::Token(token) => match token.secret_key(alias) {
                Ok(key) => key,
                Err(e) => {
                    warn!("HSM lookup for alias {alias} failed: {e}");
                    None
                }
            },
        }
    }

    pub fn contains(&self, alias: &str) -> bool {
        match &self.source {
            KeySource::Entries(entries) => entries.contains_key(alias),
            KeySource::Token(_) => self.select(alias).is_some(),
        }
    }

    /// Aliases available in this store, sorted.
    pub fn aliases(&self) -> Vec<String> {
        match &self.source {
            KeySource::Entries(entries) => entries.keys().cloned().collect(),
            KeySource::Token(token) => match token.aliases() {
                Ok(mut aliases) => {
                    aliases.sort();
                    aliases
                }
                Err(e) => {
                    warn!("listing HSM aliases failed: {e}");
                    Vec::new()
                }
            },
        }
    }

    pub fn store_type(&self) -> &str {
        &self.store_type
    }

    pub fn password(&self) -> &Password {
        &self.password
    }

    /// Whether the keys live on a hardware token.
    pub fn is_token_backed(&self) -> bool {
        matches!(self.source, KeySource::Token(_))
    }
}

impl fmt::Debug for KeyStoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            KeySource::Entries(entries) => format!("{} entries", entries.len()),
            KeySource::Token(token) => format!("token {}", token.label()),
        };
        f.debug_struct("KeyStoreHandle")
            .field("store_type", &self.store_type)
            .field("source", &source)
            .finish_non_exhaustive()
    }
}
