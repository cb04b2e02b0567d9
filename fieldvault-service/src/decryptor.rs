//! Opening envelopes, and the chain of decryptors that owns them.

use crate::envelope::{Envelope, SimpleParams, SIMPLE_ENCRYPTION_TYPE};
use crate::error::{ServiceError, ServiceResult};
use fieldvault_crypto::{CipherSuite, CryptoError};
use fieldvault_keystore::KeySelector;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Outcome of offering an envelope to one decryptor.
#[derive(Debug, PartialEq)]
pub enum Decryption {
    Decrypted(Value),
    /// This decryptor can't open the envelope; older chain entries may.
    Declined(Decline),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decline {
    pub alias: String,
    pub reason: DeclineReason,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeclineReason {
    /// The alias isn't in this decryptor's key store.
    MissingKey,
    /// The alias resolved but its key didn't authenticate the ciphertext.
    AuthenticationFailed,
}

/// Opens envelopes of one type.
pub trait JsonDecryptor: Send + Sync {
    /// Envelope type this decryptor is registered for.
    fn type_tag(&self) -> &str;

    /// Decrypts the `value` member of an envelope.
    ///
    /// Returns `Declined` when the key is absent or fails authentication, and
    /// an error when the envelope itself is unusable.
    fn decrypt(&self, value: &Value) -> ServiceResult<Decryption>;
}

/// Decryptor for `x-simple-encryption` envelopes, resolving keys through a
/// [`KeySelector`].
pub struct SimpleDecryptor {
    type_tag: String,
    selector: KeySelector,
}

impl SimpleDecryptor {
    pub fn new(selector: KeySelector) -> Self {
        Self::with_type(SIMPLE_ENCRYPTION_TYPE, selector)
    }

    /// Registers the simple format under a different type tag.
    pub fn with_type(type_tag: impl Into<String>, selector: KeySelector) -> Self {
        Self {
            type_tag: type_tag.into(),
            selector,
        }
    }

    pub fn selector(&self) -> &KeySelector {
        &self.selector
    }
}

impl JsonDecryptor for SimpleDecryptor {
    fn type_tag(&self) -> &str {
        &self.type_tag
    }

    fn decrypt(&self, value: &Value) -> ServiceResult<Decryption> {
        let params = SimpleParams::from_value(value)?;
        let suite: CipherSuite = params.algorithm.parse()?;

        let Some(key) = self.selector.select(&params.key_alias) else {
            return Ok(Decryption::Declined(Decline {
                alias: params.key_alias,
                reason: DeclineReason::MissingKey,
            }));
        };

        let sealed = params.sealed()?;
        let plaintext = match suite.decrypt(&key, &sealed, params.key_alias.as_bytes()) {
            Ok(plaintext) => plaintext,
            Err(CryptoError::Decryption(_)) => {
                return Ok(Decryption::Declined(Decline {
                    alias: params.key_alias,
                    reason: DeclineReason::AuthenticationFailed,
                }));
            }
            Err(e) => return Err(e.into()),
        };

        let decrypted = parse_plaintext(&plaintext).map_err(|e| {
            ServiceError::MalformedEnvelope(format!("decrypted payload is not JSON: {e}"))
        })?;
        Ok(Decryption::Decrypted(decrypted))
    }
}

/// Parses an authenticated plaintext without serde_json's nesting limit, so
/// anything [`crate::SimpleEncryptor`] sealed can be opened again.
fn parse_plaintext(plaintext: &[u8]) -> serde_json::Result<Value> {
    let mut de = serde_json::Deserializer::from_slice(plaintext);
    de.disable_recursion_limit();
    let value = Value::deserialize(&mut de)?;
    de.end()?;
    Ok(value)
}

impl fmt::Debug for SimpleDecryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleDecryptor")
            .field("type_tag", &self.type_tag)
            .field("aliases", &self.selector.aliases())
            .finish()
    }
}

/// Registered decryptors, newest first.
///
/// Registration is rare (startup and rotation); lookups take a snapshot of
/// the list so a registration never blocks an in-flight decrypt.
#[derive(Default)]
pub struct DecryptorChain {
    entries: RwLock<Vec<Arc<dyn JsonDecryptor>>>,
}

impl DecryptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts `decryptor` ahead of every existing entry.
    pub fn register(&self, decryptor: Arc<dyn JsonDecryptor>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        debug!(
            "registering decryptor for {} ahead of {} existing entries",
            decryptor.type_tag(),
            entries.len()
        );
        entries.insert(0, decryptor);
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn JsonDecryptor>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Type tags in chain order.
    pub fn type_tags(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|d| d.type_tag().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl fmt::Debug for DecryptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptorChain")
            .field("type_tags", &self.type_tags())
            .finish()
    }
}

/// Offers an envelope to each matching decryptor in turn.
///
/// Returns `Ok(None)` when `node` is not an envelope or no decryptor is
/// registered for its type. When every matching decryptor declines, the
/// error is `DecryptionFailed` if some key was found but failed
/// authentication, and `EncryptionKeyNotFound` otherwise.
pub fn decrypt_node(
    decryptors: &[Arc<dyn JsonDecryptor>],
    node: &Value,
) -> ServiceResult<Option<Value>> {
    let Some(envelope) = Envelope::from_value(node) else {
        return Ok(None);
    };

    let mut last_decline: Option<Decline> = None;
    let mut key_found = false;

    for decryptor in decryptors
        .iter()
        .filter(|d| d.type_tag() == envelope.type_tag)
    {
        match decryptor.decrypt(&envelope.value)? {
            Decryption::Decrypted(value) => return Ok(Some(value)),
            Decryption::Declined(decline) => {
                debug!(
                    "decryptor for {} declined key {}: {:?}",
                    envelope.type_tag, decline.alias, decline.reason
                );
                key_found |= decline.reason == DeclineReason::AuthenticationFailed;
                last_decline = Some(decline);
            }
        }
    }

    match last_decline {
        None => {
            debug!("no decryptor registered for {}, passing through", envelope.type_tag);
            Ok(None)
        }
        Some(decline) if key_found => Err(ServiceError::DecryptionFailed(decline.alias)),
        Some(decline) => Err(ServiceError::EncryptionKeyNotFound(decline.alias)),
    }
}
