//! Producing envelopes.

use crate::envelope::{Envelope, SimpleParams, SIMPLE_ENCRYPTION_TYPE};
use crate::error::ServiceResult;
use fieldvault_crypto::{CipherSuite, SecretKey};
use serde_json::Value;

/// Turns a JSON value into an envelope.
///
/// Implementations own their key. Callers never see raw key bytes.
pub trait JsonEncryptor: Send + Sync {
    /// Type tag written into produced envelopes.
    fn type_tag(&self) -> &str;

    fn encrypt(&self, value: &Value) -> ServiceResult<Value>;
}

/// Stateless `x-simple-encryption` encryptor bound to one key.
///
/// The plaintext is the compact JSON serialization of the value. The key
/// alias is bound in as associated data, so an envelope whose `keyAlias` was
/// edited fails authentication instead of decrypting under another key.
pub struct SimpleEncryptor {
    suite: CipherSuite,
    key: SecretKey,
    alias: String,
}

impl SimpleEncryptor {
    pub fn new(suite: CipherSuite, key: SecretKey, alias: impl Into<String>) -> Self {
        Self {
            suite,
            key,
            alias: alias.into(),
        }
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }
}

impl JsonEncryptor for SimpleEncryptor {
    fn type_tag(&self) -> &str {
        SIMPLE_ENCRYPTION_TYPE
    }

    fn encrypt(&self, value: &Value) -> ServiceResult<Value> {
        let plaintext = serde_json::to_vec(value)?;
        let sealed = self
            .suite
            .encrypt(&self.key, &plaintext, self.alias.as_bytes())?;
        let params = SimpleParams::new(self.suite.name(), &self.alias, &sealed);
        Ok(Envelope::new(SIMPLE_ENCRYPTION_TYPE, params.to_value()?).to_value())
    }
}

impl std::fmt::Debug for SimpleEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleEncryptor")
            .field("suite", &self.suite)
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}
