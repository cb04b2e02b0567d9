//! Encrypted-value envelopes.
//!
//! An encrypted field is replaced in the document by:
//!
//! ```json
//! {"$crypto": {"type": "x-simple-encryption",
//!              "value": {"algorithm": "AES/GCM/NoPadding", "keyAlias": "...",
//!                        "iv": "<base64>", "data": "<base64>"}}}
//! ```
//!
//! `type` names the decryptor that owns the envelope; `value` is opaque to
//! everything but that decryptor.

use crate::error::{ServiceError, ServiceResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fieldvault_crypto::EncryptedData;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key that marks an object as an envelope.
pub const CRYPTO_MARKER: &str = "$crypto";

/// Type tag of envelopes produced by [`crate::SimpleEncryptor`].
pub const SIMPLE_ENCRYPTION_TYPE: &str = "x-simple-encryption";

const TYPE_FIELD: &str = "type";
const VALUE_FIELD: &str = "value";

/// Structural envelope check, independent of cipher suite.
///
/// Accepts an object whose only member is `$crypto`, holding an object with
/// a string `type` and an object `value`.
pub fn is_envelope(node: &Value) -> bool {
    Envelope::from_value(node).is_some()
}

/// A parsed envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub type_tag: String,
    pub value: Value,
}

impl Envelope {
    pub fn new(type_tag: impl Into<String>, value: Value) -> Self {
        Self {
            type_tag: type_tag.into(),
            value,
        }
    }

    /// Parses `node` if it is envelope-shaped.
    pub fn from_value(node: &Value) -> Option<Self> {
        let outer = node.as_object()?;
        if outer.len() != 1 {
            return None;
        }
        let inner = outer.get(CRYPTO_MARKER)?.as_object()?;
        let type_tag = inner.get(TYPE_FIELD)?.as_str()?;
        let value = inner.get(VALUE_FIELD)?;
        if !value.is_object() {
            return None;
        }
        Some(Self::new(type_tag, value.clone()))
    }

    pub fn to_value(&self) -> Value {
        let mut inner = Map::new();
        inner.insert(TYPE_FIELD.to_string(), Value::String(self.type_tag.clone()));
        inner.insert(VALUE_FIELD.to_string(), self.value.clone());

        let mut outer = Map::new();
        outer.insert(CRYPTO_MARKER.to_string(), Value::Object(inner));
        Value::Object(outer)
    }
}

/// Parameters carried in the `value` of a simple-encryption envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleParams {
    pub algorithm: String,
    pub key_alias: String,
    pub iv: String,
    pub data: String,
}

impl SimpleParams {
    pub fn new(algorithm: &str, key_alias: &str, sealed: &EncryptedData) -> Self {
        Self {
            algorithm: algorithm.to_string(),
            key_alias: key_alias.to_string(),
            iv: STANDARD.encode(&sealed.nonce),
            data: STANDARD.encode(&sealed.ciphertext),
        }
    }

    pub fn from_value(value: &Value) -> ServiceResult<Self> {
        Self::deserialize(value).map_err(|e| {
            ServiceError::MalformedEnvelope(format!("invalid envelope parameters: {e}"))
        })
    }

    pub fn to_value(&self) -> ServiceResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decodes `iv` and `data` back into sealed bytes.
    pub fn sealed(&self) -> ServiceResult<EncryptedData> {
        let decode = |field: &str, text: &str| {
            STANDARD.decode(text).map_err(|e| {
                ServiceError::MalformedEnvelope(format!("{field} is not valid base64: {e}"))
            })
        };
        Ok(EncryptedData::new(
            decode("iv", &self.iv)?,
            decode("data", &self.data)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({"$crypto": {"type": "x-simple-encryption", "value": {
            "algorithm": "AES/GCM/NoPadding", "keyAlias": "k", "iv": "AAAA", "data": "AAAA"
        }}})
    }

    #[test]
    fn recognizes_envelope_shape() {
        assert!(is_envelope(&sample()));
        assert!(is_envelope(&json!({"$crypto": {"type": "other-suite", "value": {}}})));
    }

    #[test]
    fn rejects_near_misses() {
        assert!(!is_envelope(&Value::Null));
        assert!(!is_envelope(&json!("$crypto")));
        assert!(!is_envelope(&json!({"$crypto": "x"})));
        assert!(!is_envelope(&json!({"$crypto": {"value": {}}})));
        assert!(!is_envelope(&json!({"$crypto": {"type": 7, "value": {}}})));
        assert!(!is_envelope(&json!({"$crypto": {"type": "t", "value": "v"}})));
        assert!(!is_envelope(&json!({"$crypto": {"type": "t", "value": {}}, "extra": 1})));
        assert!(!is_envelope(&json!([{"$crypto": {"type": "t", "value": {}}}])));
    }

    #[test]
    fn envelope_value_roundtrip() {
        let parsed = Envelope::from_value(&sample()).unwrap();
        assert_eq!(parsed.type_tag, SIMPLE_ENCRYPTION_TYPE);
        assert_eq!(parsed.to_value(), sample());
    }

    #[test]
    fn params_use_camel_case_alias_field() {
        let params = SimpleParams::from_value(&sample()["$crypto"]["value"]).unwrap();
        assert_eq!(params.key_alias, "k");
        assert_eq!(params.to_value().unwrap()["keyAlias"], "k");
    }

    #[test]
    fn missing_params_are_malformed() {
        let err = SimpleParams::from_value(&json!({"algorithm": "AES/GCM/NoPadding"})).unwrap_err();
        assert!(matches!(err, ServiceError::MalformedEnvelope(_)));
    }

    #[test]
    fn bad_base64_is_malformed() {
        let params = SimpleParams {
            algorithm: "AES/GCM/NoPadding".into(),
            key_alias: "k".into(),
            iv: "***".into(),
            data: "AAAA".into(),
        };
        let err = params.sealed().unwrap_err();
        assert!(matches!(err, ServiceError::MalformedEnvelope(ref m) if m.contains("iv")));
    }
}
