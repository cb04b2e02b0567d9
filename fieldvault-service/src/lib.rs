//! Transparent field-level encryption for JSON documents.
//!
//! Sensitive values are swapped for self-describing envelopes before they
//! are stored, and swapped back on the way out:
//!
//! ```text
//! {"password": "secret"}
//!     → {"password": {"$crypto": {"type": "x-simple-encryption", "value": {...}}}}
//! ```
//!
//! [`CryptoService`] is the entry point. It opens a key store through
//! `fieldvault-keystore`, encrypts values under a key alias and decrypts
//! every envelope it finds in a document, consulting a chain of decryptors
//! newest first. Key rotation installs a new key store without invalidating
//! anything encrypted under the old one.

mod decryptor;
mod encryptor;
mod envelope;
mod error;
mod service;
mod walk;

pub use decryptor::{
    decrypt_node, Decline, DeclineReason, Decryption, DecryptorChain, JsonDecryptor,
    SimpleDecryptor,
};
pub use encryptor::{JsonEncryptor, SimpleEncryptor};
pub use envelope::{is_envelope, Envelope, SimpleParams, CRYPTO_MARKER, SIMPLE_ENCRYPTION_TYPE};
pub use error::{ServiceError, ServiceResult};
pub use service::CryptoService;
pub use walk::walk;
