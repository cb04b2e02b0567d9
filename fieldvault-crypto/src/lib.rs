//! Cryptographic primitives for fieldvault.
//!
//! Provides the building blocks the key store and the JSON crypto service
//! share:
//! - `SecretKey`: 256-bit symmetric key material, zeroized on drop
//! - Argon2id derivation of store-protection keys from passwords
//! - AES-256-GCM and ChaCha20-Poly1305 authenticated encryption
//!
//! # Architecture
//!
//! Keys are only ever handled through [`SecretKey`], whose `Debug` output is
//! redacted so key bytes cannot leak through logs or error messages.
//!
//! Two families of keys exist:
//!
//! 1. **Data keys**: random AES-256 keys living in a key store under an
//!    alias. They encrypt JSON field values.
//!
//! 2. **Store keys**: derived from the key-store password with Argon2id.
//!    They seal the data keys inside a key-store file and are never
//!    persisted.

mod cipher;
mod error;
mod key;

pub use cipher::{
    decrypt, encrypt, CipherSuite, EncryptedData, AES_GCM_NOPADDING, CHACHA20_POLY1305,
    NONCE_SIZE, TAG_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, generate_secret_key, KdfParams, Salt, SecretKey, KEY_SIZE, SALT_SIZE};
