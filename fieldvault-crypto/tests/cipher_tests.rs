use fieldvault_crypto::{
    decrypt, encrypt, generate_secret_key, CipherSuite, EncryptedData, NONCE_SIZE, TAG_SIZE,
};
use proptest::prelude::*;

#[test]
fn aes_gcm_roundtrip() {
    let key = generate_secret_key();
    let plaintext = br#"{"password":"secret"}"#;

    let sealed = CipherSuite::Aes256Gcm.encrypt(&key, plaintext, b"alias").unwrap();
    let opened = CipherSuite::Aes256Gcm.decrypt(&key, &sealed, b"alias").unwrap();

    assert_eq!(opened, plaintext);
}

#[test]
fn chacha_roundtrip() {
    let key = generate_secret_key();
    let plaintext = b"store entry";

    let sealed = CipherSuite::ChaCha20Poly1305.encrypt(&key, plaintext, b"").unwrap();
    let opened = CipherSuite::ChaCha20Poly1305.decrypt(&key, &sealed, b"").unwrap();

    assert_eq!(opened, plaintext);
}

#[test]
fn ciphertext_carries_tag() {
    let key = generate_secret_key();
    let sealed = CipherSuite::Aes256Gcm.encrypt(&key, b"abc", b"").unwrap();
    assert_eq!(sealed.nonce.len(), NONCE_SIZE);
    assert_eq!(sealed.ciphertext.len(), 3 + TAG_SIZE);
}

#[test]
fn empty_plaintext_roundtrip() {
    let key = generate_secret_key();
    let sealed = encrypt(&key, b"").unwrap();
    assert!(decrypt(&key, &sealed).unwrap().is_empty());
}

#[test]
fn wrong_key_fails() {
    let key = generate_secret_key();
    let other = generate_secret_key();
    let sealed = CipherSuite::Aes256Gcm.encrypt(&key, b"secret", b"").unwrap();

    assert!(CipherSuite::Aes256Gcm.decrypt(&other, &sealed, b"").is_err());
}

#[test]
fn wrong_aad_fails() {
    let key = generate_secret_key();
    let sealed = CipherSuite::Aes256Gcm.encrypt(&key, b"secret", b"alias-a").unwrap();

    assert!(CipherSuite::Aes256Gcm.decrypt(&key, &sealed, b"alias-b").is_err());
}

#[test]
fn suites_are_not_interchangeable() {
    let key = generate_secret_key();
    let sealed = CipherSuite::Aes256Gcm.encrypt(&key, b"secret", b"").unwrap();

    assert!(CipherSuite::ChaCha20Poly1305.decrypt(&key, &sealed, b"").is_err());
}

#[test]
fn tampered_ciphertext_fails() {
    let key = generate_secret_key();
    let mut sealed = encrypt(&key, b"secret").unwrap();
    if let Some(byte) = sealed.ciphertext.first_mut() {
        *byte ^= 0xFF;
    }

    assert!(decrypt(&key, &sealed).is_err());
}

#[test]
fn each_encryption_uses_fresh_nonce() {
    let key = generate_secret_key();
    let a = CipherSuite::Aes256Gcm.encrypt(&key, b"same", b"").unwrap();
    let b = CipherSuite::Aes256Gcm.encrypt(&key, b"same", b"").unwrap();

    assert_ne!(a.nonce, b.nonce);
    assert_ne!(a.ciphertext, b.ciphertext);
}

#[test]
fn base64_form_splits_back_into_nonce_and_ciphertext() {
    let key = generate_secret_key();
    let sealed = encrypt(&key, b"payload").unwrap();

    let decoded = EncryptedData::from_base64(&sealed.to_base64()).unwrap();
    assert_eq!(decoded, sealed);
    assert_eq!(decrypt(&key, &decoded).unwrap(), b"payload");
}

#[test]
fn encrypted_data_serializes_with_serde() {
    let key = generate_secret_key();
    let sealed = encrypt(&key, b"payload").unwrap();

    let json = serde_json::to_string(&sealed).unwrap();
    let back: EncryptedData = serde_json::from_str(&json).unwrap();
    assert_eq!(back, sealed);
}

proptest! {
    #[test]
    fn any_bytes_roundtrip_under_both_suites(
        data in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let key = generate_secret_key();
        for suite in [CipherSuite::Aes256Gcm, CipherSuite::ChaCha20Poly1305] {
            let sealed = suite.encrypt(&key, &data, b"aad").unwrap();
            prop_assert_eq!(suite.decrypt(&key, &sealed, b"aad").unwrap(), data.clone());
        }
    }
}
