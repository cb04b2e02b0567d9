//! Key rotation: installing a new key store must not strand data encrypted
//! under an earlier one.

mod support;

use fieldvault_crypto::{generate_secret_key, SecretKey, AES_GCM_NOPADDING};
use fieldvault_keystore::{KeySelector, KeyStoreFile, KeyStoreHandle, Password, ProviderRegistry};
use fieldvault_service::{CryptoService, ServiceError};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use support::{file_config, standalone_service, PASSWORD, PRIMARY_ALIAS};
use tempfile::TempDir;

/// Replaces the key stored under `alias` with a fresh one.
fn regenerate(path: &Path, alias: &str) -> SecretKey {
    let mut store = KeyStoreFile::open(path, &Password::new(PASSWORD)).unwrap();
    let key = generate_secret_key();
    store.set_secret_key(alias, key.clone());
    store.save().unwrap();
    key
}

fn handle(keys: &[(&str, &SecretKey)]) -> KeyStoreHandle {
    let entries: BTreeMap<String, SecretKey> = keys
        .iter()
        .map(|(alias, key)| (alias.to_string(), (*key).clone()))
        .collect();
    KeyStoreHandle::from_entries("jceks", entries, Password::new(PASSWORD))
}

#[test]
fn old_ciphertext_survives_regenerating_the_same_alias() {
    let dir = TempDir::new().unwrap();
    let (service, path) = standalone_service(dir.path());

    let before = service
        .encrypt(&json!({"password": "old-secret"}), AES_GCM_NOPADDING, PRIMARY_ALIAS)
        .unwrap();

    regenerate(&path, PRIMARY_ALIAS);
    service.update_key_store(&file_config(&path)).unwrap();

    let after = service
        .encrypt(&json!({"password": "new-secret"}), AES_GCM_NOPADDING, PRIMARY_ALIAS)
        .unwrap();

    assert_eq!(service.decrypt(&before).unwrap(), json!({"password": "old-secret"}));
    assert_eq!(service.decrypt(&after).unwrap(), json!({"password": "new-secret"}));
    assert_eq!(service.decryption_chain().len(), 2);
}

#[test]
fn new_encryptions_use_the_rotated_key() {
    let dir = TempDir::new().unwrap();
    let (service, _) = standalone_service(dir.path());
    let original = service.key_selector().unwrap().select(PRIMARY_ALIAS).unwrap();

    let rotated = generate_secret_key();
    service
        .update_key_selector(handle(&[(PRIMARY_ALIAS, &rotated)]))
        .unwrap();

    assert_eq!(service.key_selector().unwrap().select(PRIMARY_ALIAS), Some(rotated.clone()));

    // Only the rotated generation can open new envelopes.
    let sealed = service.encrypt(&json!("v"), AES_GCM_NOPADDING, PRIMARY_ALIAS).unwrap();
    let old_only = CryptoService::with_handle(
        handle(&[(PRIMARY_ALIAS, &original)]),
        Arc::new(ProviderRegistry::new()),
    );
    let err = old_only.decrypt(&sealed).unwrap_err();
    assert!(matches!(err, ServiceError::DecryptionFailed(_)));
}

#[test]
fn rotation_can_add_and_drop_aliases() {
    let dir = TempDir::new().unwrap();
    let (service, _) = standalone_service(dir.path());
    let legacy = service.encrypt(&json!(1), AES_GCM_NOPADDING, PRIMARY_ALIAS).unwrap();

    let fresh = generate_secret_key();
    service.update_key_selector(handle(&[("k2", &fresh)])).unwrap();

    assert!(matches!(
        service.encrypt(&json!(1), AES_GCM_NOPADDING, PRIMARY_ALIAS),
        Err(ServiceError::EncryptionKeyNotFound(_))
    ));
    let current = service.encrypt(&json!(2), AES_GCM_NOPADDING, "k2").unwrap();

    assert_eq!(service.decrypt(&json!([legacy, current])).unwrap(), json!([1, 2]));
}

#[test]
fn registered_decryptor_handles_its_own_type() {
    let dir = TempDir::new().unwrap();
    let (service, _) = standalone_service(dir.path());
    let key = generate_secret_key();

    let partner = CryptoService::with_handle(
        handle(&[("partner", &key)]),
        Arc::new(ProviderRegistry::new()),
    );
    let mut envelope = partner.encrypt(&json!("shared"), AES_GCM_NOPADDING, "partner").unwrap();
    envelope["$crypto"]["type"] = json!("x-partner");

    assert_eq!(service.decrypt(&envelope).unwrap(), envelope, "unknown type passes through");

    service
        .register_decryptor("x-partner", KeySelector::new(handle(&[("partner", &key)])))
        .unwrap();
    assert_eq!(service.decrypt(&envelope).unwrap(), json!("shared"));
}

#[test]
fn decrypts_racing_a_rotation_never_fail() {
    let dir = TempDir::new().unwrap();
    let (service, path) = standalone_service(dir.path());
    let service = Arc::new(service);
    let sealed = service.encrypt(&json!("stable"), AES_GCM_NOPADDING, PRIMARY_ALIAS).unwrap();

    let readers = 16;
    let barrier = Arc::new(Barrier::new(readers + 1));
    let joins: Vec<_> = (0..readers)
        .map(|_| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            let sealed = sealed.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..50 {
                    assert_eq!(service.decrypt(&sealed).unwrap(), json!("stable"));
                }
            })
        })
        .collect();

    barrier.wait();
    regenerate(&path, PRIMARY_ALIAS);
    service.update_key_store(&file_config(&path)).unwrap();

    for join in joins {
        join.join().expect("reader must not panic");
    }
}
