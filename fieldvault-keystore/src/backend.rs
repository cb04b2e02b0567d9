//! Backend selection.

use crate::config::{BackendKind, KeyStoreConfig};
use crate::error::KeyStoreResult;
use crate::file::FileBackend;
use crate::handle::KeyStoreHandle;
use crate::hsm::{HsmBackend, ProviderRegistry};
use std::sync::Arc;
use tracing::debug;

/// Something that can open a key store.
///
/// `init` is a blocking call meant to run once at startup (and again on
/// rotation), never on a request path.
pub trait KeyStoreBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn init(&self) -> KeyStoreResult<KeyStoreHandle>;
}

/// Picks the backend for `config.store_type`: `pkcs11` gets the HSM backend,
/// anything else the file backend.
pub fn backend_for(
    config: &KeyStoreConfig,
    registry: &Arc<ProviderRegistry>,
) -> Box<dyn KeyStoreBackend> {
    let kind = config.backend_kind();
    debug!("selected {kind:?} backend for key store type {}", config.store_type);
    match kind {
        BackendKind::Hsm => Box::new(HsmBackend::new(config.clone(), Arc::clone(registry))),
        BackendKind::File => Box::new(FileBackend::new(config.clone())),
    }
}

/// Selects a backend for `config` and opens it.
pub fn open_key_store(
    config: &KeyStoreConfig,
    registry: &Arc<ProviderRegistry>,
) -> KeyStoreResult<KeyStoreHandle> {
    backend_for(config, registry).init()
}
