//! Alias-based key selection with atomic rotation.

use crate::handle::KeyStoreHandle;
use fieldvault_crypto::SecretKey;
use std::sync::{Arc, PoisonError, RwLock};

/// Resolves key aliases against the current key-store handle.
///
/// The handle itself is immutable; rotation swaps in a new `Arc` under a
/// short write lock. Lookups hold the read lock only long enough to clone
/// the `Arc`, so a lookup racing a rotation sees either the old or the new
/// store in full.
///
/// Clones share the same binding: updating one updates all of them. Use
/// [`KeySelector::snapshot`] to pin the current generation.
#[derive(Clone, Debug)]
pub struct KeySelector {
    current: Arc<RwLock<Arc<KeyStoreHandle>>>,
}

impl KeySelector {
    pub fn new(handle: KeyStoreHandle) -> Self {
        Self::from_shared(Arc::new(handle))
    }

    pub fn from_shared(handle: Arc<KeyStoreHandle>) -> Self {
        Self {
            current: Arc::new(RwLock::new(handle)),
        }
    }

    /// The handle currently bound to this selector.
    pub fn current(&self) -> Arc<KeyStoreHandle> {
        // Poisoning can't leave the slot half-written: it only ever holds a
        // complete Arc.
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Looks up `alias` in the current handle.
    pub fn select(&self, alias: &str) -> Option<SecretKey> {
        self.current().select(alias)
    }

    /// Atomically binds `handle`, returning the previously bound one.
    pub fn update(&self, handle: KeyStoreHandle) -> Arc<KeyStoreHandle> {
        self.update_shared(Arc::new(handle))
    }

    pub fn update_shared(&self, handle: Arc<KeyStoreHandle>) -> Arc<KeyStoreHandle> {
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, handle)
    }

    /// A new selector pinned to the current handle. Later updates to `self`
    /// don't affect it.
    pub fn snapshot(&self) -> KeySelector {
        KeySelector::from_shared(self.current())
    }

    pub fn aliases(&self) -> Vec<String> {
        self.current().aliases()
    }
}
