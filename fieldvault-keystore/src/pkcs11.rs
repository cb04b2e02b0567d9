//! PKCS#11 provider over a vendor library, via `cryptoki`.
//!
//! Secret keys are found by `CKA_LABEL` and read through `CKA_VALUE`, so the
//! token objects must be extractable and not marked sensitive.

use crate::config::Password;
use crate::error::{KeyStoreError, KeyStoreResult};
use crate::hsm::{HsmProvider, HsmProviderFactory, HsmToken, Pkcs11Config};
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::object::{Attribute, AttributeType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use fieldvault_crypto::SecretKey;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};
use zeroize::Zeroize;

/// SunPKCS11-style attribute selecting a slot by its position in the list
/// of slots holding a token.
const SLOT_LIST_INDEX: &str = "slotListIndex";

/// Installs a [`Pkcs11Provider`] for any PKCS#11 library present on disk.
#[derive(Debug, Default)]
pub struct Pkcs11ProviderFactory;

impl HsmProviderFactory for Pkcs11ProviderFactory {
    fn supports(&self, config: &Pkcs11Config) -> bool {
        config.library.is_file()
    }

    fn install(&self, config: &Pkcs11Config) -> KeyStoreResult<Arc<dyn HsmProvider>> {
        let registration = |what: &str| {
            let library = config.library.display().to_string();
            let what = what.to_string();
            move |e: cryptoki::error::Error| {
                KeyStoreError::ProviderRegistration(format!("{what} {library}: {e}"))
            }
        };

        let context =
            Pkcs11::new(&config.library).map_err(registration("unable to load pkcs11 library"))?;
        context
            .initialize(CInitializeArgs::OsThreads)
            .map_err(registration("unable to initialize pkcs11 library"))?;

        let slots = context
            .get_slots_with_token()
            .map_err(registration("unable to list slots of"))?;
        let slot = pick_slot(config, &slots)?;
        debug!("pkcs11 provider {} uses slot {}", config.provider_name(), slot.id());

        Ok(Arc::new(Pkcs11Provider {
            name: config.provider_name(),
            context,
            slot,
        }))
    }
}

fn pick_slot(config: &Pkcs11Config, slots: &[Slot]) -> KeyStoreResult<Slot> {
    let missing = |which: String| {
        KeyStoreError::ProviderRegistration(format!(
            "no token present in {which} of {}",
            config.library.display()
        ))
    };

    if let Some(id) = config.slot {
        return slots
            .iter()
            .copied()
            .find(|s| s.id() == id)
            .ok_or_else(|| missing(format!("slot {id}")));
    }

    let index = match config.attributes.get(SLOT_LIST_INDEX) {
        Some(raw) => raw.parse::<usize>().map_err(|_| {
            KeyStoreError::ProviderRegistration(format!("invalid pkcs11 {SLOT_LIST_INDEX}: {raw}"))
        })?,
        None => 0,
    };
    slots
        .get(index)
        .copied()
        .ok_or_else(|| missing(format!("slot list index {index}")))
}

/// A loaded PKCS#11 library bound to one slot.
pub struct Pkcs11Provider {
    name: String,
    context: Pkcs11,
    slot: Slot,
}

impl HsmProvider for Pkcs11Provider {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, password: &Password) -> KeyStoreResult<Arc<dyn HsmToken>> {
        let init = |what: &'static str| {
            move |e: cryptoki::error::Error| KeyStoreError::KeyStoreInit(format!("{what}: {e}"))
        };

        let label = self
            .context
            .get_token_info(self.slot)
            .map_err(init("unable to read token info"))?
            .label()
            .trim()
            .to_string();
        let session = self
            .context
            .open_ro_session(self.slot)
            .map_err(init("unable to open token session"))?;
        let pin = AuthPin::new(password.expose().to_string());
        session
            .login(UserType::User, Some(&pin))
            .map_err(init("token login failed"))?;
        info!("logged in to pkcs11 token {label} via {}", self.name);

        Ok(Arc::new(Pkcs11Token {
            label,
            session: Mutex::new(session),
        }))
    }
}

impl std::fmt::Debug for Pkcs11Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkcs11Provider")
            .field("name", &self.name)
            .field("slot", &self.slot.id())
            .finish_non_exhaustive()
    }
}

/// A logged-in session on a PKCS#11 token.
pub struct Pkcs11Token {
    label: String,
    session: Mutex<Session>,
}

impl Pkcs11Token {
    fn find_secret_keys(&self, label: Option<&str>) -> KeyStoreResult<Vec<ObjectHandle>> {
        let mut template = vec![Attribute::Class(ObjectClass::SECRET_KEY)];
        if let Some(label) = label {
            template.push(Attribute::Label(label.as_bytes().to_vec()));
        }
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .find_objects(&template)
            .map_err(|e| KeyStoreError::KeyStoreInit(format!("token object search failed: {e}")))
    }

    fn attribute(&self, object: ObjectHandle, kind: AttributeType) -> KeyStoreResult<Attribute> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_attributes(object, &[kind])
            .map_err(|e| KeyStoreError::KeyStoreInit(format!("unable to read {kind:?}: {e}")))?
            .into_iter()
            .next()
            .ok_or_else(|| KeyStoreError::KeyStoreInit(format!("token returned no {kind:?}")))
    }
}

impl HsmToken for Pkcs11Token {
    fn label(&self) -> &str {
        &self.label
    }

    fn secret_key(&self, alias: &str) -> KeyStoreResult<Option<SecretKey>> {
        let Some(object) = self.find_secret_keys(Some(alias))?.into_iter().next() else {
            return Ok(None);
        };
        match self.attribute(object, AttributeType::Value)? {
            Attribute::Value(mut bytes) => {
                let key = SecretKey::from_slice(&bytes);
                bytes.zeroize();
                Ok(Some(key?))
            }
            other => Err(KeyStoreError::KeyStoreInit(format!(
                "unexpected attribute {:?} for key {alias}",
                other.attribute_type()
            ))),
        }
    }

    fn aliases(&self) -> KeyStoreResult<Vec<String>> {
        let mut aliases = Vec::new();
        for object in self.find_secret_keys(None)? {
            if let Attribute::Label(bytes) = self.attribute(object, AttributeType::Label)? {
                aliases.push(String::from_utf8_lossy(&bytes).into_owned());
            }
        }
        Ok(aliases)
    }
}

impl std::fmt::Debug for Pkcs11Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkcs11Token")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
