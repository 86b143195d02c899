//! Message Type Registry
//!
//! Dispatch is keyed by a stable string tag carried in every frame, resolved
//! through an explicit table the application builds at startup. Both
//! processes must register a consistent tag <-> type mapping out of band;
//! nothing is ever resolved from an untrusted wire string alone. The
//! registry also owns the serializer cache: one instance per registered
//! type, created at registration and reused for every frame.

use crate::error::{Result, TransportError};
use crate::serializer::{ErasedSerializer, JsonMessageSerializer, MessageSerializer, SerializerAdapter};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// A message that can cross the wire. The tag is the stable identity of the
/// type on the wire; renaming a Rust type is fine, changing its tag is a
/// protocol break.
pub trait WireMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE_TAG: &'static str;
}

/// One registered type: its wire tag, runtime type, and the single reused
/// serializer instance.
pub(crate) struct Registration {
    pub(crate) tag: &'static str,
    pub(crate) type_id: TypeId,
    pub(crate) serializer: Arc<dyn ErasedSerializer>,
}

#[derive(Default)]
struct RegistryTables {
    by_tag: HashMap<&'static str, Arc<Registration>>,
    by_type: HashMap<TypeId, Arc<Registration>>,
}

/// Tag <-> decoder table plus serializer cache, shared by every channel a
/// factory creates.
#[derive(Default)]
pub struct MessageRegistry {
    tables: RwLock<RegistryTables>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` with the default JSON serializer.
    pub fn register<T: WireMessage>(&self) -> Result<()> {
        self.register_with::<T, _>(JsonMessageSerializer::<T>::new())
    }

    /// Register `T` with a custom serializer. The instance is cached and
    /// reused for every encode and decode of `T`.
    pub fn register_with<T, S>(&self, serializer: S) -> Result<()>
    where
        T: WireMessage,
        S: MessageSerializer<T> + 'static,
    {
        if T::TYPE_TAG.is_empty() {
            return Err(TransportError::configuration(format!(
                "type {} declares an empty wire tag",
                std::any::type_name::<T>()
            )));
        }

        let registration = Arc::new(Registration {
            tag: T::TYPE_TAG,
            type_id: TypeId::of::<T>(),
            serializer: Arc::new(SerializerAdapter::<T, S>::new(T::TYPE_TAG, serializer)),
        });

        let mut tables = self.tables.write();
        if tables.by_tag.contains_key(T::TYPE_TAG) {
            return Err(TransportError::configuration(format!(
                "wire tag {:?} is already registered",
                T::TYPE_TAG
            )));
        }
        if tables.by_type.contains_key(&registration.type_id) {
            return Err(TransportError::configuration(format!(
                "type {} is already registered",
                std::any::type_name::<T>()
            )));
        }
        tables.by_tag.insert(T::TYPE_TAG, registration.clone());
        tables.by_type.insert(registration.type_id, registration);
        Ok(())
    }

    /// Resolve a wire tag read from a frame.
    pub(crate) fn registration_for_tag(&self, tag: &str) -> Result<Arc<Registration>> {
        self.tables
            .read()
            .by_tag
            .get(tag)
            .cloned()
            .ok_or_else(|| TransportError::unknown_type(tag))
    }

    /// Resolve the registration for an outgoing message's runtime type.
    pub(crate) fn registration_for_type(
        &self,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<Arc<Registration>> {
        self.tables
            .read()
            .by_type
            .get(&type_id)
            .cloned()
            .ok_or_else(|| TransportError::unknown_type(type_name))
    }
}
