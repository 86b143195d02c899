//! Pluggable payload serialization
//!
//! A serializer turns one message type into bytes and back; the wire framing
//! never looks inside the payload, so any encoding can sit behind
//! [`MessageSerializer`] without touching the transport. JSON is the
//! provided implementation. The registry holds exactly one serializer
//! instance per registered type and reuses it for every frame.

use crate::error::{Result, TransportError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed encode/decode over raw payload bytes.
pub trait MessageSerializer<T>: Send + Sync {
    fn encode(&self, message: &T) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON serializer backed by serde.
pub struct JsonMessageSerializer<T> {
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> Default for JsonMessageSerializer<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> JsonMessageSerializer<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> MessageSerializer<T> for JsonMessageSerializer<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn encode(&self, message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message)
            .map_err(|e| TransportError::serialization(std::any::type_name::<T>(), e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| TransportError::serialization(std::any::type_name::<T>(), e.to_string()))
    }
}

/// Object-safe adapter so the registry can hold serializers for
/// heterogeneous types in one table. Decoded messages come out as
/// `Arc<dyn Any>` ready for router dispatch by `TypeId`.
pub(crate) trait ErasedSerializer: Send + Sync {
    fn encode_any(&self, message: &(dyn Any + Send + Sync)) -> Result<Vec<u8>>;
    fn decode_any(&self, bytes: &[u8]) -> Result<Arc<dyn Any + Send + Sync>>;
}

pub(crate) struct SerializerAdapter<T, S> {
    tag: &'static str,
    inner: S,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, S> SerializerAdapter<T, S> {
    pub(crate) fn new(tag: &'static str, inner: S) -> Self {
        Self {
            tag,
            inner,
            _marker: PhantomData,
        }
    }
}

impl<T, S> ErasedSerializer for SerializerAdapter<T, S>
where
    T: Send + Sync + 'static,
    S: MessageSerializer<T>,
{
    fn encode_any(&self, message: &(dyn Any + Send + Sync)) -> Result<Vec<u8>> {
        let message = message.downcast_ref::<T>().ok_or_else(|| {
            TransportError::serialization(self.tag, "message type does not match registration")
        })?;
        self.inner.encode(message)
    }

    fn decode_any(&self, bytes: &[u8]) -> Result<Arc<dyn Any + Send + Sync>> {
        let message = self.inner.decode(bytes)?;
        Ok(Arc::new(message))
    }
}
