//! Transport Factory and Typed Transports
//!
//! The factory binds (client identity, role, message type) to a stable
//! transport: the channel for (identity, role) and the transport wrapper for
//! the full key are both created lazily on first use and cached for the
//! factory's lifetime. Concurrent lookups for the same key resolve to
//! exactly one winning instance; the cache lock is held across creation.
//! Cache entries are released only by [`TransportFactory::shutdown`], never
//! by remote disconnection.

use crate::channel::{Channel, ChannelState};
use crate::config::ChannelConfig;
use crate::codec;
use crate::error::Result;
use crate::identity::{ChannelRole, ClientId};
use crate::registry::{MessageRegistry, WireMessage};
use crate::router::{HandlerId, Router};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One channel bound to one message type: the unit application code
/// publishes and subscribes through.
pub struct Transport<T: WireMessage> {
    channel: Arc<Channel>,
    registry: Arc<MessageRegistry>,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T: WireMessage> Transport<T> {
    fn new(channel: Arc<Channel>, registry: Arc<MessageRegistry>) -> Self {
        Self {
            channel,
            registry,
            _marker: PhantomData,
        }
    }

    /// Encode `message` into one frame and hand it to the channel's write
    /// path. Inherits the channel's fire-and-forget policy: publishing on a
    /// channel that is not connected drops the message and returns `Ok`.
    pub async fn publish(&self, message: &T) -> Result<()> {
        let registration = self
            .registry
            .registration_for_type(TypeId::of::<T>(), std::any::type_name::<T>())?;
        let payload = registration.serializer.encode_any(message)?;
        let frame = codec::encode_frame(registration.tag, &payload, self.channel.max_frame_size())?;
        self.channel.write_frame(frame).await
    }

    /// Register a handler for incoming messages of type `T` on this
    /// transport's channel. The returned token deregisters exactly this
    /// handler when released.
    pub fn subscribe<F, Fut>(&self, handler: F) -> Subscription
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let router = self.channel.router().clone();
        let id = router.add::<T, _, _>(handler);
        Subscription {
            router,
            type_id: TypeId::of::<T>(),
            id: Some(id),
        }
    }

    /// Current state of the underlying channel, for callers that need
    /// delivery guarantees before publishing.
    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }
}

/// Releasable handle for one registered handler.
///
/// Releasing, explicitly via [`Subscription::unsubscribe`] or by letting
/// the token leave scope, deregisters exactly that handler from exactly
/// its router entry. Holding the token is what keeps the handler alive.
#[must_use = "dropping the subscription token unsubscribes the handler"]
pub struct Subscription {
    router: Arc<Router>,
    type_id: TypeId,
    id: Option<HandlerId>,
}

impl Subscription {
    /// Deregister the handler now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.router.remove(self.type_id, id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

type ChannelKey = (ClientId, ChannelRole);
type TransportKey = (ClientId, ChannelRole, TypeId);

/// Caching binder of (client identity, role, message type) to transports.
pub struct TransportFactory {
    config: ChannelConfig,
    registry: Arc<MessageRegistry>,
    channels: Mutex<HashMap<ChannelKey, Arc<Channel>>>,
    transports: Mutex<HashMap<TransportKey, Arc<dyn Any + Send + Sync>>>,
}

impl TransportFactory {
    pub fn new(registry: Arc<MessageRegistry>, config: ChannelConfig) -> Self {
        Self {
            config,
            registry,
            channels: Mutex::new(HashMap::new()),
            transports: Mutex::new(HashMap::new()),
        }
    }

    /// Transport for the client process: the channel dials the peer's
    /// socket on first use.
    pub async fn client_transport<T: WireMessage>(
        &self,
        client_id: &ClientId,
    ) -> Result<Arc<Transport<T>>> {
        self.transport::<T>(client_id, ChannelRole::Initiator).await
    }

    /// Transport for the server process: the channel binds the socket on
    /// first use and accepts the peer in the background.
    pub async fn server_transport<T: WireMessage>(
        &self,
        client_id: &ClientId,
    ) -> Result<Arc<Transport<T>>> {
        self.transport::<T>(client_id, ChannelRole::Acceptor).await
    }

    async fn transport<T: WireMessage>(
        &self,
        client_id: &ClientId,
        role: ChannelRole,
    ) -> Result<Arc<Transport<T>>> {
        let channel = self.channel(client_id, role).await?;

        let key = (client_id.clone(), role, TypeId::of::<T>());
        let mut transports = self.transports.lock().await;
        if let Some(cached) = transports.get(&key) {
            if let Ok(transport) = cached.clone().downcast::<Transport<T>>() {
                return Ok(transport);
            }
        }

        debug!(
            "creating {} transport for client {} ({:?})",
            std::any::type_name::<T>(),
            client_id,
            role
        );
        let transport = Arc::new(Transport::<T>::new(channel, self.registry.clone()));
        transports.insert(key, transport.clone() as Arc<dyn Any + Send + Sync>);
        Ok(transport)
    }

    async fn channel(&self, client_id: &ClientId, role: ChannelRole) -> Result<Arc<Channel>> {
        let key = (client_id.clone(), role);
        // The lock spans creation so concurrent first lookups for one key
        // resolve to a single winning channel.
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.get(&key) {
            return Ok(channel.clone());
        }

        let channel = match role {
            ChannelRole::Initiator => {
                Channel::connect(client_id, self.config.clone(), self.registry.clone()).await?
            }
            ChannelRole::Acceptor => {
                Channel::bind(client_id, self.config.clone(), self.registry.clone()).await?
            }
        };
        let channel = Arc::new(channel);
        channels.insert(key, channel.clone());
        Ok(channel)
    }

    /// Close every cached channel and drop all cached transports. The only
    /// way channels are destroyed; remote disconnection never evicts them.
    pub async fn shutdown(&self) {
        let channels: Vec<(ChannelKey, Arc<Channel>)> =
            self.channels.lock().await.drain().collect();
        for ((client_id, role), channel) in channels {
            info!("shutting down channel {} ({:?})", client_id, role);
            channel.close().await;
        }
        self.transports.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct CacheProbe {
        n: u32,
    }

    impl WireMessage for CacheProbe {
        const TYPE_TAG: &'static str = "factory.cache_probe";
    }

    fn test_factory() -> (tempfile::TempDir, TransportFactory) {
        let dir = tempfile::tempdir().unwrap();
        let registry = MessageRegistry::new();
        registry.register::<CacheProbe>().unwrap();
        let factory = TransportFactory::new(
            Arc::new(registry),
            ChannelConfig::with_socket_dir(dir.path()),
        );
        (dir, factory)
    }

    #[tokio::test]
    async fn repeated_lookups_return_the_identical_transport() {
        let (_dir, factory) = test_factory();
        let id = ClientId::new("cache-identity").unwrap();

        let first = factory.server_transport::<CacheProbe>(&id).await.unwrap();
        let second = factory.server_transport::<CacheProbe>(&id).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        factory.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_lookups_resolve_to_one_channel() {
        let (_dir, factory) = test_factory();
        let factory = Arc::new(factory);
        let id = ClientId::new("one-winner").unwrap();

        let lookups = (0..8).map(|_| {
            let factory = factory.clone();
            let id = id.clone();
            tokio::spawn(async move { factory.server_transport::<CacheProbe>(&id).await })
        });

        let transports: Vec<_> = futures::future::join_all(lookups)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        for transport in &transports[1..] {
            assert!(Arc::ptr_eq(&transports[0], transport));
        }

        factory.shutdown().await;
    }

    #[tokio::test]
    async fn failed_dial_is_surfaced_and_not_cached() {
        let (_dir, factory) = test_factory();
        let id = ClientId::new("no-server").unwrap();

        // Nothing is listening, so the initiator dial must fail each time
        // rather than caching a broken channel.
        assert!(factory.client_transport::<CacheProbe>(&id).await.is_err());
        assert!(factory.client_transport::<CacheProbe>(&id).await.is_err());
    }
}
