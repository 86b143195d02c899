//! Publish/Subscribe Facade
//!
//! Thin wrappers over [`TransportFactory`] that fix the client identity and
//! endpoint role so application code can publish and subscribe without
//! touching transports directly. `ClientBus` is the client-process end,
//! `ServerBus` the server-process end, and `CompositeServerBus` hands a
//! server one bus per connected client.

use crate::config::ChannelConfig;
use crate::error::Result;
use crate::factory::{Subscription, TransportFactory};
use crate::identity::ClientId;
use crate::registry::{MessageRegistry, WireMessage};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The client process's bus: every channel it opens dials the server.
pub struct ClientBus {
    client_id: ClientId,
    factory: Arc<TransportFactory>,
}

impl ClientBus {
    pub fn new(client_id: ClientId, factory: Arc<TransportFactory>) -> Self {
        Self { client_id, factory }
    }

    /// Convenience constructor that owns a private factory.
    pub fn with_config(
        client_id: ClientId,
        registry: Arc<MessageRegistry>,
        config: ChannelConfig,
    ) -> Self {
        Self::new(client_id, Arc::new(TransportFactory::new(registry, config)))
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Send a message to the server.
    pub async fn publish<T: WireMessage>(&self, message: &T) -> Result<()> {
        self.factory
            .client_transport::<T>(&self.client_id)
            .await?
            .publish(message)
            .await
    }

    /// Register a handler for messages of type `T` from the server.
    pub async fn subscribe<T, F, Fut>(&self, handler: F) -> Result<Subscription>
    where
        T: WireMessage,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Ok(self
            .factory
            .client_transport::<T>(&self.client_id)
            .await?
            .subscribe(handler))
    }

    /// Close this bus's channels.
    pub async fn shutdown(&self) {
        self.factory.shutdown().await;
    }
}

/// The server process's bus for one client: every channel it opens listens
/// for that client to connect.
pub struct ServerBus {
    client_id: ClientId,
    factory: Arc<TransportFactory>,
}

impl ServerBus {
    pub fn new(client_id: ClientId, factory: Arc<TransportFactory>) -> Self {
        Self { client_id, factory }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Send a message to the client.
    pub async fn publish<T: WireMessage>(&self, message: &T) -> Result<()> {
        self.factory
            .server_transport::<T>(&self.client_id)
            .await?
            .publish(message)
            .await
    }

    /// Register a handler for messages of type `T` from the client.
    pub async fn subscribe<T, F, Fut>(&self, handler: F) -> Result<Subscription>
    where
        T: WireMessage,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Ok(self
            .factory
            .server_transport::<T>(&self.client_id)
            .await?
            .subscribe(handler))
    }
}

/// Per-client registry of server buses, created on first use and cached for
/// the composite's lifetime.
pub struct CompositeServerBus {
    factory: Arc<TransportFactory>,
    buses: Mutex<HashMap<ClientId, Arc<ServerBus>>>,
}

impl CompositeServerBus {
    pub fn new(factory: Arc<TransportFactory>) -> Self {
        Self {
            factory,
            buses: Mutex::new(HashMap::new()),
        }
    }

    /// Convenience constructor that owns a private factory.
    pub fn with_config(registry: Arc<MessageRegistry>, config: ChannelConfig) -> Self {
        Self::new(Arc::new(TransportFactory::new(registry, config)))
    }

    /// The bus for one client, shared by every caller that asks for the
    /// same identity.
    pub async fn get_or_create(&self, client_id: &ClientId) -> Arc<ServerBus> {
        let mut buses = self.buses.lock().await;
        if let Some(bus) = buses.get(client_id) {
            return bus.clone();
        }
        let bus = Arc::new(ServerBus::new(client_id.clone(), self.factory.clone()));
        buses.insert(client_id.clone(), bus.clone());
        bus
    }

    /// Close every channel under every per-client bus.
    pub async fn shutdown(&self) {
        self.buses.lock().await.clear();
        self.factory.shutdown().await;
    }
}
