//! # pipebus
//!
//! Lightweight inter-process publish/subscribe messaging between exactly two
//! endpoints, a client process and a server process, over a Unix domain
//! socket named by a shared [`ClientId`]. Single-host IPC only; this is not
//! a networked message broker.
//!
//! ## Architecture
//!
//! ```text
//! bus facade -> TransportFactory.publish -> frame encode -> Channel write
//! Channel read worker -> frame decode -> Router dispatch -> handlers
//! ```
//!
//! - [`codec`] frames each message as a self-delimiting binary envelope:
//!   `u32_le(tag_len) + u32_le(payload_len) + tag + payload`.
//! - [`registry`] resolves stable wire tags to types and caches one
//!   serializer instance per type; [`serializer`] makes the payload encoding
//!   pluggable (JSON provided).
//! - [`channel`] owns one duplex connection with a dedicated read worker;
//!   dispatch runs inline on that worker, and writes drain before returning,
//!   so backpressure comes from handler execution and the drain wait; there
//!   is no internal queueing.
//! - [`router`] maps each decoded message's concrete type to its ordered
//!   handler list.
//! - [`factory`] caches one channel per (client, role) and one transport per
//!   (client, role, type) for the factory's lifetime.
//! - [`bus`] is the thin publish/subscribe surface application code uses.
//!
//! ## Example
//!
//! ```no_run
//! use pipebus::{ChannelConfig, ClientBus, ClientId, MessageRegistry, WireMessage};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Greeting {
//!     text: String,
//! }
//!
//! impl WireMessage for Greeting {
//!     const TYPE_TAG: &'static str = "example.greeting";
//! }
//!
//! # async fn run() -> pipebus::Result<()> {
//! let registry = Arc::new(MessageRegistry::new());
//! registry.register::<Greeting>()?;
//!
//! let bus = ClientBus::with_config(
//!     ClientId::new("example-client")?,
//!     registry,
//!     ChannelConfig::default(),
//! );
//! bus.publish(&Greeting { text: "hello".into() }).await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod factory;
pub mod identity;
pub mod registry;
pub mod router;
pub mod serializer;

pub use bus::{ClientBus, CompositeServerBus, ServerBus};
pub use channel::{Channel, ChannelState};
pub use codec::Envelope;
pub use config::ChannelConfig;
pub use error::{Result, TransportError};
pub use factory::{Subscription, Transport, TransportFactory};
pub use identity::{ChannelRole, ClientId};
pub use registry::{MessageRegistry, WireMessage};
pub use router::{HandlerId, Router};
pub use serializer::{JsonMessageSerializer, MessageSerializer};
