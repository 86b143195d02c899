//! Client identity and channel roles

use crate::error::{Result, TransportError};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier naming one logical peer. Scopes exactly one
/// initiator-side and one acceptor-side channel, and doubles as the socket
/// file name shared by both processes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Create a client identity from an explicit name.
    ///
    /// The name becomes part of a socket path, so it must be non-empty and
    /// limited to alphanumerics, `.`, `_` and `-`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(TransportError::configuration("client id must not be empty"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(TransportError::configuration(format!(
                "client id {:?} contains characters not allowed in a socket name",
                name
            )));
        }
        Ok(Self(name))
    }

    /// Generate a random (v4 UUID) client identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which end of the duplex channel this process holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    /// Dials the socket at construction (the client process).
    Initiator,
    /// Binds and waits for the peer to connect (the server process).
    Acceptor,
}
