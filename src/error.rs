//! Transport Error Types
//!
//! Error taxonomy for channel setup, framing, and message serialization
//! failures. No error in this crate is retried internally; reconnect policy
//! belongs to the application.

use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Invalid channel name or socket configuration. Fatal at construction.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Dial or accept-setup failure. Fatal, surfaced to the caller that
    /// requested the channel, no automatic retry.
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        source: Option<std::io::Error>,
    },

    /// A wire type tag that no registration resolves, or an attempt to
    /// encode a type that was never registered. Fatal to the connection:
    /// the frame format carries no resync marker, so the stream cannot be
    /// trusted past this point.
    #[error("Unknown message type: {tag}")]
    UnknownMessageType { tag: String },

    /// Payload encode/decode failure. Fatal to the connection, same
    /// reasoning as `UnknownMessageType`. On the encode side this also
    /// covers a frame that exceeds the configured size cap.
    #[error("Serialization error for {tag}: {message}")]
    Serialization { tag: String, message: String },

    /// Broken connection on the read side, a truncated frame at EOF, or a
    /// stream whose length fields exceed the frame size cap. Transitions
    /// the channel out of `Connected`; never crashes the process.
    #[error("Read error: {message}")]
    Read {
        message: String,
        source: Option<std::io::Error>,
    },

    /// Broken connection on the write side. Transitions the channel out of
    /// `Connected`; never crashes the process.
    #[error("Write error: {message}")]
    Write {
        message: String,
        source: Option<std::io::Error>,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with its I/O source
    pub fn connection_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create an unknown-message-type error
    pub fn unknown_type(tag: impl Into<String>) -> Self {
        Self::UnknownMessageType { tag: tag.into() }
    }

    /// Create a serialization error
    pub fn serialization(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialization {
            tag: tag.into(),
            message: message.into(),
        }
    }

    /// Create a read error
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
            source: None,
        }
    }

    /// Create a read error with its I/O source
    pub fn read_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Read {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a write error with its I/O source
    pub fn write_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Write {
            message: message.into(),
            source: Some(source),
        }
    }
}
