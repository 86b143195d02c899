//! Channel configuration

use crate::codec::FRAME_HEADER_LEN;
use crate::error::{Result, TransportError};
use crate::identity::ClientId;
use std::path::{Path, PathBuf};

/// Socket and buffer configuration shared by every channel a factory creates.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Directory the socket files live in
    pub socket_dir: PathBuf,
    /// Buffer size for reading
    pub read_buffer_size: usize,
    /// Maximum size of one encoded frame, header included
    pub max_frame_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from("/tmp/pipebus"),
            read_buffer_size: 64 * 1024,        // 64KB
            max_frame_size: 16 * 1024 * 1024,   // 16MB
        }
    }
}

impl ChannelConfig {
    /// Validate the configuration. Called by channel construction; failures
    /// are fatal with no retry.
    pub fn validate(&self) -> Result<()> {
        if self.socket_dir.as_os_str().is_empty() {
            return Err(TransportError::configuration(
                "socket directory must not be empty",
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(TransportError::configuration(
                "read buffer size must be non-zero",
            ));
        }
        if self.max_frame_size <= FRAME_HEADER_LEN {
            return Err(TransportError::configuration(format!(
                "max frame size must exceed the {} byte frame header",
                FRAME_HEADER_LEN
            )));
        }
        Ok(())
    }

    /// The socket path both endpoints derive from a shared client identity.
    pub fn socket_path(&self, client_id: &ClientId) -> PathBuf {
        self.socket_dir.join(format!("{}.sock", client_id))
    }

    /// Override the socket directory, keeping the default buffer sizes.
    pub fn with_socket_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            socket_dir: dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ChannelConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_socket_dir_is_rejected() {
        let config = ChannelConfig {
            socket_dir: PathBuf::new(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TransportError::Configuration { .. })
        ));
    }

    #[test]
    fn socket_path_combines_dir_and_client_id() {
        let config = ChannelConfig::with_socket_dir("/tmp/pb-test");
        let id = ClientId::new("ABC").unwrap();
        assert_eq!(
            config.socket_path(&id),
            PathBuf::from("/tmp/pb-test/ABC.sock")
        );
    }
}
