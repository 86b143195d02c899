//! Channel: One Duplex IPC Connection Endpoint
//!
//! A channel owns one Unix socket connection, one router, and one dedicated
//! read worker for its entire lifetime. The worker reassembles frames,
//! decodes them through the registry, and dispatches handlers inline:
//! handler execution is the backpressure mechanism, so a slow handler delays
//! all further reads on its channel. The write path runs on the caller's
//! task and drains fully before returning.
//!
//! Lifecycle: initiators dial during construction and are single-connection
//! (peer disconnect is terminal). Acceptors bind during construction and
//! re-arm after a peer disconnect, accepting the next connection with a
//! fresh frame decoder. Channels are destroyed only by explicit `close()`,
//! never by remote disconnection alone.

use crate::codec::{Envelope, FrameDecoder};
use crate::config::ChannelConfig;
use crate::error::{Result, TransportError};
use crate::identity::{ChannelRole, ClientId};
use crate::registry::MessageRegistry;
use crate::router::Router;
use bytes::Bytes;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const WORKER_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection lifecycle of a channel. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unconnected,
    Connecting,
    Connected,
    Closed,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unconnected,
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Unconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Closed => 3,
        }
    }
}

/// How one connection's read loop ended.
enum ConnectionEnd {
    /// `close()` was requested.
    Stopped,
    /// Peer went away cleanly between frames.
    Disconnected,
    /// Read failure, undecodable frame, or handler panic. The connection
    /// cannot be trusted past this point.
    Fatal,
}

struct ChannelShared {
    name: String,
    role: ChannelRole,
    path: PathBuf,
    config: ChannelConfig,
    registry: Arc<MessageRegistry>,
    router: Arc<Router>,
    state: AtomicU8,
    stopped: AtomicBool,
    stop: Notify,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
}

impl ChannelShared {
    fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ChannelState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn stop_requested(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Worker body for an initiator channel: one connection, then done.
    async fn run_initiator(self: Arc<Self>, read_half: OwnedReadHalf) {
        match self.read_connection(read_half).await {
            ConnectionEnd::Stopped => debug!("channel {} worker stopped", self.name),
            ConnectionEnd::Disconnected => info!("channel {}: peer disconnected", self.name),
            ConnectionEnd::Fatal => warn!("channel {}: connection failed", self.name),
        }
        self.teardown().await;
    }

    /// Worker body for an acceptor channel: accept, read until the
    /// connection dies, re-arm.
    async fn run_acceptor(self: Arc<Self>, listener: UnixListener) {
        loop {
            if self.stop_requested() {
                break;
            }
            self.set_state(ChannelState::Connecting);

            let stream = tokio::select! {
                _ = self.stop.notified() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        error!("channel {} failed to accept connection: {}", self.name, e);
                        break;
                    }
                },
            };
            debug!("channel {} accepted a connection", self.name);

            let (read_half, write_half) = stream.into_split();
            *self.writer.lock().await = Some(write_half);
            self.set_state(ChannelState::Connected);

            match self.read_connection(read_half).await {
                ConnectionEnd::Stopped => break,
                ConnectionEnd::Disconnected | ConnectionEnd::Fatal => {
                    // Drop the dead connection and wait for the next one.
                    *self.writer.lock().await = None;
                    self.set_state(ChannelState::Unconnected);
                }
            }
        }
        self.teardown().await;
    }

    /// Read loop over one established connection. Each complete frame is
    /// decoded and dispatched inline before the next read.
    async fn read_connection(&self, mut read_half: OwnedReadHalf) -> ConnectionEnd {
        let mut decoder = FrameDecoder::new(self.config.max_frame_size);
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            if self.stop_requested() {
                return ConnectionEnd::Stopped;
            }

            let n = tokio::select! {
                _ = self.stop.notified() => return ConnectionEnd::Stopped,
                read = read_half.read(&mut buf) => match read {
                    Ok(0) => {
                        if decoder.has_partial() {
                            error!(
                                "channel {}: stream ended inside a frame; discarding partial data",
                                self.name
                            );
                            return ConnectionEnd::Fatal;
                        }
                        return ConnectionEnd::Disconnected;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        error!("channel {} read failed: {}", self.name, e);
                        return ConnectionEnd::Fatal;
                    }
                },
            };

            decoder.extend(&buf[..n]);
            loop {
                match decoder.try_next() {
                    Ok(Some(envelope)) => {
                        if let Err(end) = self.deliver(envelope).await {
                            return end;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(
                            "channel {}: undecodable frame, closing connection: {}",
                            self.name, e
                        );
                        return ConnectionEnd::Fatal;
                    }
                }
            }
        }
    }

    /// Resolve, decode, and dispatch one envelope. Any failure is fatal to
    /// the connection: the format has no resync marker, so the stream cannot
    /// be re-synchronized once a frame is bad.
    async fn deliver(&self, envelope: Envelope) -> std::result::Result<(), ConnectionEnd> {
        let registration = match self.registry.registration_for_tag(&envelope.type_tag) {
            Ok(registration) => registration,
            Err(e) => {
                error!("channel {}: {}; closing connection", self.name, e);
                return Err(ConnectionEnd::Fatal);
            }
        };

        let message = match registration.serializer.decode_any(&envelope.payload) {
            Ok(message) => message,
            Err(e) => {
                error!("channel {}: {}; closing connection", self.name, e);
                return Err(ConnectionEnd::Fatal);
            }
        };

        let dispatch = self.router.dispatch(registration.type_id, message);
        if AssertUnwindSafe(dispatch).catch_unwind().await.is_err() {
            error!(
                "channel {}: handler for {} panicked; closing connection",
                self.name, envelope.type_tag
            );
            return Err(ConnectionEnd::Fatal);
        }
        Ok(())
    }

    /// Final teardown when the worker exits, for any reason.
    async fn teardown(&self) {
        self.set_state(ChannelState::Closed);
        *self.writer.lock().await = None;
        if self.role == ChannelRole::Acceptor {
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!(
                    "channel {} could not remove socket file {:?}: {}",
                    self.name, self.path, e
                );
            }
        }
    }
}

/// One duplex connection endpoint bound to a client identity.
pub struct Channel {
    shared: Arc<ChannelShared>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.shared.name)
            .field("role", &self.shared.role)
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Dial the peer's socket (initiator role). The dial happens here,
    /// synchronously with construction; failure fails channel creation with
    /// no retry.
    pub(crate) async fn connect(
        client_id: &ClientId,
        config: ChannelConfig,
        registry: Arc<MessageRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let path = config.socket_path(client_id);

        let stream = UnixStream::connect(&path).await.map_err(|e| {
            TransportError::connection_with_source(
                format!("failed to connect to socket {:?}", path),
                e,
            )
        })?;
        info!("channel {} connected to {:?}", client_id, path);

        let (read_half, write_half) = stream.into_split();
        let shared = Arc::new(ChannelShared {
            name: client_id.to_string(),
            role: ChannelRole::Initiator,
            path,
            config,
            registry,
            router: Arc::new(Router::new()),
            state: AtomicU8::new(ChannelState::Connected.as_u8()),
            stopped: AtomicBool::new(false),
            stop: Notify::new(),
            writer: tokio::sync::Mutex::new(Some(write_half)),
        });

        let worker = tokio::spawn(shared.clone().run_initiator(read_half));
        Ok(Self {
            shared,
            worker: std::sync::Mutex::new(Some(worker)),
        })
    }

    /// Bind the socket and wait for the peer in the background (acceptor
    /// role). Bind failure fails channel creation; the accept itself happens
    /// on the worker.
    pub(crate) async fn bind(
        client_id: &ClientId,
        config: ChannelConfig,
        registry: Arc<MessageRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let path = config.socket_path(client_id);

        std::fs::create_dir_all(&config.socket_dir).map_err(|e| {
            TransportError::connection_with_source(
                format!("failed to create socket directory {:?}", config.socket_dir),
                e,
            )
        })?;
        // A stale socket file from an earlier process would make bind fail.
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| {
                TransportError::connection_with_source(
                    format!("failed to remove stale socket {:?}", path),
                    e,
                )
            })?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| {
            TransportError::connection_with_source(format!("failed to bind socket {:?}", path), e)
        })?;
        info!("channel {} listening on {:?}", client_id, path);

        let shared = Arc::new(ChannelShared {
            name: client_id.to_string(),
            role: ChannelRole::Acceptor,
            path,
            config,
            registry,
            router: Arc::new(Router::new()),
            state: AtomicU8::new(ChannelState::Unconnected.as_u8()),
            stopped: AtomicBool::new(false),
            stop: Notify::new(),
            writer: tokio::sync::Mutex::new(None),
        });

        let worker = tokio::spawn(shared.clone().run_acceptor(listener));
        Ok(Self {
            shared,
            worker: std::sync::Mutex::new(Some(worker)),
        })
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    pub fn role(&self) -> ChannelRole {
        self.shared.role
    }

    pub(crate) fn router(&self) -> &Arc<Router> {
        &self.shared.router
    }

    pub(crate) fn max_frame_size(&self) -> usize {
        self.shared.config.max_frame_size
    }

    /// Write one encoded frame and block until it has drained.
    ///
    /// When the channel is not connected the frame is silently dropped and
    /// `Ok(())` returned (fire-and-forget); callers that need
    /// delivery guarantees check [`Channel::state`] first. A failed write is
    /// fatal to the connection and surfaces as a `Write` error.
    pub(crate) async fn write_frame(&self, frame: Bytes) -> Result<()> {
        if self.shared.state() != ChannelState::Connected {
            debug!(
                "channel {} is not connected; dropping outgoing frame",
                self.shared.name
            );
            return Ok(());
        }

        let mut writer = self.shared.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            debug!(
                "channel {} has no active connection; dropping outgoing frame",
                self.shared.name
            );
            return Ok(());
        };

        let written = async {
            stream.write_all(&frame).await?;
            stream.flush().await
        }
        .await;

        if let Err(e) = written {
            // The connection is gone; the read worker will observe the same
            // failure and settle the lifecycle for its role.
            *writer = None;
            match self.shared.role {
                ChannelRole::Initiator => self.shared.set_state(ChannelState::Closed),
                ChannelRole::Acceptor => self.shared.set_state(ChannelState::Unconnected),
            }
            error!("channel {} write failed: {}", self.shared.name, e);
            return Err(TransportError::write_with_source(
                "failed to write frame",
                e,
            ));
        }
        Ok(())
    }

    /// Stop the read worker and release the connection. Idempotent;
    /// teardown problems are logged, never propagated.
    pub async fn close(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing channel {}", self.shared.name);
        self.shared.stop.notify_one();
        self.shared.set_state(ChannelState::Closed);
        *self.shared.writer.lock().await = None;

        let worker = self.worker.lock().map(|mut w| w.take()).unwrap_or(None);
        if let Some(mut handle) = worker {
            if tokio::time::timeout(WORKER_EXIT_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                warn!(
                    "channel {} worker did not exit in {:?}; aborting it",
                    self.shared.name, WORKER_EXIT_TIMEOUT
                );
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::registry::WireMessage;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Probe {
        n: u32,
    }

    impl WireMessage for Probe {
        const TYPE_TAG: &'static str = "channel.probe";
    }

    fn test_registry() -> Arc<MessageRegistry> {
        let registry = MessageRegistry::new();
        registry.register::<Probe>().unwrap();
        Arc::new(registry)
    }

    fn test_config() -> (tempfile::TempDir, ChannelConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = ChannelConfig::with_socket_dir(dir.path());
        (dir, config)
    }

    #[tokio::test]
    async fn initiator_dial_failure_is_a_connection_error() {
        let (_dir, config) = test_config();
        let id = ClientId::new("nobody-listening").unwrap();
        let err = Channel::connect(&id, config, test_registry())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connection { .. }));
    }

    #[tokio::test]
    async fn acceptor_receives_and_dispatches_a_frame() {
        let (_dir, config) = test_config();
        let id = ClientId::new("dispatch-test").unwrap();
        let registry = test_registry();

        let acceptor = Channel::bind(&id, config.clone(), registry.clone())
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        acceptor.router().add::<Probe, _, _>(move |probe| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(probe.n);
            }
        });

        let initiator = Channel::connect(&id, config, registry.clone())
            .await
            .unwrap();
        let payload = serde_json::to_vec(&Probe { n: 42 }).unwrap();
        let frame = codec::encode_frame(Probe::TYPE_TAG, &payload, initiator.max_frame_size())
            .unwrap();
        initiator.write_frame(frame).await.unwrap();

        let n = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 42);

        initiator.close().await;
        acceptor.close().await;
    }

    #[tokio::test]
    async fn write_before_any_connection_is_silently_dropped() {
        let (_dir, config) = test_config();
        let id = ClientId::new("no-peer-yet").unwrap();
        let acceptor = Channel::bind(&id, config, test_registry()).await.unwrap();

        let frame = codec::encode_frame("channel.probe", b"{\"n\":1}", 1024).unwrap();
        // No peer has connected; the write must succeed without delivering.
        acceptor.write_frame(frame).await.unwrap();
        assert_ne!(acceptor.state(), ChannelState::Connected);

        acceptor.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_dir, config) = test_config();
        let id = ClientId::new("close-twice").unwrap();
        let acceptor = Channel::bind(&id, config, test_registry()).await.unwrap();

        acceptor.close().await;
        acceptor.close().await;
        assert_eq!(acceptor.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn peer_disconnect_closes_an_initiator() {
        let (_dir, config) = test_config();
        let id = ClientId::new("peer-goes-away").unwrap();
        let registry = test_registry();

        let acceptor = Channel::bind(&id, config.clone(), registry.clone())
            .await
            .unwrap();
        let initiator = Channel::connect(&id, config, registry).await.unwrap();

        acceptor.close().await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while initiator.state() != ChannelState::Closed {
            assert!(tokio::time::Instant::now() < deadline, "initiator never closed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        initiator.close().await;
    }
}
