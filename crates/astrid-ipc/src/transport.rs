//! Unix-socket transport.
//!
//! Every frame is a `u32` length followed by that many bytes. Control messages
//! travel as bincode records on a per-instrument socket; rendered buffers
//! travel in the buffer wire format on a shared bus socket that any number of
//! renderers connect to.

use crate::delivery::MessageSubmitter;
use crate::error::{IpcError, Result};
use crate::protocol::Message;
use crate::wire;
use astrid_core::AudioBuffer;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// File name of the shared buffer bus socket.
pub const BUS_SOCKET: &str = "buffers.sock";

/// Well-known socket of an instrument's control channel.
pub fn channel_path(dir: &Path, instrument: &str) -> PathBuf {
    dir.join(format!("{instrument}.sock"))
}

pub fn bus_path(dir: &Path) -> PathBuf {
    dir.join(BUS_SOCKET)
}

/// Framed connection to a peer process.
pub struct MessageTransport {
    stream: UnixStream,
}

impl MessageTransport {
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        Ok(Self::new(stream))
    }

    pub async fn send_frame(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_FRAME_LEN {
            return Err(IpcError::WireFormat(format!(
                "frame of {} bytes exceeds {MAX_FRAME_LEN}",
                data.len()
            )));
        }
        self.stream.write_u32(data.len() as u32).await?;
        self.stream.write_all(data).await?;
        Ok(())
    }

    /// Next frame, or `None` once the peer has closed the connection.
    pub async fn recv_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let len = match self.stream.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if len > MAX_FRAME_LEN {
            return Err(IpcError::WireFormat(format!(
                "peer announced a {len}-byte frame (max {MAX_FRAME_LEN})"
            )));
        }
        let mut data = vec![0u8; len];
        self.stream.read_exact(&mut data).await?;
        Ok(Some(data))
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<()> {
        message.validate()?;
        let data = bincode::serialize(message)?;
        self.send_frame(&data).await
    }

    pub async fn recv_message(&mut self) -> Result<Option<Message>> {
        let Some(data) = self.recv_frame().await? else {
            return Ok(None);
        };
        let message: Message = bincode::deserialize(&data)?;
        message.validate()?;
        Ok(Some(message))
    }

    /// Publish a rendered buffer with the message that requested it.
    pub async fn send_buffer(&mut self, buffer: &AudioBuffer, message: &Message) -> Result<()> {
        let data = wire::serialize(buffer, message)?;
        self.send_frame(&data).await
    }
}

/// Listening socket. The socket file is removed on drop.
pub struct TransportListener {
    listener: UnixListener,
    path: PathBuf,
}

impl TransportListener {
    /// Bind `path`, replacing a stale socket file left by a dead process.
    pub fn bind(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        tracing::debug!(path = %path.display(), "listening");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub async fn accept(&self) -> Result<MessageTransport> {
        let (stream, _) = self.listener.accept().await?;
        Ok(MessageTransport::new(stream))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransportListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Fan-in of buffer frames from every connected renderer.
///
/// Frames are opaque here; the feed decodes them with [`wire::deserialize`].
/// Must be bound from within a tokio runtime.
pub struct BufferBus {
    frames: mpsc::Receiver<Vec<u8>>,
    accept_task: JoinHandle<()>,
    path: PathBuf,
}

impl BufferBus {
    pub fn bind(path: &Path, capacity: usize) -> Result<Self> {
        let listener = TransportListener::bind(path)?;
        let (tx, frames) = mpsc::channel(capacity.max(1));

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok(transport) => {
                        tracing::debug!(bus = %listener.path().display(), "renderer connected");
                        tokio::spawn(Self::pump_connection(transport, tx.clone()));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "buffer bus accept failed");
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }
        });

        Ok(Self {
            frames,
            accept_task,
            path: path.to_path_buf(),
        })
    }

    async fn pump_connection(mut transport: MessageTransport, tx: mpsc::Sender<Vec<u8>>) {
        loop {
            match transport.recv_frame().await {
                Ok(Some(frame)) => {
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    tracing::debug!("renderer disconnected from buffer bus");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping renderer connection");
                    return;
                }
            }
        }
    }

    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.frames.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.frames.try_recv().ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BufferBus {
    fn drop(&mut self) {
        // Dropping the task drops the listener, which removes the socket file
        self.accept_task.abort();
    }
}

/// Write every message from a delivery channel to a renderer's socket.
///
/// Stops after forwarding a shutdown or when the channel closes. Returns how
/// many messages were sent.
pub async fn forward_messages(
    mut messages: mpsc::Receiver<Message>,
    mut transport: MessageTransport,
) -> Result<usize> {
    let mut sent = 0;
    while let Some(message) = messages.recv().await {
        transport.send_message(&message).await?;
        sent += 1;
        if message.is_shutdown() {
            break;
        }
    }
    Ok(sent)
}

/// Read control messages from a socket into a delivery loop until the peer
/// disconnects. Malformed records are logged and skipped.
pub async fn feed_messages(
    mut transport: MessageTransport,
    submitter: MessageSubmitter,
) -> Result<usize> {
    let mut submitted = 0;
    loop {
        let data = match transport.recv_frame().await? {
            Some(data) => data,
            None => return Ok(submitted),
        };
        let message = match bincode::deserialize::<Message>(&data) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, bytes = data.len(), "skipping malformed message");
                continue;
            }
        };
        if let Err(e) = submitter.submit_async(message).await {
            tracing::warn!(error = %e, "message rejected by delivery loop");
            continue;
        }
        submitted += 1;
    }
}
