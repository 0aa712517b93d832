//! Connection management.

use crate::error::ClientError;
use parley_protocol::{Command, Decoder, Encoder, Reply, ReplyChunk};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// How long to wait for an expected reply.
    pub reply_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            reply_timeout: Duration::from_secs(30),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

/// Write side of a connection. Cheap to clone and share between tasks.
#[derive(Clone)]
pub struct CommandSender {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    connected: Arc<AtomicBool>,
}

impl CommandSender {
    /// Validates, seals and writes a command.
    pub async fn send(&self, command: &Command) -> Result<(), ClientError> {
        let encoded = Encoder::encode_command(command)?;
        tracing::debug!("Sending {} ({} bytes)", command.verb(), encoded.len());
        self.send_bytes(&encoded).await
    }

    /// Writes raw bytes to the socket as they are.
    pub async fn send_bytes(&self, bytes: &[u8]) -> Result<(), ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        self.writer.lock().await.write_all(bytes).await?;
        Ok(())
    }

    /// Returns whether the connection is still open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A connection to a parley server.
///
/// Replies and broadcast pushes arrive on one ordered stream; frames that
/// fail the integrity check are dropped by the reader task.
pub struct Connection {
    config: ConnectionConfig,
    sender: CommandSender,
    replies: mpsc::UnboundedReceiver<ReplyChunk>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Connects to the server and starts the reader task.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}...", config.addr);

        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.addr))
            .await
            .map_err(|_| {
                tracing::debug!("Connection timeout");
                ClientError::Timeout
            })??;
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        let connected = Arc::new(AtomicBool::new(true));
        let (tx, replies) = mpsc::unbounded_channel();

        let reader = tokio::spawn({
            let connected = connected.clone();
            let buffer_size = config.read_buffer_size;
            async move {
                if let Err(e) = read_loop(read_half, buffer_size, tx).await {
                    tracing::debug!("read_loop ended: {}", e);
                }
                connected.store(false, Ordering::SeqCst);
            }
        });

        Ok(Self {
            config,
            sender: CommandSender {
                writer: Arc::new(Mutex::new(write_half)),
                connected,
            },
            replies,
            reader,
        })
    }

    /// Returns the connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Returns a handle for sending from other tasks.
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Sends a command.
    pub async fn send(&self, command: &Command) -> Result<(), ClientError> {
        self.sender.send(command).await
    }

    /// Waits for the next reply or push, up to the reply timeout.
    pub async fn recv(&mut self) -> Result<Reply, ClientError> {
        Ok(self.recv_chunk().await?.reply)
    }

    /// Waits for the next reply frame, keeping its listing continuation flag.
    pub async fn recv_chunk(&mut self) -> Result<ReplyChunk, ClientError> {
        tokio::time::timeout(self.config.reply_timeout, self.replies.recv())
            .await
            .map_err(|_| ClientError::Timeout)?
            .ok_or(ClientError::ConnectionClosed)
    }

    /// Returns the next reply if one has already arrived.
    pub fn try_recv(&mut self) -> Option<Reply> {
        self.replies.try_recv().ok().map(|chunk| chunk.reply)
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    /// Closes the write side. The server sees EOF and drops the session.
    pub async fn close(&self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection...");
        self.sender.connected.store(false, Ordering::SeqCst);
        let _ = self.sender.writer.lock().await.shutdown().await;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    buffer_size: usize,
    tx: mpsc::UnboundedSender<ReplyChunk>,
) -> Result<(), ClientError> {
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        decoder.extend(&buf[..n]);

        while let Some(chunk) = decoder.decode_chunk()? {
            match chunk {
                Ok(chunk) => {
                    if tx.send(chunk).is_err() {
                        return Ok(());
                    }
                }
                Err(e) => tracing::warn!("Dropping reply frame: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new("127.0.0.1:7070".parse().unwrap());
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.reply_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config =
            ConnectionConfig::new("127.0.0.1:7070".parse().unwrap()).with_read_buffer_size(100);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ConnectionConfig::new("127.0.0.1:7070".parse().unwrap())
            .with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_reader_drops_corrupted_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut corrupted = Encoder::encode_reply(&Reply::Uuid("first".to_string())).unwrap();
            let last = corrupted.len() - 1;
            corrupted[last] ^= 0x01;
            let intact = Encoder::encode_reply(&Reply::Uuid("second".to_string())).unwrap();

            stream.write_all(&corrupted).await.unwrap();
            stream.write_all(&intact).await.unwrap();
        });

        let config = ConnectionConfig::new(addr).with_reply_timeout(Duration::from_secs(5));
        let mut conn = Connection::connect(config).await.unwrap();
        assert_eq!(conn.recv().await.unwrap(), Reply::Uuid("second".to_string()));

        server.await.unwrap();
        assert!(matches!(conn.recv().await, Err(ClientError::ConnectionClosed)));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_send_writes_sealed_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let conn = Connection::connect(ConnectionConfig::new(addr)).await.unwrap();
        let (mut stream, _) = listener.accept().await.unwrap();

        conn.send(&Command::Nick("alice".to_string())).await.unwrap();

        let mut decoder = Decoder::new();
        let mut buf = [0u8; 512];
        let frame = loop {
            let n = stream.read(&mut buf).await.unwrap();
            decoder.extend(&buf[..n]);
            if let Some(frame) = decoder.decode_frame().unwrap() {
                break frame;
            }
        };

        let sealed = parley_protocol::checksum::open(frame.body()).unwrap();
        assert_eq!(sealed.payload, "NICK,alice");
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let conn = Connection::connect(ConnectionConfig::new(addr)).await.unwrap();
        conn.close().await.unwrap();

        let result = conn.send(&Command::RequestUuid).await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }
}
