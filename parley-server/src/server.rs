//! TCP server implementation.

use crate::config::{NetworkConfig, DEFAULT_OUTBOUND_CAPACITY};
use crate::error::ServerError;
use crate::registry::{ConnectionId, Deliver, RoomRegistry};
use crate::session::{Outcome, Session};
use parking_lot::Mutex;
use parley_protocol::{Frame, DEFAULT_PORT, HEADER_LENGTH};
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Addresses to listen on. All of them share one room registry.
    pub listen_addrs: Vec<SocketAddr>,
    /// Maximum concurrent connections across all listeners.
    pub max_connections: usize,
    /// Frames queued per connection before broadcast pushes are dropped.
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec![SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT))],
            max_connections: 1000,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addrs: Vec<SocketAddr>) -> Self {
        Self {
            listen_addrs,
            ..Default::default()
        }
    }

    /// Builds the server configuration from the network section.
    pub fn from_network(network: &NetworkConfig) -> Self {
        Self {
            listen_addrs: network.listen_addrs(),
            max_connections: network.max_connections,
            outbound_capacity: network.outbound_capacity.max(1),
        }
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub pushes_dropped: AtomicU64,
}

impl ServerStats {
    /// Counts a new connection unless `max` are already active.
    pub fn try_admit(&self, max: u64) -> bool {
        let admitted = self
            .connections_active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                (active < max).then_some(active + 1)
            })
            .is_ok();
        if admitted {
            self.connections_total.fetch_add(1, Ordering::Relaxed);
        }
        admitted
    }
}

/// Outbound queue of one connection, drained by its writer task.
///
/// Broadcast pushes are dropped once the queue is full. Replies are never
/// dropped: those that do not fit wait in `spill`, and the connection stops
/// reading until they are flushed. Nothing enters the queue while `spill`
/// is non-empty, so frames leave in the order they were queued.
struct Outbound {
    tx: mpsc::Sender<Frame>,
    spill: Mutex<VecDeque<Frame>>,
    lagging: AtomicBool,
    stats: Arc<ServerStats>,
    remote_addr: SocketAddr,
}

impl Outbound {
    fn new(tx: mpsc::Sender<Frame>, stats: Arc<ServerStats>, remote_addr: SocketAddr) -> Self {
        Self {
            tx,
            spill: Mutex::new(VecDeque::new()),
            lagging: AtomicBool::new(false),
            stats,
            remote_addr,
        }
    }

    fn has_spill(&self) -> bool {
        !self.spill.lock().is_empty()
    }

    /// Moves spilled replies into the queue, waiting for room.
    ///
    /// Returns false once the writer task is gone.
    async fn flush(&self) -> bool {
        while self.has_spill() {
            let Ok(permit) = self.tx.reserve().await else {
                return false;
            };
            self.send_spilled(permit);
        }
        true
    }

    fn send_spilled(&self, permit: mpsc::Permit<'_, Frame>) {
        if let Some(frame) = self.spill.lock().pop_front() {
            permit.send(frame);
        }
    }
}

impl Deliver for Outbound {
    fn deliver(&self, frame: Frame) -> bool {
        let mut spill = self.spill.lock();
        if !spill.is_empty() {
            spill.push_back(frame);
            return true;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                spill.push_back(frame);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn push(&self, frame: Frame) -> bool {
        let result = {
            let spill = self.spill.lock();
            if spill.is_empty() {
                self.tx.try_send(frame)
            } else {
                Err(TrySendError::Full(frame))
            }
        };

        match result {
            Ok(()) => {
                self.lagging.store(false, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.stats.pushes_dropped.fetch_add(1, Ordering::Relaxed);
                if !self.lagging.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        "[{}] Outbound queue full, dropping broadcast pushes",
                        self.remote_addr
                    );
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// TCP chat server.
pub struct Server {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    listeners: Vec<TcpListener>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    stopping: AtomicBool,
    running: AtomicBool,
    next_id: AtomicU64,
}

impl Server {
    /// Binds every configured address. Nothing is accepted until `run`.
    pub async fn bind(config: ServerConfig, registry: Arc<RoomRegistry>) -> Result<Self, ServerError> {
        if config.listen_addrs.is_empty() {
            return Err(ServerError::NoListeners);
        }

        let mut listeners = Vec::with_capacity(config.listen_addrs.len());
        for addr in &config.listen_addrs {
            listeners.push(TcpListener::bind(addr).await?);
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            registry,
            listeners,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            stopping: AtomicBool::new(false),
            running: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    /// Returns the bound addresses, with OS-assigned ports resolved.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|listener| listener.local_addr().ok())
            .collect()
    }

    /// Returns the shared room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Runs one accept loop per listener until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);

        let mut accept_loops = JoinSet::new();
        for index in 0..self.listeners.len() {
            let server = self.clone();
            accept_loops.spawn(async move { server.accept_loop(index).await });
        }

        while let Some(result) = accept_loops.join_next().await {
            if let Err(e) = result {
                tracing::error!("Accept loop failed: {}", e);
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn accept_loop(&self, index: usize) {
        let listener = &self.listeners[index];
        let local_addr = listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "?".to_string());

        let mut shutdown_rx = self.shutdown.subscribe();
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }
        tracing::info!("Server listening on {}", local_addr);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.spawn_connection(stream, addr),
                        Err(e) => {
                            tracing::error!("Accept error on {}: {}", local_addr, e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Listener {} shutting down", local_addr);
                    break;
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        if !self.stats.try_admit(self.config.max_connections as u64) {
            tracing::warn!("Connection limit reached, rejecting {}", addr);
            return;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = self.registry.clone();
        let stats = self.stats.clone();
        let capacity = self.config.outbound_capacity;
        let mut conn_shutdown = self.shutdown.subscribe();
        let stopping = self.stopping.load(Ordering::SeqCst);

        tokio::spawn(async move {
            let result = if stopping {
                Err(ServerError::ShuttingDown)
            } else {
                Self::handle_connection(
                    stream,
                    addr,
                    id,
                    registry,
                    stats.clone(),
                    capacity,
                    &mut conn_shutdown,
                )
                .await
            };

            if let Err(e) = result {
                tracing::debug!("Connection {} error: {}", addr, e);
            }

            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            tracing::info!("Client disconnected: {}", addr);
        });
    }

    /// Handles a single connection.
    ///
    /// Reads run on this task; writes run on a dedicated task draining the
    /// connection's outbound queue, so replies and broadcast pushes leave in
    /// the order they were queued with one write in flight. Replies that
    /// overflow the queue are flushed before the next frame is read.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        id: ConnectionId,
        registry: Arc<RoomRegistry>,
        stats: Arc<ServerStats>,
        capacity: usize,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        tracing::info!("Client connected: {} (connection {})", addr, id);
        stream.set_nodelay(true).ok();

        let (mut reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<Frame>(capacity.max(1));

        let mut writer_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                writer.write_all(&frame.encode()).await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let outbound = Arc::new(Outbound::new(tx, stats.clone(), addr));
        let mut session = Session::new(id, addr, registry, outbound.clone());
        session.establish();

        let result = loop {
            tokio::select! {
                frame = read_frame(&mut reader) => {
                    match frame {
                        Ok(Some(body)) => {
                            stats.frames_received.fetch_add(1, Ordering::Relaxed);
                            if let Outcome::Rejected(_) = session.handle_frame(&body) {
                                stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Ok(None) => {
                            tracing::debug!("[{}] Connection closed by client", addr);
                            break Ok(());
                        }
                        Err(e) => {
                            if e.protocol_kind().is_some() {
                                tracing::warn!("[{}] Framing error, closing: {}", addr, e);
                            }
                            break Err(e);
                        }
                    }
                }
                written = &mut writer_task => {
                    break match written {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(ServerError::Io(e)),
                        Err(e) => Err(ServerError::Io(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            e,
                        ))),
                    };
                }
                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    break Err(ServerError::ShuttingDown);
                }
            }

            if outbound.has_spill() {
                tokio::select! {
                    flushed = outbound.flush() => {
                        if !flushed {
                            break Err(ServerError::Io(std::io::ErrorKind::BrokenPipe.into()));
                        }
                    }
                    _ = shutdown.recv() => {
                        break Err(ServerError::ShuttingDown);
                    }
                }
            }
        };

        // Queued frames for a closed session are discarded.
        session.close();
        writer_task.abort();
        result
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

/// Reads one frame body. Returns `None` on a clean EOF between frames.
async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ServerError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LENGTH];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ServerError::Io(e)),
    }

    let len = Frame::decode_header(&header)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}
