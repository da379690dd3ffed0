//! Connection
//!
//! Owns one socket and runs its two pipelines on the reactor thread:
//!
//! ```text
//! write:  Idle ──► SendingHeader ──► SendingBody ──► Idle / next header
//!                        │ (empty body) ─────────────►
//! read:   WaitHeader ──► WaitBody ──► push inbound ──► WaitHeader
//!               │ (size == 0) ──────►
//! ```
//!
//! The read pipeline stages headers and bodies in buffers it keeps for its
//! whole lifetime; each received body is split off the body buffer rather
//! than allocated afresh.
//!
//! Any I/O error closes the connection and stops both pipelines. Nothing is
//! retried; callers find out through [`Connection::is_connected`] or a
//! failed [`Connection::send`].

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::error::{LinkError, Result};
use crate::protocol::{check_body_size, decode_header, encode_header, Message, MessageHeader, MessageTag, OwnedMessage};
use crate::queue::MessageQueue;

/// Which side created the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created by initiating a connect
    Client,

    /// Created by accepting one
    Server,
}

/// Socket lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Client role, connect still in flight
    Connecting,

    /// Socket open, pipelines running
    Connected,

    /// Socket closed; terminal
    Closed,
}

/// One TCP connection and its read/write pipelines
pub struct Connection<T: MessageTag> {
    /// Server-assigned id (0 on the client side)
    id: AtomicU32,

    role: Role,

    /// Reactor the pipelines run on
    reactor: Handle,

    /// Lifecycle; pipelines watch it to learn about a local disconnect
    state: watch::Sender<ConnectionState>,

    /// Accepted socket waiting for its pipelines to start
    socket: Mutex<Option<TcpStream>>,

    /// Posting side of the outbound queue
    outbound: mpsc::UnboundedSender<Message<T>>,

    /// Receiving side, handed to the write pipeline when it starts
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Message<T>>>>,

    /// Shared inbound queue of the owning client or server
    inbound: Arc<MessageQueue<OwnedMessage<T>>>,

    peer_addr: OnceLock<SocketAddr>,

    max_body_size: u32,
    nodelay: bool,

    /// Reserved for a challenge/response integrity check. Only seeded.
    handshake_seed: u64,
}

impl<T: MessageTag> Connection<T> {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Wrap a freshly accepted socket (server role)
    pub fn accepted(
        stream: TcpStream,
        reactor: Handle,
        inbound: Arc<MessageQueue<OwnedMessage<T>>>,
        config: &Config,
    ) -> Arc<Self> {
        let connection = Self::build(Role::Server, ConnectionState::Connected, reactor, inbound, config);
        if let Ok(addr) = stream.peer_addr() {
            let _ = connection.peer_addr.set(addr);
        }
        *connection.socket.lock() = Some(stream);
        Arc::new(connection)
    }

    /// Create a connection that will dial out (client role)
    pub fn outgoing(
        reactor: Handle,
        inbound: Arc<MessageQueue<OwnedMessage<T>>>,
        config: &Config,
    ) -> Arc<Self> {
        Arc::new(Self::build(Role::Client, ConnectionState::Connecting, reactor, inbound, config))
    }

    fn build(
        role: Role,
        state: ConnectionState,
        reactor: Handle,
        inbound: Arc<MessageQueue<OwnedMessage<T>>>,
        config: &Config,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let handshake_seed = match role {
            Role::Server => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default(),
            Role::Client => 0,
        };

        Self {
            id: AtomicU32::new(0),
            role,
            reactor,
            state: watch::Sender::new(state),
            socket: Mutex::new(None),
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            inbound,
            peer_addr: OnceLock::new(),
            max_body_size: config.max_body_size,
            nodelay: config.nodelay,
            handshake_seed,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Acquire)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether the socket is open
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Remote address, once known
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr.get().copied()
    }

    /// Seed reserved for a future handshake; nothing verifies it yet
    pub fn handshake_seed(&self) -> u64 {
        self.handshake_seed
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Dial `endpoints` in order and start the pipelines on the first that
    /// answers. Client role only.
    pub fn connect_to_server(self: &Arc<Self>, endpoints: Vec<SocketAddr>) {
        if self.role != Role::Client {
            tracing::warn!("connect_to_server called on a server-role connection");
            return;
        }

        let connection = Arc::clone(self);
        self.reactor.spawn(async move {
            let mut state = connection.state.subscribe();
            let dial = async {
                let mut last_err = io::Error::new(io::ErrorKind::InvalidInput, "no endpoints to connect to");
                for endpoint in &endpoints {
                    match TcpStream::connect(*endpoint).await {
                        Ok(stream) => return Ok(stream),
                        Err(e) => {
                            tracing::debug!("Connect to {} failed: {}", endpoint, e);
                            last_err = e;
                        }
                    }
                }
                Err(last_err)
            };

            match until_closed(&mut state, dial).await {
                Ok(stream) => {
                    let promoted = connection.state.send_if_modified(|s| {
                        if *s == ConnectionState::Connecting {
                            *s = ConnectionState::Connected;
                            true
                        } else {
                            false
                        }
                    });
                    if promoted {
                        if let Ok(addr) = stream.peer_addr() {
                            let _ = connection.peer_addr.set(addr);
                        }
                        tracing::info!("Connected to server {:?}", connection.peer_addr());
                        connection.start_pipelines(stream);
                    }
                }
                Err(e) => {
                    tracing::warn!("Connect failed: {}", e);
                    connection.close();
                }
            }
        });
    }

    /// Record the assigned id and start the pipelines if the socket is
    /// open. Server role only.
    pub fn connect_to_client(self: &Arc<Self>, assigned_id: u32) {
        if self.role != Role::Server {
            tracing::warn!("connect_to_client called on a client-role connection");
            return;
        }
        if !self.is_connected() {
            return;
        }

        let Some(stream) = self.socket.lock().take() else {
            tracing::warn!("Connection {} already started", self.id());
            return;
        };

        self.id.store(assigned_id, Ordering::Release);
        self.start_pipelines(stream);
    }

    /// Close the socket from the reactor thread. Idempotent.
    ///
    /// Any in-flight read or write fails; a message interrupted mid-transfer
    /// is lost.
    pub fn disconnect(&self) {
        self.close();
    }

    /// Queue `message` for transmission. The transfer happens later on the
    /// reactor thread.
    pub fn send(&self, message: Message<T>) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Err(LinkError::NotConnected);
        }
        self.outbound.send(message).map_err(|_| LinkError::NotConnected)
    }

    fn close(&self) {
        let previous = self.state.send_replace(ConnectionState::Closed);
        if previous != ConnectionState::Closed {
            // Running pipelines drop their own halves; a never-started
            // socket is handed back to the reactor to be dropped there.
            if let Some(stream) = self.socket.lock().take() {
                self.reactor.spawn(async move { drop(stream) });
            }
            tracing::debug!("Connection {} closed", self.id());
        }
    }

    fn start_pipelines(self: &Arc<Self>, stream: TcpStream) {
        if self.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("Failed to set TCP_NODELAY: {}", e);
            }
        }

        let Some(outbound_rx) = self.outbound_rx.lock().take() else {
            tracing::warn!("Connection {} pipelines already started", self.id());
            return;
        };

        let (reader, writer) = stream.into_split();
        self.reactor.spawn(Arc::clone(self).read_pipeline(reader));
        self.reactor.spawn(Arc::clone(self).write_pipeline(writer, outbound_rx));
    }

    // =========================================================================
    // Write Pipeline
    // =========================================================================

    async fn write_pipeline(
        self: Arc<Self>,
        mut writer: OwnedWriteHalf,
        mut posted: mpsc::UnboundedReceiver<Message<T>>,
    ) {
        let mut state = self.state.subscribe();
        let mut outbound: VecDeque<Message<T>> = VecDeque::new();
        let mut header = BytesMut::with_capacity(MessageHeader::<T>::WIRE_SIZE);

        loop {
            // Idle: park until something is posted
            if outbound.is_empty() {
                let next = until_closed(&mut state, async {
                    posted
                        .recv()
                        .await
                        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "outbound queue closed"))
                })
                .await;
                match next {
                    Ok(message) => outbound.push_back(message),
                    Err(_) => break,
                }
            }
            while let Ok(message) = posted.try_recv() {
                outbound.push_back(message);
            }

            let Some(front) = outbound.front() else {
                continue;
            };

            // SendingHeader
            header.clear();
            encode_header(front.header(), &mut header);
            if let Err(e) = until_closed(&mut state, writer.write_all(&header)).await {
                tracing::warn!("ID: {} header write failed: {}", self.id(), e);
                break;
            }

            // SendingBody
            if !front.body().is_empty() {
                if let Err(e) = until_closed(&mut state, writer.write_all(front.body())).await {
                    tracing::warn!("ID: {} body write failed: {}", self.id(), e);
                    break;
                }
            }

            outbound.pop_front();
            tracing::trace!("ID: {} message sent, {} queued", self.id(), outbound.len());
        }

        self.close();
    }

    // =========================================================================
    // Read Pipeline
    // =========================================================================

    async fn read_pipeline(self: Arc<Self>, mut reader: OwnedReadHalf) {
        let mut state = self.state.subscribe();
        let mut staging = vec![0u8; MessageHeader::<T>::WIRE_SIZE];
        let mut body_buf = BytesMut::new();

        loop {
            // WaitHeader
            if let Err(e) = until_closed(&mut state, reader.read_exact(&mut staging)).await {
                tracing::warn!("ID: {} header read failed: {}", self.id(), e);
                break;
            }

            let header = match decode_header::<T>(&staging)
                .and_then(|h| check_body_size(h.size, self.max_body_size).map(|_| h))
            {
                Ok(header) => header,
                Err(e) => {
                    tracing::warn!("ID: {} rejected frame: {}", self.id(), e);
                    break;
                }
            };

            // WaitBody. The body is split off the staging buffer, whose
            // allocation is reclaimed once the message is dropped.
            let len = header.size as usize;
            body_buf.resize(len, 0);
            if len > 0 {
                if let Err(e) = until_closed(&mut state, reader.read_exact(&mut body_buf[..])).await {
                    tracing::warn!("ID: {} body read failed: {}", self.id(), e);
                    break;
                }
            }

            let message = match Message::from_frame(header.id, body_buf.split_to(len)) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("ID: {} rejected frame: {}", self.id(), e);
                    break;
                }
            };

            let remote = match self.role {
                Role::Server => Some(Arc::downgrade(&self)),
                Role::Client => None,
            };
            tracing::trace!("ID: {} received {}", self.id(), message);
            self.inbound.push(OwnedMessage { remote, msg: message });
        }

        self.close();
    }
}

impl<T: MessageTag> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("role", &self.role)
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr())
            .finish()
    }
}

/// Run `io` unless the connection is closed first, in which case the
/// operation is abandoned and reported as aborted.
async fn until_closed<F, R>(state: &mut watch::Receiver<ConnectionState>, io: F) -> io::Result<R>
where
    F: Future<Output = io::Result<R>>,
{
    let closed = async {
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    };

    tokio::select! {
        biased;
        _ = closed => Err(io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed locally")),
        res = io => res,
    }
}
