//! TCP Server
//!
//! Accepts connections on the reactor thread and hands received messages to
//! the application through [`Server::update`].

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;

use crate::config::Config;
use crate::error::{LinkError, Result};
use crate::protocol::{Message, MessageTag, OwnedMessage};
use crate::queue::MessageQueue;
use super::{Connection, LoggingHandler, Reactor, ServerHandler};

/// TCP server exchanging `Message<T>` with any number of clients
pub struct Server<T: MessageTag, H: ServerHandler<T> = LoggingHandler> {
    /// Port the acceptor listens on (0 picks an ephemeral port)
    port: u16,

    /// State shared with the accept loop
    shared: Arc<ServerShared<T, H>>,

    /// Present while the server runs
    reactor: Option<Reactor>,

    /// Bound address, known once started
    local_addr: Option<SocketAddr>,
}

/// Everything the accept loop and the application threads both touch
struct ServerShared<T: MessageTag, H> {
    handler: H,
    config: Config,

    /// Inbound queue fed by every connection's read pipeline
    inbound: Arc<MessageQueue<OwnedMessage<T>>>,

    /// Live connections in accept order
    connections: Mutex<Vec<Arc<Connection<T>>>>,

    /// Next id to hand out
    next_id: AtomicU32,
}

impl<T: MessageTag, H: ServerHandler<T>> ServerShared<T, H> {
    fn new(handler: H, config: Config) -> Self {
        Self {
            handler,
            next_id: AtomicU32::new(config.first_connection_id),
            config,
            inbound: Arc::new(MessageQueue::new()),
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Gate a freshly accepted socket through the connect hook and, if
    /// approved, register it and start its pipelines.
    fn admit(&self, stream: TcpStream) {
        let connection = Connection::accepted(
            stream,
            Handle::current(),
            Arc::clone(&self.inbound),
            &self.config,
        );

        if !self.handler.on_client_connected(&connection) {
            tracing::warn!("Connection from {:?} was not approved", connection.peer_addr());
            connection.disconnect();
            return;
        }

        // The id is in place before the connection becomes visible in the list
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        connection.connect_to_client(id);
        self.connections.lock().push(Arc::clone(&connection));
        tracing::info!("Connection {} was approved", id);
    }

    /// Drop every connection matching `is_dead` from the list in one pass,
    /// then report each dropped one through the hook.
    ///
    /// Claiming happens under the list lock, so a connection is reported by
    /// exactly one caller even when several race. Returns how many were
    /// removed.
    fn remove_where(&self, mut is_dead: impl FnMut(&Arc<Connection<T>>) -> bool) -> usize {
        let removed = {
            let mut connections = self.connections.lock();
            let mut removed = Vec::new();
            connections.retain(|c| {
                if is_dead(c) {
                    removed.push(Arc::clone(c));
                    false
                } else {
                    true
                }
            });
            removed
        };

        for connection in &removed {
            self.handler.on_client_disconnected(connection);
        }
        removed.len()
    }
}

impl<T: MessageTag> Server<T> {
    /// Create a server with the logging-only handler
    pub fn with_logging(port: u16) -> Self {
        Self::new(port, LoggingHandler)
    }
}

impl<T: MessageTag, H: ServerHandler<T>> Server<T, H> {
    /// Create a server with the default config
    pub fn new(port: u16, handler: H) -> Self {
        Self::with_config(port, handler, Config::default())
    }

    /// Create a server with an explicit config
    pub fn with_config(port: u16, handler: H, config: Config) -> Self {
        Self {
            port,
            shared: Arc::new(ServerShared::new(handler, config)),
            reactor: None,
            local_addr: None,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Bind the acceptor, start accepting and launch the reactor thread
    pub fn start(&mut self) -> Result<()> {
        if self.reactor.is_some() {
            tracing::warn!("Server already started");
            return Ok(());
        }

        let reactor = Reactor::start(&self.shared.config.thread_name).map_err(|e| {
            tracing::error!(fatal = true, "Server setup failed: {}", e);
            e
        })?;

        let listener = self.bind(&reactor).map_err(|e| {
            tracing::error!(fatal = true, "Server setup failed: {}", e);
            e
        })?;

        let local_addr = listener.local_addr()?;
        reactor.post(accept_loop(listener, Arc::clone(&self.shared)));

        self.local_addr = Some(local_addr);
        self.reactor = Some(reactor);
        tracing::info!("Server started on {}", local_addr);
        Ok(())
    }

    /// Stop the reactor and join its thread
    pub fn stop(&mut self) {
        let Some(mut reactor) = self.reactor.take() else {
            return;
        };

        for connection in self.shared.connections.lock().iter() {
            connection.disconnect();
        }
        reactor.stop();
        self.local_addr = None;
        tracing::info!("Server stopped");
    }

    fn bind(&self, reactor: &Reactor) -> Result<TcpListener> {
        let addr = SocketAddr::from((self.shared.config.bind_addr, self.port));
        let setup_err = |e: io::Error| LinkError::Setup(format!("Failed to listen on {}: {}", addr, e));

        let listener = std::net::TcpListener::bind(addr).map_err(setup_err)?;
        listener.set_nonblocking(true).map_err(setup_err)?;

        // Registering with the reactor needs its context
        let _guard = reactor.handle().enter();
        TcpListener::from_std(listener).map_err(setup_err)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Dispatch up to `max_messages` queued messages (all of them on `None`)
    /// to [`ServerHandler::on_message_received`], oldest first.
    ///
    /// With `wait`, first blocks the calling thread until a message is
    /// queued. Returns how many messages were dispatched.
    pub fn update(&self, max_messages: Option<usize>, wait: bool) -> usize {
        if wait {
            self.shared.inbound.wait();
        }

        let limit = max_messages.unwrap_or(usize::MAX);
        let mut dispatched = 0;
        while dispatched < limit {
            let Some(owned) = self.shared.inbound.pop() else {
                break;
            };
            let sender = owned.sender();
            self.shared.handler.on_message_received(sender, owned.msg);
            dispatched += 1;
        }
        dispatched
    }

    /// Send `message` to one client.
    ///
    /// A dead target is treated as a disconnect: the connection leaves the
    /// list and the hook fires, once, if it was still registered.
    pub fn message_client(&self, message: &Message<T>, target: Option<&Arc<Connection<T>>>) {
        let Some(client) = target else {
            tracing::warn!("No client to send {} to", message);
            return;
        };

        if client.is_connected() && client.send(message.clone()).is_ok() {
            tracing::trace!("Message queued for client {}", client.id());
            return;
        }

        // Only the caller that takes it out of the list reports it
        self.shared.remove_where(|c| Arc::ptr_eq(c, client));
    }

    /// Send `message` to every connected client, then report and remove
    /// the ones found disconnected during the scan.
    pub fn message_all(&self, message: &Message<T>) {
        let removed = self
            .shared
            .remove_where(|c| !(c.is_connected() && c.send(message.clone()).is_ok()));
        if removed > 0 {
            tracing::debug!("Removed {} disconnected clients", removed);
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn is_running(&self) -> bool {
        self.reactor.is_some()
    }

    /// Address the acceptor is bound to, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Snapshot of the connection list
    pub fn connections(&self) -> Vec<Arc<Connection<T>>> {
        self.shared.connections.lock().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    /// Inbound queue shared by every connection
    pub fn queue(&self) -> &MessageQueue<OwnedMessage<T>> {
        &self.shared.inbound
    }

    pub fn handler(&self) -> &H {
        &self.shared.handler
    }
}

impl<T: MessageTag, H: ServerHandler<T>> Drop for Server<T, H> {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Accept Loop
// =============================================================================

/// Source of incoming sockets
#[async_trait]
trait Acceptor: Send + Sync + 'static {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Accept forever; every attempt, failed or not, re-arms the next one
async fn accept_loop<T, H, A>(acceptor: A, shared: Arc<ServerShared<T, H>>)
where
    T: MessageTag,
    H: ServerHandler<T>,
    A: Acceptor,
{
    loop {
        match acceptor.accept().await {
            Ok((stream, peer)) => {
                tracing::info!("New connection: {}", peer);
                shared.admit(stream);
            }
            Err(e) => {
                tracing::error!(fatal = true, "Accept failed: {}", e);
            }
        }
    }
}
