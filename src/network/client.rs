//! TCP Client
//!
//! One connection to one server, driven by its own reactor thread.
//! Received messages pile up in [`Client::queue`] until the application
//! drains them.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{LinkError, Result};
use crate::protocol::{Message, MessageTag, OwnedMessage};
use crate::queue::MessageQueue;
use super::{Connection, Reactor};

/// TCP client exchanging `Message<T>` with one server
pub struct Client<T: MessageTag> {
    config: Config,

    /// Present between `connect` and `disconnect`
    reactor: Option<Reactor>,

    connection: Option<Arc<Connection<T>>>,

    /// Messages received from the server, oldest first
    inbound: Arc<MessageQueue<OwnedMessage<T>>>,
}

impl<T: MessageTag> Client<T> {
    /// Create a disconnected client with the default config
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a disconnected client with an explicit config
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            reactor: None,
            connection: None,
            inbound: Arc::new(MessageQueue::new()),
        }
    }

    /// Resolve `host:port`, start connecting and launch the reactor thread.
    ///
    /// Returns once the connect is in flight; [`Client::is_connected`]
    /// turns true when it completes.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if self.connection.is_some() {
            self.disconnect();
        }

        let endpoints = resolve(host, port).map_err(|e| {
            tracing::error!("Client connect failed: {}", e);
            e
        })?;

        let reactor = Reactor::start(&self.config.thread_name).map_err(|e| {
            tracing::error!("Client connect failed: {}", e);
            e
        })?;

        let connection = Connection::outgoing(
            reactor.handle().clone(),
            Arc::clone(&self.inbound),
            &self.config,
        );
        connection.connect_to_server(endpoints);

        tracing::info!("Connecting to {}:{}", host, port);
        self.connection = Some(connection);
        self.reactor = Some(reactor);
        Ok(())
    }

    /// Close the connection, stop the reactor and release the connection
    pub fn disconnect(&mut self) {
        if let Some(connection) = &self.connection {
            if connection.is_connected() {
                connection.disconnect();
            }
        }

        if let Some(mut reactor) = self.reactor.take() {
            reactor.stop();
        }

        if let Some(connection) = self.connection.take() {
            // Covers a connect that never completed
            connection.disconnect();
            tracing::info!("Client disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .map(|c| c.is_connected())
            .unwrap_or(false)
    }

    /// Queue `message` for the server
    pub fn send(&self, message: Message<T>) -> Result<()> {
        match &self.connection {
            Some(connection) => connection.send(message),
            None => Err(LinkError::NotConnected),
        }
    }

    /// The connection to the server, if one was set up
    pub fn connection(&self) -> Option<&Arc<Connection<T>>> {
        self.connection.as_ref()
    }

    /// Messages received from the server. Nothing drains it automatically.
    pub fn queue(&self) -> &MessageQueue<OwnedMessage<T>> {
        &self.inbound
    }
}

impl<T: MessageTag> Default for Client<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MessageTag> Drop for Client<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// IPv4 endpoints for `host:port`
fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let endpoints: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()?
        .filter(SocketAddr::is_ipv4)
        .collect();

    if endpoints.is_empty() {
        return Err(LinkError::Resolve {
            host: host.to_string(),
            port,
        });
    }
    Ok(endpoints)
}
